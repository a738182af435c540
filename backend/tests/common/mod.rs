// Common test utilities that are shared across integration tests
use regex::Regex;
use std::sync::Once;

static INIT: Once = Once::new();

pub const MIGRATIONS: &[&str] = &[
    include_str!("../../migrations/20250101000000_core_schema.sql"),
    include_str!("../../migrations/20250101000100_sales_schema.sql"),
    include_str!("../../migrations/20250101000200_workflow_schema.sql"),
];

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init()
            .ok();
    });
}

/// Labels of a Postgres enum declared in the migrations, in declaration order
pub fn enum_labels(type_name: &str) -> Vec<String> {
    let declaration = Regex::new(&format!(
        r"(?s)CREATE TYPE {}\s+AS ENUM\s*\((.*?)\);",
        regex::escape(type_name)
    ))
    .expect("valid enum regex");
    let label = Regex::new(r"'([^']*)'").expect("valid label regex");

    MIGRATIONS
        .iter()
        .find_map(|sql| declaration.captures(sql))
        .map(|caps| {
            label
                .captures_iter(&caps[1])
                .map(|l| l[1].to_string())
                .collect()
        })
        .unwrap_or_default()
}

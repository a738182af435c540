use chrono::{Datelike, Utc};
use sqlx::{migrate::MigrateDatabase, postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use std::time::Duration;

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Maximum time to wait for a connection
    pub acquire_timeout: Duration,
    /// Maximum idle time before a connection is closed
    pub idle_timeout: Duration,
    /// Maximum lifetime of a connection
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl PoolConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_number("DB_MAX_CONNECTIONS") {
            config.max_connections = n as u32;
        }
        if let Some(n) = env_number("DB_MIN_CONNECTIONS") {
            config.min_connections = n as u32;
        }
        if let Some(n) = env_number("DB_ACQUIRE_TIMEOUT") {
            config.acquire_timeout = Duration::from_secs(n);
        }
        if let Some(n) = env_number("DB_IDLE_TIMEOUT") {
            config.idle_timeout = Duration::from_secs(n);
        }
        if let Some(n) = env_number("DB_MAX_LIFETIME") {
            config.max_lifetime = Duration::from_secs(n);
        }

        config
    }
}

fn env_number(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Create a database connection pool with configuration from the environment
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::from_env()).await
}

/// Create a database connection pool with custom configuration
pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> anyhow::Result<PgPool> {
    if !Postgres::database_exists(database_url).await? {
        Postgres::create_database(database_url).await?;
        tracing::info!("Database created successfully");
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    tracing::info!(
        "Database pool created: max={}, min={}, acquire_timeout={}s",
        config.max_connections,
        config.min_connections,
        config.acquire_timeout.as_secs()
    );

    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// Check database health
pub async fn health_check(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

/// Get pool statistics
#[derive(Debug, serde::Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: u32,
    pub in_use: u32,
}

pub fn get_pool_stats(pool: &PgPool) -> PoolStats {
    let idle = pool.num_idle() as u32;
    PoolStats {
        size: pool.size(),
        idle,
        in_use: pool.size().saturating_sub(idle),
    }
}

/// Document series with a yearly running counter, e.g. `QT-2025-0042`
#[derive(Debug, Clone, Copy)]
pub enum NumberSeries {
    Lead,
    Quotation,
}

impl NumberSeries {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Lead => "LEAD",
            Self::Quotation => "QT",
        }
    }

    fn lock_key(&self) -> i64 {
        match self {
            Self::Lead => 7_001,
            Self::Quotation => 7_002,
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            Self::Lead => {
                "SELECT COALESCE(MAX(CAST(SUBSTRING(lead_number FROM '[0-9]+$') AS INTEGER)), 0) \
                 FROM leads WHERE lead_number LIKE $1"
            }
            Self::Quotation => {
                "SELECT COALESCE(MAX(CAST(SUBSTRING(quotation_number FROM '[0-9]+$') AS INTEGER)), 0) \
                 FROM quotations WHERE quotation_number LIKE $1"
            }
        }
    }
}

pub fn format_document_number(series: NumberSeries, year: i32, sequence: i32) -> String {
    format!("{}-{}-{:04}", series.prefix(), year, sequence)
}

/// Allocates the next number in a series.
///
/// Takes a transaction-scoped advisory lock so concurrent inserts never see
/// the same maximum; the lock is released on commit or rollback.
pub async fn next_document_number(
    tx: &mut Transaction<'_, Postgres>,
    series: NumberSeries,
) -> Result<String, sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(series.lock_key())
        .execute(&mut **tx)
        .await?;

    let year = Utc::now().year();
    let pattern = format!("{}-{}-%", series.prefix(), year);
    let current: i32 = sqlx::query_scalar(series.sql())
        .bind(pattern)
        .fetch_one(&mut **tx)
        .await?;

    Ok(format_document_number(series, year, current + 1))
}

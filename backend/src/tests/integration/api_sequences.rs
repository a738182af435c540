use axum::http::StatusCode;
use serde_json::{json, Value};
use serial_test::serial;
use tower::ServiceExt;

use crate::tests::{fixtures::*, helpers::*, TestContext};

fn template_body(name: &str) -> Value {
    json!({
        "name": name,
        "category": "sales_followup",
        "steps": [
            { "title": "Thank-you call for {client_name}", "due_after_hours": 4, "priority": "medium" },
            { "title": "Send portfolio", "due_after_hours": 48, "priority": "low" },
            {
                "title": "Corporate contract review",
                "due_after_hours": 72,
                "is_conditional": true,
                "condition_type": "client_type",
                "condition_value": "corporate"
            }
        ],
        "rules": [
            {
                "condition_field": "quotation_value",
                "condition_operator": ">",
                "condition_value": "200000",
                "action_type": "change_priority",
                "action_data": { "priority": "urgent" }
            }
        ]
    })
}

async fn delete_template(ctx: &TestContext, id: &str) {
    sqlx::query("DELETE FROM task_sequence_templates WHERE id = $1::uuid")
        .bind(id)
        .execute(&ctx.db_pool)
        .await
        .ok();
}

#[tokio::test]
#[serial]
async fn test_create_template_and_preview_plan() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let employee = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            employee.id,
            "POST",
            "/api/v1/sequences",
            Some(template_body("Wedding enquiry follow-up")),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let template = json_body(response).await;
    let id = template["id"].as_str().unwrap().to_string();
    assert_eq!(template["steps"].as_array().unwrap().len(), 3);
    assert_eq!(template["rules"].as_array().unwrap().len(), 1);

    let preview = ctx
        .app()
        .oneshot(request_as(
            employee.id,
            "POST",
            &format!("/api/v1/sequences/{}/preview", id),
            Some(json!({ "context": { "client_type": "personal", "quotation_value": 250000 } })),
        ))
        .await
        .unwrap();
    assert_eq!(preview.status(), StatusCode::OK);

    let plan = json_body(preview).await;
    assert_eq!(plan["total_steps"], 2);
    assert_eq!(plan["estimated_duration_days"], 2);

    delete_template(&ctx, &id).await;
    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_template_needs_steps() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let employee = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            employee.id,
            "POST",
            "/api/v1/sequences",
            Some(json!({ "name": "Empty", "steps": [] })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_invalid_rule_operator_is_rejected() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let employee = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();

    let mut body = template_body("Broken rules");
    body["rules"][0]["condition_operator"] = json!("~=");

    let response = ctx
        .app()
        .oneshot(request_as(employee.id, "POST", "/api/v1/sequences", Some(body)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_update_replaces_steps_and_delete_removes_template() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let employee = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();

    let created = ctx
        .app()
        .oneshot(request_as(
            employee.id,
            "POST",
            "/api/v1/sequences",
            Some(template_body("Pre-wedding shoot")),
        ))
        .await
        .unwrap();
    let id = json_body(created).await["id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/sequences/{}", id);

    let updated = ctx
        .app()
        .oneshot(request_as(
            employee.id,
            "PUT",
            &uri,
            Some(json!({ "steps": [{ "title": "Single reminder", "due_after_hours": 24 }] })),
        ))
        .await
        .unwrap();
    assert_eq!(updated.status(), StatusCode::OK);

    let detail = json_body(updated).await;
    assert_eq!(detail["steps"].as_array().unwrap().len(), 1);
    assert_eq!(detail["steps"][0]["step_number"], 1);
    assert_eq!(detail["rules"].as_array().unwrap().len(), 1);

    let deleted = ctx
        .app()
        .oneshot(request_as(employee.id, "DELETE", &uri, None))
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let gone = ctx
        .app()
        .oneshot(request_as(employee.id, "GET", &uri, None))
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_step_due_hours_are_capped_at_one_year() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let employee = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();

    let mut body = template_body("Far future");
    body["steps"][1]["due_after_hours"] = json!(i32::MAX);

    let response = ctx
        .app()
        .oneshot(request_as(employee.id, "POST", "/api/v1/sequences", Some(body)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let errors = json_body(response).await;
    assert!(errors.to_string().contains("steps[1].due_after_hours"));
    assert_eq!(count_table_rows(&ctx.db_pool, "task_sequence_templates").await, 0);

    ctx.cleanup().await;
}

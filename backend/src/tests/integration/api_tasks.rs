use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde_json::json;
use serial_test::serial;
use tower::ServiceExt;
use uuid::Uuid;

use crate::tests::{fixtures::*, helpers::*, TestContext};
use ooak_shared::{Quotation, QuotationStatus, TaskType};

#[tokio::test]
#[serial]
async fn test_create_and_complete_task() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let employee = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            employee.id,
            "POST",
            "/api/v1/tasks",
            Some(json!({
                "task_title": "Share album proofs",
                "priority": "high",
                "assigned_to_employee_id": employee.id,
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let task = json_body(response).await;
    assert_eq!(task["status"], "pending");
    assert_eq!(task["task_type"], "general");

    let mine = ctx
        .app()
        .oneshot(request_as(employee.id, "GET", "/api/v1/tasks/mine", None))
        .await
        .unwrap();
    assert_eq!(mine.status(), StatusCode::OK);
    let mine = json_body(mine).await;
    assert_eq!(mine["meta"]["total"], 1);

    let completed = ctx
        .app()
        .oneshot(request_as(
            employee.id,
            "POST",
            &format!("/api/v1/tasks/{}/complete", task["id"].as_str().unwrap()),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(completed.status(), StatusCode::OK);

    let body = json_body(completed).await;
    assert_eq!(body["task"]["status"], "completed");
    assert!(body["next_task"].is_null());
    assert_eq!(body["sequence_completed"], false);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_archive_requires_reason() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let employee = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();

    let created = ctx
        .app()
        .oneshot(request_as(
            employee.id,
            "POST",
            "/api/v1/tasks",
            Some(json!({ "task_title": "Call venue" })),
        ))
        .await
        .unwrap();
    let task = json_body(created).await;
    let uri = format!("/api/v1/tasks/{}/archive", task["id"].as_str().unwrap());

    let blank = ctx
        .app()
        .oneshot(request_as(employee.id, "POST", &uri, Some(json!({ "reason": "  " }))))
        .await
        .unwrap();
    assert_eq!(blank.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let archived = ctx
        .app()
        .oneshot(request_as(employee.id, "POST", &uri, Some(json!({ "reason": "Client postponed" }))))
        .await
        .unwrap();
    assert_eq!(archived.status(), StatusCode::OK);
    assert_eq!(json_body(archived).await["status"], "archived");

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_reassign_moves_task_to_new_employee() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let first = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let second = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();

    let created = ctx
        .app()
        .oneshot(request_as(
            first.id,
            "POST",
            "/api/v1/tasks",
            Some(json!({ "task_title": "Confirm shoot date", "assigned_to_employee_id": first.id })),
        ))
        .await
        .unwrap();
    let task = json_body(created).await;

    let response = ctx
        .app()
        .oneshot(request_as(
            first.id,
            "POST",
            &format!("/api/v1/tasks/{}/reassign", task["id"].as_str().unwrap()),
            Some(json!({ "employee_id": second.id })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let owner: Option<uuid::Uuid> =
        sqlx::query_scalar("SELECT assigned_to_employee_id FROM ai_tasks WHERE id = $1::uuid")
            .bind(task["id"].as_str().unwrap())
            .fetch_one(&ctx.db_pool)
            .await
            .unwrap();
    assert_eq!(owner, Some(second.id));

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_quotation_task_archives_open_contact_tasks() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let rep = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let lead = insert_lead(&ctx.db_pool, &LeadFixture::assigned_to(rep.id)).await.unwrap();
    let quotation = insert_quotation(
        &ctx.db_pool,
        &lead,
        rep.id,
        rust_decimal::Decimal::new(75_000, 0),
        ooak_shared::QuotationStatus::Draft,
    )
    .await
    .unwrap();

    let contact = ctx
        .app()
        .oneshot(request_as(
            rep.id,
            "POST",
            "/api/v1/tasks",
            Some(json!({
                "task_title": "First call",
                "task_type": "contact",
                "client_name": lead.client_name,
                "assigned_to_employee_id": rep.id,
            })),
        ))
        .await
        .unwrap();
    let contact = json_body(contact).await;

    let follow_up = ctx
        .app()
        .oneshot(request_as(
            rep.id,
            "POST",
            "/api/v1/tasks",
            Some(json!({
                "task_title": "Walk through quotation",
                "task_type": "quotation_follow_up",
                "client_name": lead.client_name,
                "quotation_id": quotation.id,
                "assigned_to_employee_id": rep.id,
            })),
        ))
        .await
        .unwrap();
    assert_eq!(follow_up.status(), StatusCode::CREATED);

    let (status, reason): (String, Option<String>) = sqlx::query_as(
        "SELECT status::text, metadata->>'archived_reason' FROM ai_tasks WHERE id = $1::uuid",
    )
    .bind(contact["id"].as_str().unwrap())
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    assert_eq!(status, "archived");
    assert_eq!(reason.as_deref(), Some("Contact completed - quotation already generated"));

    ctx.cleanup().await;
}

async fn approved_quotation(ctx: &TestContext, rep: &ooak_shared::Employee, client_name: Option<&str>) -> Quotation {
    let mut fixture = LeadFixture::assigned_to(rep.id);
    if let Some(name) = client_name {
        fixture.client_name = name.to_string();
    }
    let lead = insert_lead(&ctx.db_pool, &fixture).await.unwrap();
    insert_quotation(&ctx.db_pool, &lead, rep.id, Decimal::new(85_000, 0), QuotationStatus::Approved)
        .await
        .unwrap()
}

fn first_step(total_steps: i32) -> serde_json::Value {
    json!({ "is_sequential": true, "sequence_step": 1, "sequence_total_steps": total_steps })
}

async fn complete(ctx: &TestContext, employee_id: Uuid, task_id: &str) -> axum::response::Response {
    ctx.app()
        .oneshot(request_as(
            employee_id,
            "POST",
            &format!("/api/v1/tasks/{}/complete", task_id),
            None,
        ))
        .await
        .unwrap()
}

#[tokio::test]
#[serial]
async fn test_completing_followups_walks_the_whole_sequence() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let rep = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let quotation = approved_quotation(&ctx, &rep, None).await;
    let first = insert_quotation_task(
        &ctx.db_pool,
        &quotation,
        TaskType::PostApprovalFollowup,
        rep.id,
        first_step(5),
    )
    .await
    .unwrap();

    let mut current = first.id.to_string();
    for expected_step in 2..=5 {
        let response = complete(&ctx, rep.id, &current).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["sequence_completed"], false);
        let next = &body["next_task"];
        assert_eq!(next["metadata"]["sequence_step"], expected_step);
        assert_eq!(next["metadata"]["previous_task_id"], current);
        assert_eq!(next["assigned_to_employee_id"], rep.id.to_string());
        current = next["id"].as_str().unwrap().to_string();
    }

    let last = complete(&ctx, rep.id, &current).await;
    assert_eq!(last.status(), StatusCode::OK);
    let body = json_body(last).await;
    assert!(body["next_task"].is_null());
    assert_eq!(body["sequence_completed"], true);

    let completed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ai_tasks WHERE quotation_id = $1 AND status = 'completed'",
    )
    .bind(quotation.id)
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    assert_eq!(completed, 5);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_completion_never_duplicates_a_pending_step() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let rep = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let quotation = approved_quotation(&ctx, &rep, None).await;
    let first = insert_quotation_task(
        &ctx.db_pool,
        &quotation,
        TaskType::PostApprovalFollowup,
        rep.id,
        first_step(5),
    )
    .await
    .unwrap();
    insert_quotation_task(
        &ctx.db_pool,
        &quotation,
        TaskType::PostApprovalFollowup,
        rep.id,
        json!({ "is_sequential": true, "sequence_step": 2, "sequence_total_steps": 5 }),
    )
    .await
    .unwrap();

    let response = complete(&ctx, rep.id, &first.id.to_string()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert!(body["next_task"].is_null());
    assert_eq!(body["sequence_completed"], false);

    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ai_tasks WHERE quotation_id = $1 AND status = 'pending'",
    )
    .bind(quotation.id)
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    assert_eq!(pending, 1);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_failed_next_step_keeps_the_task_pending() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let rep = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let long_name = "Ananya Krishnamurthy ".repeat(9);
    let quotation = approved_quotation(&ctx, &rep, Some(long_name.trim())).await;

    // Step 2 renders to a title longer than the task title column allows.
    let template_id: Uuid = sqlx::query_scalar(
        "INSERT INTO task_sequence_templates (name) VALUES ('post_approval_followup') RETURNING id",
    )
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    sqlx::query(
        r#"
        INSERT INTO sequence_steps (sequence_template_id, step_number, title, due_after_hours)
        VALUES ($1, 1, 'Call {quotation_number}', 2), ($1, 2, '{client_name} / {client_name}', 24)
        "#,
    )
    .bind(template_id)
    .execute(&ctx.db_pool)
    .await
    .unwrap();

    let first = insert_quotation_task(
        &ctx.db_pool,
        &quotation,
        TaskType::PostApprovalFollowup,
        rep.id,
        first_step(2),
    )
    .await
    .unwrap();

    let failed = complete(&ctx, rep.id, &first.id.to_string()).await;
    assert!(failed.status().is_server_error());

    let status: String = sqlx::query_scalar("SELECT status::text FROM ai_tasks WHERE id = $1")
        .bind(first.id)
        .fetch_one(&ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(status, "pending");
    assert_eq!(count_table_rows(&ctx.db_pool, "ai_tasks").await, 1);

    sqlx::query("UPDATE sequence_steps SET title = 'Check in with {client_name}' WHERE step_number = 2")
        .execute(&ctx.db_pool)
        .await
        .unwrap();

    let retried = complete(&ctx, rep.id, &first.id.to_string()).await;
    assert_eq!(retried.status(), StatusCode::OK);
    let body = json_body(retried).await;
    assert_eq!(body["task"]["status"], "completed");
    assert_eq!(body["next_task"]["metadata"]["sequence_step"], 2);
    assert_eq!(body["next_task"]["metadata"]["sequence_template_id"], template_id.to_string());

    ctx.cleanup().await;
}

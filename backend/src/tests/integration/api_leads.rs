use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;
use serial_test::serial;
use tower::ServiceExt;

use crate::tests::{fixtures::*, helpers::*, TestContext};

#[tokio::test]
#[serial]
async fn test_requests_without_identity_are_rejected() {
    let Some(ctx) = TestContext::try_new().await else { return };

    let request = Request::builder()
        .uri("/api/v1/leads")
        .body(Body::empty())
        .unwrap();
    let response = ctx.app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_create_assigned_lead_generates_initial_contact_task() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let owner = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            owner.id,
            "POST",
            "/api/v1/leads",
            Some(json!({
                "client_name": "Meera & Rahul",
                "estimated_value": 45000,
                "assigned_to": owner.id,
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ASSIGNED");
    assert!(body["lead_number"].as_str().unwrap().starts_with("LEAD-"));
    assert!(body["automation"]["tasks_generated"].as_u64().unwrap() >= 1);

    let follow_ups: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ai_tasks WHERE lead_id = $1 AND task_type = 'lead_follow_up'",
    )
    .bind(uuid::Uuid::parse_str(body["id"].as_str().unwrap()).unwrap())
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    assert_eq!(follow_ups, 1);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_unassigned_lead_generates_nothing() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let employee = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            employee.id,
            "POST",
            "/api/v1/leads",
            Some(json!({ "client_name": "Walk-in enquiry" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = json_body(response).await;
    assert_eq!(body["status"], "UNASSIGNED");
    assert!(body.get("automation").is_none());
    assert_eq!(count_table_rows(&ctx.db_pool, "ai_tasks").await, 0);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_reject_lead_archives_its_pending_tasks() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let owner = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();

    let created = ctx
        .app()
        .oneshot(request_as(
            owner.id,
            "POST",
            "/api/v1/leads",
            Some(json!({ "client_name": "Sanjana & Vivek", "assigned_to": owner.id })),
        ))
        .await
        .unwrap();
    let lead = json_body(created).await;
    let lead_id = lead["id"].as_str().unwrap().to_string();

    let response = ctx
        .app()
        .oneshot(request_as(
            owner.id,
            "POST",
            &format!("/api/v1/leads/{}/reject", lead_id),
            Some(json!({ "reason": "Budget mismatch" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "REJECTED");
    assert_eq!(body["rejection_reason"], "Budget mismatch");

    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ai_tasks WHERE lead_id = $1::uuid AND status = 'pending'",
    )
    .bind(&lead_id)
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    assert_eq!(pending, 0);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_terminal_lead_status_cannot_change() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let owner = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let lead = insert_lead(
        &ctx.db_pool,
        &LeadFixture {
            status: ooak_shared::LeadStatus::ClosedWon,
            ..LeadFixture::assigned_to(owner.id)
        },
    )
    .await
    .unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            owner.id,
            "PUT",
            &format!("/api/v1/leads/{}/status", lead.id),
            Some(json!({ "status": "CONTACTED" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_my_leads_hides_closed_leads() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let owner = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    insert_lead(&ctx.db_pool, &LeadFixture::assigned_to(owner.id)).await.unwrap();
    insert_lead(
        &ctx.db_pool,
        &LeadFixture {
            status: ooak_shared::LeadStatus::ClosedLost,
            ..LeadFixture::assigned_to(owner.id)
        },
    )
    .await
    .unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(owner.id, "GET", "/api/v1/leads/mine", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let leads = body.as_array().expect("my leads returns a list");
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0]["status"], "ASSIGNED");

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_status_update_cannot_reject_a_lead() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let owner = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let lead = insert_lead(&ctx.db_pool, &LeadFixture::assigned_to(owner.id)).await.unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            owner.id,
            "PUT",
            &format!("/api/v1/leads/{}/status", lead.id),
            Some(json!({ "status": "REJECTED" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let status: String = sqlx::query_scalar("SELECT status::text FROM leads WHERE id = $1")
        .bind(lead.id)
        .fetch_one(&ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(status, "ASSIGNED");

    let moved = ctx
        .app()
        .oneshot(request_as(
            owner.id,
            "PUT",
            &format!("/api/v1/leads/{}/status", lead.id),
            Some(json!({ "status": "CONTACTED" })),
        ))
        .await
        .unwrap();
    assert_eq!(moved.status(), StatusCode::OK);
    assert_eq!(json_body(moved).await["status"], "CONTACTED");

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_huge_page_number_returns_an_empty_page() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let owner = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    insert_lead(&ctx.db_pool, &LeadFixture::assigned_to(owner.id)).await.unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            owner.id,
            "GET",
            &format!("/api/v1/leads?page={}&per_page=100", i64::MAX),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(0));
    assert_eq!(body["meta"]["total"], 1);
    assert_eq!(body["meta"]["has_next"], false);

    ctx.cleanup().await;
}

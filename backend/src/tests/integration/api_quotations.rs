use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde_json::json;
use serial_test::serial;
use tower::ServiceExt;

use crate::tests::{fixtures::*, helpers::*, TestContext};
use ooak_shared::{QuotationStatus, TaskType};

#[tokio::test]
#[serial]
async fn test_create_quotation_records_client_and_creator() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let rep = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let lead = insert_lead(&ctx.db_pool, &LeadFixture::assigned_to(rep.id)).await.unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            rep.id,
            "POST",
            "/api/v1/quotations",
            Some(json!({
                "lead_id": lead.id,
                "client_name": lead.client_name,
                "total_amount": 85000,
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = json_body(response).await;
    assert_eq!(body["status"], "draft");
    assert_eq!(body["created_by"], rep.id.to_string());
    assert_eq!(body["quotation_data"]["client_name"], lead.client_name);
    assert!(body["quotation_number"].as_str().unwrap().starts_with("QT-"));

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_negative_amount_is_rejected() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let rep = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            rep.id,
            "POST",
            "/api/v1/quotations",
            Some(json!({ "client_name": "Nisha", "total_amount": -10 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_submit_routes_approval_to_sales_head() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let head = insert_employee(&ctx.db_pool, &EmployeeFixture::sales_head()).await.unwrap();
    let rep = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let lead = insert_lead(&ctx.db_pool, &LeadFixture::assigned_to(rep.id)).await.unwrap();
    let quotation = insert_quotation(
        &ctx.db_pool,
        &lead,
        rep.id,
        Decimal::new(120_000, 0),
        QuotationStatus::Draft,
    )
    .await
    .unwrap();

    let uri = format!("/api/v1/quotations/{}/submit", quotation.id);
    let response = ctx
        .app()
        .oneshot(request_as(rep.id, "POST", &uri, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["quotation"]["status"], "pending_approval");
    assert_eq!(body["approval_task"]["task_type"], "quotation_approval");
    assert_eq!(body["approval_task"]["assigned_to_employee_id"], head.id.to_string());
    assert_eq!(body["assignment"]["confidence"], "high");

    let again = ctx
        .app()
        .oneshot(request_as(rep.id, "POST", &uri, None))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::BAD_REQUEST);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_payment_requires_approved_quotation() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let rep = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let lead = insert_lead(&ctx.db_pool, &LeadFixture::assigned_to(rep.id)).await.unwrap();
    let quotation = insert_quotation(
        &ctx.db_pool,
        &lead,
        rep.id,
        Decimal::new(60_000, 0),
        QuotationStatus::Draft,
    )
    .await
    .unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            rep.id,
            "POST",
            &format!("/api/v1/quotations/{}/payments", quotation.id),
            Some(json!({ "amount": 20000 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_unknown_quotation_number_is_not_found() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let rep = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(rep.id, "GET", "/api/v1/quotations/number/QT-1999-0001", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_failed_approver_assignment_leaves_quotation_submittable() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let rep = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let lead = insert_lead(&ctx.db_pool, &LeadFixture::assigned_to(rep.id)).await.unwrap();
    let quotation = insert_quotation(
        &ctx.db_pool,
        &lead,
        rep.id,
        Decimal::new(90_000, 0),
        QuotationStatus::Draft,
    )
    .await
    .unwrap();
    let uri = format!("/api/v1/quotations/{}/submit", quotation.id);

    let response = ctx
        .app()
        .oneshot(request_as(rep.id, "POST", &uri, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(quotation_status(&ctx.db_pool, quotation.id).await, "draft");
    assert_eq!(count_table_rows(&ctx.db_pool, "ai_tasks").await, 0);

    let head = insert_employee(&ctx.db_pool, &EmployeeFixture::sales_head()).await.unwrap();
    let retry = ctx
        .app()
        .oneshot(request_as(rep.id, "POST", &uri, None))
        .await
        .unwrap();
    assert_eq!(retry.status(), StatusCode::OK);

    let body = json_body(retry).await;
    assert_eq!(body["quotation"]["status"], "pending_approval");
    assert_eq!(body["approval_task"]["assigned_to_employee_id"], head.id.to_string());
    assert_eq!(count_notifications(&ctx.db_pool, head.id, "approval_needed").await, 1);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_approval_starts_followup_sequence() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let head = insert_employee(&ctx.db_pool, &EmployeeFixture::sales_head()).await.unwrap();
    let rep = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let lead = insert_lead(&ctx.db_pool, &LeadFixture::assigned_to(rep.id)).await.unwrap();
    let quotation = insert_quotation(
        &ctx.db_pool,
        &lead,
        rep.id,
        Decimal::new(85_000, 0),
        QuotationStatus::PendingApproval,
    )
    .await
    .unwrap();
    let approval = insert_quotation_task(&ctx.db_pool, &quotation, TaskType::QuotationApproval, head.id, json!({}))
        .await
        .unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            head.id,
            "POST",
            &format!("/api/v1/quotations/{}/decision", quotation.id),
            Some(json!({ "decision": "approve" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["quotation"]["status"], "approved");
    assert_eq!(body["approval"]["approver_id"], head.id.to_string());
    assert!(body["revision_task"].is_null());

    let followup = &body["followup_task"];
    assert_eq!(followup["task_type"], "post_approval_followup");
    assert_eq!(followup["assigned_to_employee_id"], rep.id.to_string());
    assert_eq!(followup["metadata"]["sequence_step"], 1);
    assert_eq!(followup["metadata"]["sequence_total_steps"], 5);
    assert_eq!(
        followup["task_title"],
        format!("Initial Follow-up Call - {}", quotation.quotation_number)
    );

    let approval_status: String = sqlx::query_scalar("SELECT status::text FROM ai_tasks WHERE id = $1")
        .bind(approval.id)
        .fetch_one(&ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(approval_status, "completed");
    assert_eq!(count_notifications(&ctx.db_pool, rep.id, "client_followup").await, 1);
    assert_eq!(count_notifications(&ctx.db_pool, rep.id, "quotation_approved").await, 1);

    let again = ctx
        .app()
        .oneshot(request_as(
            head.id,
            "POST",
            &format!("/api/v1/quotations/{}/decision", quotation.id),
            Some(json!({ "decision": "reject" })),
        ))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::BAD_REQUEST);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_rejection_hands_revision_back_to_lead_owner() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let head = insert_employee(&ctx.db_pool, &EmployeeFixture::sales_head()).await.unwrap();
    let rep = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let lead = insert_lead(&ctx.db_pool, &LeadFixture::assigned_to(rep.id)).await.unwrap();
    let quotation = insert_quotation(
        &ctx.db_pool,
        &lead,
        rep.id,
        Decimal::new(140_000, 0),
        QuotationStatus::PendingApproval,
    )
    .await
    .unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            head.id,
            "POST",
            &format!("/api/v1/quotations/{}/decision", quotation.id),
            Some(json!({ "decision": "reject", "comments": "Drone coverage is priced too low" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["quotation"]["status"], "rejected");
    assert_eq!(body["approval"]["comments"], "Drone coverage is priced too low");
    assert!(body["followup_task"].is_null());

    let revision = &body["revision_task"];
    assert_eq!(revision["task_type"], "quotation_revision");
    assert_eq!(revision["assigned_to_employee_id"], rep.id.to_string());
    assert_eq!(revision["metadata"]["rejection_reason"], "Drone coverage is priced too low");
    assert_eq!(count_notifications(&ctx.db_pool, rep.id, "quotation_rejected").await, 1);

    let reopened = ctx
        .app()
        .oneshot(request_as(
            rep.id,
            "POST",
            &format!("/api/v1/quotations/number/{}/prepare-revision", quotation.quotation_number),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(reopened.status(), StatusCode::OK);
    assert_eq!(
        json_body(reopened).await["edit_url"],
        format!("/sales/quotations/edit/{}", quotation.quotation_number)
    );
    assert_eq!(quotation_status(&ctx.db_pool, quotation.id).await, "revision_required");

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_approved_quotation_cannot_be_reopened_for_revision() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let rep = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let lead = insert_lead(&ctx.db_pool, &LeadFixture::assigned_to(rep.id)).await.unwrap();
    let quotation = insert_quotation(
        &ctx.db_pool,
        &lead,
        rep.id,
        Decimal::new(75_000, 0),
        QuotationStatus::Approved,
    )
    .await
    .unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            rep.id,
            "POST",
            &format!("/api/v1/quotations/number/{}/prepare-revision", quotation.quotation_number),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(quotation_status(&ctx.db_pool, quotation.id).await, "approved");

    let missing = ctx
        .app()
        .oneshot(request_as(
            rep.id,
            "POST",
            "/api/v1/quotations/number/QT-1999-0001/prepare-revision",
            None,
        ))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_payment_closes_payment_followups() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let rep = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let lead = insert_lead(&ctx.db_pool, &LeadFixture::assigned_to(rep.id)).await.unwrap();
    let quotation = insert_quotation(
        &ctx.db_pool,
        &lead,
        rep.id,
        Decimal::new(60_000, 0),
        QuotationStatus::Approved,
    )
    .await
    .unwrap();
    insert_quotation_task(&ctx.db_pool, &quotation, TaskType::PaymentFollowUp, rep.id, json!({}))
        .await
        .unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            rep.id,
            "POST",
            &format!("/api/v1/quotations/{}/payments", quotation.id),
            Some(json!({ "amount": 20000 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["tasks_completed"], 1);
    assert_eq!(body["quotation"]["quotation_data"]["last_payment_recorded_by"], rep.id.to_string());
    assert_eq!(body["quotation"]["status"], "approved");

    let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ai_tasks WHERE quotation_id = $1 AND status = 'pending'")
        .bind(quotation.id)
        .fetch_one(&ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(pending, 0);
    assert_eq!(count_notifications(&ctx.db_pool, rep.id, "payment_received").await, 1);
    assert_eq!(count_notifications(&ctx.db_pool, rep.id, "automation").await, 1);

    ctx.cleanup().await;
}

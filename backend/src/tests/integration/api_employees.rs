use axum::http::StatusCode;
use serde_json::json;
use serial_test::serial;
use tower::ServiceExt;

use crate::tests::{fixtures::*, helpers::*, TestContext};

#[tokio::test]
#[serial]
async fn test_create_and_search_employees() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let admin = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            admin.id,
            "POST",
            "/api/v1/employees",
            Some(json!({
                "employee_code": "EMP-0042",
                "first_name": "Kavya",
                "last_name": "Raman",
                "email": "kavya.raman@ooak.test",
                "department": "Post Production",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(json_body(response).await["status"], "active");

    let listed = ctx
        .app()
        .oneshot(request_as(admin.id, "GET", "/api/v1/employees?search=kavya", None))
        .await
        .unwrap();
    assert_eq!(listed.status(), StatusCode::OK);

    let body = json_body(listed).await;
    assert_eq!(body["meta"]["total"], 1);
    assert_eq!(body["data"][0]["employee_code"], "EMP-0042");

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_invalid_email_is_rejected() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let admin = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(
            admin.id,
            "POST",
            "/api/v1/employees",
            Some(json!({ "first_name": "Kavya", "email": "not-an-email" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_delete_rules() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let admin = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let owner = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    let idle = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    insert_lead(&ctx.db_pool, &LeadFixture::assigned_to(owner.id)).await.unwrap();

    let own = ctx
        .app()
        .oneshot(request_as(admin.id, "DELETE", &format!("/api/v1/employees/{}", admin.id), None))
        .await
        .unwrap();
    assert_eq!(own.status(), StatusCode::BAD_REQUEST);

    let referenced = ctx
        .app()
        .oneshot(request_as(admin.id, "DELETE", &format!("/api/v1/employees/{}", owner.id), None))
        .await
        .unwrap();
    assert_eq!(referenced.status(), StatusCode::CONFLICT);

    let deleted = ctx
        .app()
        .oneshot(request_as(admin.id, "DELETE", &format!("/api/v1/employees/{}", idle.id), None))
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let missing = ctx
        .app()
        .oneshot(request_as(admin.id, "DELETE", &format!("/api/v1/employees/{}", idle.id), None))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_inactive_employee_is_forbidden() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let employee = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    sqlx::query("UPDATE employees SET status = 'inactive' WHERE id = $1")
        .bind(employee.id)
        .execute(&ctx.db_pool)
        .await
        .unwrap();

    let response = ctx
        .app()
        .oneshot(request_as(employee.id, "GET", "/api/v1/employees/me", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_user_account_lifecycle() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let admin = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();

    let created = ctx
        .app()
        .oneshot(request_as(
            admin.id,
            "POST",
            "/api/v1/accounts",
            Some(json!({
                "employee_id": admin.id,
                "username": "studio.admin",
                "email": "studio.admin@ooak.test",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let account = json_body(created).await;
    let uri = format!("/api/v1/accounts/{}", account["id"].as_str().unwrap());

    let duplicate = ctx
        .app()
        .oneshot(request_as(
            admin.id,
            "POST",
            "/api/v1/accounts",
            Some(json!({ "username": "studio.admin", "email": "other@ooak.test" })),
        ))
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let deleted = ctx
        .app()
        .oneshot(request_as(admin.id, "DELETE", &uri, None))
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    assert_eq!(count_table_rows(&ctx.db_pool, "user_accounts").await, 0);

    ctx.cleanup().await;
}

use axum::http::StatusCode;
use serial_test::serial;
use tower::ServiceExt;

use crate::config::EventStreamConfig;
use crate::events::EventHub;
use crate::notifications::NotificationService;
use crate::tests::{fixtures::*, helpers::*, TestContext};

#[tokio::test]
#[serial]
async fn test_expired_notifications_are_hidden() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let employee = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    insert_notification(&ctx.db_pool, employee.id, "No expiry", None).await.unwrap();
    insert_notification(&ctx.db_pool, employee.id, "Expires tomorrow", Some(24)).await.unwrap();
    insert_notification(&ctx.db_pool, employee.id, "Expired", Some(-1)).await.unwrap();

    let listed = ctx
        .app()
        .oneshot(request_as(employee.id, "GET", "/api/v1/notifications", None))
        .await
        .unwrap();
    assert_eq!(listed.status(), StatusCode::OK);
    let body = json_body(listed).await;
    assert_eq!(body["meta"]["total"], 2);
    let titles: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|n| n["title"].as_str())
        .collect();
    assert!(!titles.contains(&"Expired"));

    let unread = ctx
        .app()
        .oneshot(request_as(employee.id, "GET", "/api/v1/notifications/unread-count", None))
        .await
        .unwrap();
    assert_eq!(json_body(unread).await["unread_count"], 2);

    let dashboard = ctx
        .app()
        .oneshot(request_as(employee.id, "GET", "/api/v1/dashboard", None))
        .await
        .unwrap();
    assert_eq!(json_body(dashboard).await["unread_notifications"], 2);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_cleanup_deletes_only_expired_notifications() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let employee = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    insert_notification(&ctx.db_pool, employee.id, "No expiry", None).await.unwrap();
    insert_notification(&ctx.db_pool, employee.id, "Expires tomorrow", Some(24)).await.unwrap();
    insert_notification(&ctx.db_pool, employee.id, "Expired", Some(-1)).await.unwrap();
    insert_notification(&ctx.db_pool, employee.id, "Long expired", Some(-72)).await.unwrap();

    let service = NotificationService::new(
        ctx.db_pool.clone(),
        EventHub::new(&EventStreamConfig::default()),
        None,
    );
    assert_eq!(service.cleanup_expired().await.unwrap(), 2);
    assert_eq!(service.cleanup_expired().await.unwrap(), 0);
    assert_eq!(count_table_rows(&ctx.db_pool, "notifications").await, 2);

    ctx.cleanup().await;
}

#[tokio::test]
#[serial]
async fn test_jobs_run_on_demand_and_are_logged() {
    let Some(ctx) = TestContext::try_new().await else { return };
    let employee = insert_employee(&ctx.db_pool, &EmployeeFixture::default()).await.unwrap();
    insert_notification(&ctx.db_pool, employee.id, "Expired", Some(-1)).await.unwrap();
    let app = ctx.app();

    let run = app
        .clone()
        .oneshot(request_as(employee.id, "POST", "/api/v1/jobs/notification_cleanup/run", None))
        .await
        .unwrap();
    assert_eq!(run.status(), StatusCode::OK);
    let body = json_body(run).await;
    assert_eq!(body["job"], "notification_cleanup");
    assert_eq!(body["items_processed"], 1);
    assert_eq!(count_table_rows(&ctx.db_pool, "notifications").await, 0);

    let unknown = app
        .clone()
        .oneshot(request_as(employee.id, "POST", "/api/v1/jobs/defragment/run", None))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let logs = app
        .oneshot(request_as(employee.id, "GET", "/api/v1/jobs/logs", None))
        .await
        .unwrap();
    assert_eq!(logs.status(), StatusCode::OK);
    let logs = json_body(logs).await;
    assert!(logs["jobs"].as_array().unwrap().iter().any(|j| j == "overdue_scan"));
    let executions = logs["executions"].as_array().unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0]["job_name"], "Notification Cleanup");
    assert_eq!(executions[0]["status"], "Completed");
    assert_eq!(executions[0]["items_processed"], 1);

    ctx.cleanup().await;
}

use axum::{
    http::{header, HeaderName, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod auth;
mod config;
mod database;
mod error;
mod events;
mod format;
mod handlers;
mod jobs;
mod notifications;
mod pagination;
mod validation;
mod workflows;

use config::Config;
use events::EventHub;
use jobs::JobRunner;
use notifications::NotificationService;
use workflows::{LeadTaskEngine, QuotationWorkflow, TaskService};


pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub events: EventHub,
    pub jobs: JobRunner,
    pub config: Config,
}

impl AppState {
    pub fn new(db_pool: sqlx::PgPool, config: Config) -> Self {
        let events = EventHub::new(&config.events);
        let notifications = NotificationService::new(
            db_pool.clone(),
            events.clone(),
            config.workflow.business_head_employee,
        );
        let jobs = JobRunner::new(db_pool.clone(), events.clone(), notifications, config.jobs.clone());
        Self {
            db_pool,
            events,
            jobs,
            config,
        }
    }

    pub fn tasks(&self) -> TaskService {
        TaskService::new(self.db_pool.clone(), self.events.clone(), self.config.workflow.clone())
    }

    pub fn notifications(&self) -> NotificationService {
        NotificationService::new(
            self.db_pool.clone(),
            self.events.clone(),
            self.config.workflow.business_head_employee,
        )
    }

    pub fn quotations(&self) -> QuotationWorkflow {
        QuotationWorkflow::new(self.tasks(), self.notifications())
    }

    pub fn lead_tasks(&self) -> LeadTaskEngine {
        LeadTaskEngine::new(self.tasks())
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(auth::EMPLOYEE_HEADER),
        ]);

    Router::new()
        .route("/", get(|| async { "OOAK Studio CRM API v0.1.0" }))
        .route("/health", get(handlers::health_check))
        .route("/api/v1/dashboard", get(handlers::dashboard_stats))
        .route("/api/v1/events", get(events::event_stream))
        .nest("/api/v1/leads", handlers::lead_routes())
        .nest("/api/v1/quotations", handlers::quotation_routes())
        .nest("/api/v1/tasks", handlers::task_routes())
        .nest("/api/v1/sequences", handlers::sequence_routes())
        .nest("/api/v1/employees", handlers::employee_routes())
        .nest("/api/v1/accounts", handlers::account_routes())
        .nest("/api/v1/menu", handlers::menu_permission_routes())
        .nest("/api/v1/notifications", notifications::notification_routes())
        .nest("/api/v1/jobs", handlers::job_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    if config.workflow.fallback_sales_employee.is_none() || config.workflow.fallback_approval_employee.is_none() {
        tracing::warn!("Fallback employees are not fully configured; unresolvable assignments will fail");
    }

    let app_state = Arc::new(AppState::new(db_pool, config.clone()));

    let mut scheduler = jobs::JobScheduler::new(app_state.jobs.clone(), config.events.heartbeat_interval).await?;
    scheduler.start().await?;

    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

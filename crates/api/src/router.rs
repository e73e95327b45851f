//! API router configuration

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    let namespaced = Router::new()
        // Workflows
        .route(
            "/workflows",
            post(handlers::create_workflow).get(handlers::list_workflows),
        )
        .route(
            "/workflows/:name",
            get(handlers::get_workflow).delete(handlers::delete_workflow),
        )
        // Triggers
        .route("/triggers", get(handlers::list_namespace_triggers))
        .route(
            "/workflows/:name/triggers",
            post(handlers::create_trigger).get(handlers::list_triggers),
        )
        .route(
            "/workflows/:name/triggers/:trigger",
            get(handlers::get_trigger)
                .put(handlers::update_trigger)
                .delete(handlers::delete_trigger),
        )
        // Jobs
        .route("/jobs", get(handlers::list_jobs))
        .route(
            "/jobs/:id",
            get(handlers::get_job).delete(handlers::delete_job),
        )
        .route("/jobs/:id/tasks", get(handlers::list_job_tasks));

    Router::new()
        .nest("/v1/namespaces/:ns", namespaced)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

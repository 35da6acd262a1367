use axum::{extract::State, Json};
use entity::email_task;

use crate::{
    auth::jwt::Claims,
    error::AppJsonResult,
    model::email_task::EmailTaskCtrl,
    workflow::service::WorkflowReport,
    ServerState,
};

/// # POST /workflow/run
///
/// Group the user's unprocessed emails and extract tasks from each group.
pub async fn run(
    claims: Claims,
    State(state): State<ServerState>,
) -> AppJsonResult<WorkflowReport> {
    let report = state.workflow_service.run_for_user(claims.sub).await?;
    tracing::info!("Workflow run for user {}: {:?}", claims.sub, report);
    Ok(Json(report))
}

/// # GET /workflow/tasks
pub async fn list_tasks(
    claims: Claims,
    State(state): State<ServerState>,
) -> AppJsonResult<Vec<email_task::Model>> {
    let tasks = EmailTaskCtrl::list_for_user(&state.conn, claims.sub).await?;
    Ok(Json(tasks))
}

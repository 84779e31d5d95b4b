//! HTTP surface over the branch lifecycle manager.
//!
//! `NotFound` and `Forbidden` map to client rejections; everything else is
//! logged with full context and reported generically.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::branch::{BranchError, BranchManager};

#[derive(Debug, Deserialize)]
pub struct CreateBranchRequest {
    pub branch_name: String,
    pub base_branch: String,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct BranchRequest {
    pub branch_name: String,
}

#[derive(Debug, Serialize)]
pub struct BranchResponse {
    pub branch_name: String,
    pub port: u16,
}

#[derive(Debug, Serialize)]
pub struct ApiMessage {
    pub message: String,
}

pub fn router(manager: Arc<BranchManager>) -> Router {
    Router::new()
        .route("/create-branch", post(create_branch))
        .route("/delete-branch", delete(delete_branch))
        .route("/list-branches", get(list_branches))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

async fn create_branch(
    State(manager): State<Arc<BranchManager>>,
    Json(request): Json<CreateBranchRequest>,
) -> Result<Json<BranchResponse>, ApiError> {
    let branch = manager
        .create_branch(&request.branch_name, &request.base_branch, request.port)
        .await?;

    Ok(Json(BranchResponse { branch_name: branch.branch_name, port: branch.port }))
}

async fn delete_branch(
    State(manager): State<Arc<BranchManager>>,
    Json(request): Json<BranchRequest>,
) -> Result<Json<ApiMessage>, ApiError> {
    manager.delete_branch(&request.branch_name).await?;

    Ok(Json(ApiMessage { message: format!("branch '{}' deleted", request.branch_name) }))
}

async fn list_branches(
    State(manager): State<Arc<BranchManager>>,
) -> Result<Json<Vec<BranchResponse>>, ApiError> {
    let branches = manager.list_branches().await?;

    Ok(Json(
        branches
            .into_iter()
            .map(|branch| BranchResponse { branch_name: branch.branch_name, port: branch.port })
            .collect(),
    ))
}

struct ApiError(BranchError);

impl From<BranchError> for ApiError {
    fn from(err: BranchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            BranchError::NotFound(name) => {
                (StatusCode::NOT_FOUND, format!("branch '{name}' not found"))
            }
            BranchError::Forbidden(name) => {
                (StatusCode::FORBIDDEN, format!("branch '{name}' is protected"))
            }
            err => {
                error!(error = ?err, "branch operation failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(ApiMessage { message })).into_response()
    }
}

//! HTTP handlers for the current user and admin user management.

use axum::{extract::State, response::Response};
use serde::Deserialize;

use super::{Accounts, CurrentUser};
use crate::api::{DataResponse, JsonBody, PathParam};
use crate::error::AppError;
use crate::handler::AppState;
use crate::model::Role;
use crate::success;

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: Option<String>,
}

pub async fn me(user: CurrentUser) -> Response {
    success(DataResponse { data: user })
}

pub async fn list_users(State(state): State<AppState>, user: CurrentUser) -> Result<Response, AppError> {
    user.require_admin()?;

    let users = Accounts::new(&state.db)
        .list_users()
        .await
        .map_err(|e| AppError::internal("Failed to list users", e))?;

    Ok(success(DataResponse { data: users }))
}

pub async fn update_user_role(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParam(id): PathParam<i32>,
    JsonBody(payload): JsonBody<UpdateRoleRequest>,
) -> Result<Response, AppError> {
    user.require_admin()?;
    if user.id == id {
        return Err(AppError::Validation("You cannot change your own role".to_string()));
    }

    let role = payload
        .role
        .as_deref()
        .and_then(|r| r.parse::<Role>().ok())
        .ok_or_else(|| AppError::Validation("Role must be MEMBER, LIBRARIAN or ADMIN".to_string()))?;

    let accounts = Accounts::new(&state.db);
    let target = accounts
        .get_user(id)
        .await
        .map_err(|e| AppError::internal("Failed to load user", e))?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    // Sessions of configured admin emails are promoted back to ADMIN on every request.
    if role != Role::Admin && state.auth.is_admin_email(&target.email) {
        return Err(AppError::Validation(
            "This user is a configured admin; remove them from auth.admin_emails first".to_string(),
        ));
    }

    let updated = accounts
        .update_role(id, role)
        .await
        .map_err(|e| AppError::internal("Failed to update user role", e))?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    tracing::info!(admin_id = user.id, user_id = id, role = role.as_str(), "user role changed");
    Ok(success(DataResponse { data: updated }))
}

pub async fn delete_user(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParam(id): PathParam<i32>,
) -> Result<Response, AppError> {
    user.require_admin()?;
    if user.id == id {
        return Err(AppError::Validation("You cannot remove your own account".to_string()));
    }

    let deleted = Accounts::new(&state.db)
        .delete_user(id)
        .await
        .map_err(|e| AppError::internal("Failed to remove user", e))?;
    if !deleted {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    tracing::info!(admin_id = user.id, user_id = id, "user removed");
    Ok(success(DataResponse {
        data: serde_json::json!({ "deleted": true }),
    }))
}

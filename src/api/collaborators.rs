//! Collaborator API endpoints.
//!
//! Per-user lifecycle on a document: absent, pending after a join request,
//! accepted (editor) once an owner or admin approves, optionally promoted to
//! admin, and absent again after removal or self-exit.

use axum::extract::{Path, State};
use axum::Json;

use super::{error, success, ApiResult};
use crate::auth::Viewer;
use crate::models::{Collaborator, JoinOutcome, JoinRequest, UpdateCollaboratorRequest};
use crate::AppState;

/// GET /api/documents/:id/collaborators - List collaborators in join order.
pub async fn list_collaborators(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> ApiResult<Vec<Collaborator>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let identity = match viewer.require() {
        Ok(identity) => identity,
        Err(e) => return error(e, revision_id),
    };

    match state.repo.list_collaborators(&id, &identity.user_id).await {
        Ok(collaborators) => success(collaborators, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/documents/:id/collaborators - Request to join a shared document.
///
/// Body is optional; name and avatar default to the identity's profile.
pub async fn join_document(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
    request: Option<Json<JoinRequest>>,
) -> ApiResult<JoinOutcome> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let identity = match viewer.require() {
        Ok(identity) => identity,
        Err(e) => return error(e, revision_id),
    };

    let request = request.map(|Json(r)| r).unwrap_or_default();
    let request = JoinRequest {
        full_name: request.full_name.or_else(|| identity.name.clone()),
        image_url: request.image_url.or_else(|| identity.image_url.clone()),
    };

    match state
        .repo
        .join_document(&id, &identity.user_id, &request)
        .await
    {
        Ok(outcome) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(outcome, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PATCH /api/documents/:id/collaborators/:user_id - Accept, promote or demote.
pub async fn update_collaborator(
    State(state): State<AppState>,
    viewer: Viewer,
    Path((id, target_user_id)): Path<(String, String)>,
    Json(request): Json<UpdateCollaboratorRequest>,
) -> ApiResult<Collaborator> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let identity = match viewer.require() {
        Ok(identity) => identity,
        Err(e) => return error(e, revision_id),
    };

    match state
        .repo
        .update_collaborator(&id, &identity.user_id, &target_user_id, &request)
        .await
    {
        Ok(collaborator) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(collaborator, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/documents/:id/collaborators/:user_id - Remove a collaborator or leave.
///
/// Returns the remaining list; removing an absent entry is not an error.
pub async fn remove_collaborator(
    State(state): State<AppState>,
    viewer: Viewer,
    Path((id, target_user_id)): Path<(String, String)>,
) -> ApiResult<Vec<Collaborator>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let identity = match viewer.require() {
        Ok(identity) => identity,
        Err(e) => return error(e, revision_id),
    };

    match state
        .repo
        .remove_collaborator(&id, &identity.user_id, &target_user_id)
        .await
    {
        Ok(collaborators) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(collaborators, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

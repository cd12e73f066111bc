//! Document API endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use super::{error, success, ApiResult};
use crate::access;
use crate::auth::Viewer;
use crate::db::Page;
use crate::errors::AppError;
use crate::models::{CreateDocumentRequest, Document, UpdateDocumentRequest};
use crate::AppState;

/// Maximum number of search results allowed.
const MAX_SEARCH_LIMIT: usize = 100;

/// Search query parameters.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    /// Full-text query; when absent every unarchived owned document is listed.
    #[serde(default)]
    pub q: Option<String>,
    /// Maximum number of results (default: 20).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

/// Sidebar query parameters.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidebarQuery {
    #[serde(default)]
    pub parent_document: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// GET /api/documents - Every document the caller owns or collaborates on.
pub async fn list_documents(
    State(state): State<AppState>,
    viewer: Viewer,
) -> ApiResult<Vec<Document>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let identity = match viewer.require() {
        Ok(identity) => identity,
        Err(e) => return error(e, revision_id),
    };

    match state.repo.list_accessible_documents(&identity.user_id).await {
        Ok(documents) => success(documents, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/documents/:id - Get a single document.
///
/// Published, unarchived documents are public. Otherwise the caller must be
/// the owner or an accepted collaborator; anyone else gets `data: null`.
pub async fn get_document(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> ApiResult<Option<Document>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let document = match state.repo.get_document(&id).await {
        Ok(Some(document)) => document,
        Ok(None) => return error(AppError::document_not_found(&id), revision_id),
        Err(e) => return error(e, revision_id),
    };

    if document.is_published && !document.is_archived {
        return success(Some(document), revision_id);
    }
    if let Err(e) = viewer.require() {
        return error(e, revision_id);
    }

    if access::can_read(&document, viewer.user_id()) {
        success(Some(document), revision_id)
    } else {
        success(None, revision_id)
    }
}

/// GET /api/documents/search - Caller's unarchived documents, optionally full-text ranked.
///
/// Paging applies after archived and stale hits are dropped.
pub async fn search_documents(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(params): Query<SearchQuery>,
) -> ApiResult<Vec<Document>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let identity = match viewer.require() {
        Ok(identity) => identity,
        Err(e) => return error(e, revision_id),
    };

    if params.limit == 0 {
        return error(
            AppError::Validation("limit must be positive".to_string()),
            revision_id,
        );
    }
    let limit = params.limit.min(MAX_SEARCH_LIMIT);

    let query = params.q.as_deref().map(str::trim).unwrap_or_default();
    if query.is_empty() {
        let page = Page {
            limit: Some(limit as i64),
            offset: i64::try_from(params.offset).unwrap_or(i64::MAX),
        };
        return match state
            .repo
            .list_owned_documents(&identity.user_id, false, page)
            .await
        {
            Ok(documents) => success(documents, revision_id),
            Err(e) => error(e, revision_id),
        };
    }

    let hits = match state.search.search_all(&identity.user_id, query) {
        Ok(hits) => hits,
        Err(e) => return error(e, revision_id),
    };
    tracing::debug!(
        query,
        hits = hits.len(),
        top_score = hits.first().map(|h| h.score),
        "Search executed"
    );

    let ids: Vec<String> = hits.into_iter().map(|h| h.document_id).collect();
    let mut found = match state
        .repo
        .owned_documents_by_ids(&identity.user_id, &ids)
        .await
    {
        Ok(found) => found,
        Err(e) => return error(e, revision_id),
    };

    // Keep ranking order; archived or stale hits drop out before paging.
    let documents = ids
        .iter()
        .filter_map(|id| found.remove(id))
        .skip(params.offset)
        .take(limit)
        .collect();
    success(documents, revision_id)
}

/// GET /api/documents/sidebar - Unarchived children of a parent, or roots.
pub async fn sidebar_documents(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(params): Query<SidebarQuery>,
) -> ApiResult<Vec<Document>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let identity = match viewer.require() {
        Ok(identity) => identity,
        Err(e) => return error(e, revision_id),
    };

    if params.limit.is_some_and(|l| l <= 0) || params.offset.is_some_and(|o| o < 0) {
        return error(
            AppError::Validation("limit must be positive and offset non-negative".to_string()),
            revision_id,
        );
    }
    let page = Page {
        limit: params.limit,
        offset: params.offset.unwrap_or(0),
    };

    match state
        .repo
        .list_sidebar(&identity.user_id, params.parent_document.as_deref(), page)
        .await
    {
        Ok(documents) => success(documents, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/documents/trash - Caller's archived documents.
pub async fn trash_documents(
    State(state): State<AppState>,
    viewer: Viewer,
) -> ApiResult<Vec<Document>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let identity = match viewer.require() {
        Ok(identity) => identity,
        Err(e) => return error(e, revision_id),
    };

    match state
        .repo
        .list_owned_documents(&identity.user_id, true, Page::default())
        .await
    {
        Ok(documents) => success(documents, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/documents - Create a new document.
pub async fn create_document(
    State(state): State<AppState>,
    viewer: Viewer,
    Json(request): Json<CreateDocumentRequest>,
) -> ApiResult<Document> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let identity = match viewer.require() {
        Ok(identity) => identity,
        Err(e) => return error(e, revision_id),
    };

    match state.repo.create_document(&identity.user_id, &request).await {
        Ok(document) => {
            if let Err(e) = state.search.index_document(&document).await {
                tracing::warn!("Failed to index document: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(document, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PATCH /api/documents/:id - Partially update a document.
pub async fn update_document(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
    Json(request): Json<UpdateDocumentRequest>,
) -> ApiResult<Document> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let identity = match viewer.require() {
        Ok(identity) => identity,
        Err(e) => return error(e, revision_id),
    };

    if request.is_empty() {
        return error(
            AppError::Validation("No changes provided".to_string()),
            revision_id,
        );
    }

    match state
        .repo
        .update_document(&id, &identity.user_id, &request)
        .await
    {
        Ok(document) => {
            if request.title.is_some() || request.content.is_some() {
                if let Err(e) = state.search.index_document(&document).await {
                    tracing::warn!("Failed to re-index document: {}", e);
                }
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(document, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/documents/:id/cover-image - Remove the cover image.
pub async fn remove_cover_image(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> ApiResult<Document> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let identity = match viewer.require() {
        Ok(identity) => identity,
        Err(e) => return error(e, revision_id),
    };

    match state.repo.remove_cover_image(&id, &identity.user_id).await {
        Ok(document) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(document, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/documents/:id/icon - Remove the icon.
pub async fn remove_icon(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> ApiResult<Document> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let identity = match viewer.require() {
        Ok(identity) => identity,
        Err(e) => return error(e, revision_id),
    };

    match state.repo.remove_icon(&id, &identity.user_id).await {
        Ok(document) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(document, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/documents/:id/archive - Archive a document and its subtree.
pub async fn archive_document(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> ApiResult<Document> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let identity = match viewer.require() {
        Ok(identity) => identity,
        Err(e) => return error(e, revision_id),
    };

    match state.repo.archive_document(&id, &identity.user_id).await {
        Ok(result) => {
            tracing::debug!(
                document_id = %id,
                descendants = ?result.descendant_ids,
                "Archive cascaded"
            );
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(result.document, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/documents/:id/restore - Restore a document and its subtree.
pub async fn restore_document(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> ApiResult<Document> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let identity = match viewer.require() {
        Ok(identity) => identity,
        Err(e) => return error(e, revision_id),
    };

    match state.repo.restore_document(&id, &identity.user_id).await {
        Ok(result) => {
            tracing::debug!(
                document_id = %id,
                descendants = ?result.descendant_ids,
                "Restore cascaded"
            );
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(result.document, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/documents/:id - Permanently delete a document and its subtree.
///
/// Returns the ids that were deleted.
pub async fn delete_document(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> ApiResult<Vec<String>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let identity = match viewer.require() {
        Ok(identity) => identity,
        Err(e) => return error(e, revision_id),
    };

    match state.repo.delete_document(&id, &identity.user_id).await {
        Ok(deleted) => {
            if let Err(e) = state.search.remove_documents(&deleted).await {
                tracing::warn!("Failed to remove documents from index: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(deleted, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

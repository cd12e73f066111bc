//! Database repository for documents and collaborator lists.
//!
//! Every mutation runs in one transaction that re-reads the document, checks
//! the caller's [`Role`], writes, and bumps the revision counter. Mutations
//! are serialized through a process-wide write gate: SQLite allows a single
//! writer, and a deferred transaction that reads before writing would
//! otherwise fail with a stale snapshot under WAL.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tokio::sync::Mutex;

use crate::access::{self, Role};
use crate::errors::AppError;
use crate::models::{
    normalize_title, Collaborator, CreateDocumentRequest, Document, JoinOutcome, JoinRequest,
    JoinStatus, RevisionInfo, UpdateCollaboratorRequest, UpdateDocumentRequest,
};

const DOCUMENT_COLUMNS: &str = "id, title, user_id, is_archived, is_published, parent_document, \
     content, cover_image, icon, creation_time, updated_at, version";

/// Keeps `IN (...)` lists well under SQLite's bound-parameter limit.
const ID_CHUNK: usize = 500;

/// Which cascading flag change to apply to a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveState {
    Archived,
    Restored,
}

/// Outcome of an archive or restore: the root document after the change and
/// every descendant id that was touched.
#[derive(Debug, Clone)]
pub struct CascadeResult {
    pub document: Document,
    pub descendant_ids: Vec<String>,
}

/// Optional paging for listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Page {
    pub limit: Option<i64>,
    pub offset: i64,
}

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    /// Get revision info.
    pub async fn get_revision_info(&self) -> Result<RevisionInfo, AppError> {
        let row = sqlx::query("SELECT revision_id, generated_at FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(RevisionInfo {
            revision_id: row.get("revision_id"),
            generated_at: row.get("generated_at"),
        })
    }

    // ==================== DOCUMENT QUERIES ====================

    /// Get a document by ID, collaborators included.
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>, AppError> {
        let mut conn = self.pool.acquire().await?;
        load_document(&mut conn, id).await
    }

    /// Every document in the store. Used to seed the search index.
    pub async fn list_all_documents(&self) -> Result<Vec<Document>, AppError> {
        let sql = format!("SELECT {} FROM documents", DOCUMENT_COLUMNS);
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
        let mut docs: Vec<Document> = rows.iter().map(document_from_row).collect();
        attach_collaborators(&mut conn, &mut docs).await?;
        Ok(docs)
    }

    /// Documents the user owns or has been accepted on, archived included.
    pub async fn list_accessible_documents(
        &self,
        user_id: &str,
    ) -> Result<Vec<Document>, AppError> {
        let sql = format!(
            "SELECT {} FROM documents
             WHERE user_id = ?1
                OR id IN (SELECT document_id FROM collaborators
                          WHERE user_id = ?1 AND collab_accepted = 1)
             ORDER BY creation_time DESC, rowid DESC",
            DOCUMENT_COLUMNS
        );
        self.fetch_documents(sqlx::query(&sql).bind(user_id)).await
    }

    /// Documents owned by the user with the given archive flag, newest first.
    pub async fn list_owned_documents(
        &self,
        user_id: &str,
        archived: bool,
        page: Page,
    ) -> Result<Vec<Document>, AppError> {
        let sql = format!(
            "SELECT {} FROM documents
             WHERE user_id = ? AND is_archived = ?
             ORDER BY creation_time DESC, rowid DESC
             LIMIT ? OFFSET ?",
            DOCUMENT_COLUMNS
        );
        self.fetch_documents(
            sqlx::query(&sql)
                .bind(user_id)
                .bind(archived as i32)
                .bind(page.limit.unwrap_or(-1))
                .bind(page.offset.max(0)),
        )
        .await
    }

    /// Unarchived children of `parent` (roots when `None`) owned by the user.
    pub async fn list_sidebar(
        &self,
        user_id: &str,
        parent: Option<&str>,
        page: Page,
    ) -> Result<Vec<Document>, AppError> {
        let sql = format!(
            "SELECT {} FROM documents
             WHERE user_id = ? AND parent_document IS ? AND is_archived = 0
             ORDER BY creation_time DESC, rowid DESC
             LIMIT ? OFFSET ?",
            DOCUMENT_COLUMNS
        );
        self.fetch_documents(
            sqlx::query(&sql)
                .bind(user_id)
                .bind(parent)
                .bind(page.limit.unwrap_or(-1))
                .bind(page.offset.max(0)),
        )
        .await
    }

    /// Unarchived documents owned by the user among `ids`, keyed by id.
    pub async fn owned_documents_by_ids(
        &self,
        user_id: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Document>, AppError> {
        let mut conn = self.pool.acquire().await?;
        let mut docs = Vec::new();
        for chunk in ids.chunks(ID_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "SELECT {} FROM documents WHERE is_archived = 0 AND user_id = ",
                DOCUMENT_COLUMNS
            ));
            qb.push_bind(user_id).push(" AND id IN (");
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");
            let rows = qb.build().fetch_all(&mut *conn).await?;
            docs.extend(rows.iter().map(document_from_row));
        }
        attach_collaborators(&mut conn, &mut docs).await?;
        Ok(docs.into_iter().map(|d| (d.id.clone(), d)).collect())
    }

    async fn fetch_documents<'q>(
        &self,
        query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    ) -> Result<Vec<Document>, AppError> {
        let mut conn = self.pool.acquire().await?;
        let rows = query.fetch_all(&mut *conn).await?;
        let mut docs: Vec<Document> = rows.iter().map(document_from_row).collect();
        attach_collaborators(&mut conn, &mut docs).await?;
        Ok(docs)
    }

    // ==================== DOCUMENT MUTATIONS ====================

    /// Create a new document owned by `user_id`.
    pub async fn create_document(
        &self,
        user_id: &str,
        request: &CreateDocumentRequest,
    ) -> Result<Document, AppError> {
        let title = normalize_title(&request.title).map_err(AppError::Validation)?;

        let _write = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        if let Some(parent_id) = &request.parent_document {
            let parent = load_document(&mut tx, parent_id)
                .await?
                .ok_or_else(|| AppError::document_not_found(parent_id))?;
            if parent.user_id != user_id {
                return Err(AppError::forbidden("add pages under this document"));
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = now();

        sqlx::query(
            "INSERT INTO documents (id, title, user_id, is_archived, is_published, parent_document, creation_time, updated_at, version)
             VALUES (?, ?, ?, 0, 0, ?, ?, ?, 1)",
        )
        .bind(&id)
        .bind(&title)
        .bind(user_id)
        .bind(&request.parent_document)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(document_id = %id, user_id, "Document created");

        Ok(Document {
            id,
            title,
            user_id: user_id.to_string(),
            is_archived: false,
            is_published: false,
            parent_document: request.parent_document.clone(),
            content: None,
            cover_image: None,
            icon: None,
            collaborators: Vec::new(),
            creation_time: now.clone(),
            updated_at: now,
            version: 1,
        })
    }

    /// Patch a document. Editors may change content fields; publication
    /// additionally needs owner or admin.
    pub async fn update_document(
        &self,
        id: &str,
        user_id: &str,
        request: &UpdateDocumentRequest,
    ) -> Result<Document, AppError> {
        let _write = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        let existing = load_document(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::document_not_found(id))?;

        let role = Role::of(&existing, user_id);
        if !role.can_edit() {
            return Err(AppError::forbidden("edit this document"));
        }
        // Clearing cover or icon is owner-only, same as the dedicated routes.
        if request.cover_image == Some(None) && role != Role::Owner {
            return Err(AppError::forbidden("remove the cover image"));
        }
        if request.icon == Some(None) && role != Role::Owner {
            return Err(AppError::forbidden("remove the icon"));
        }
        if request
            .is_published
            .is_some_and(|published| published != existing.is_published)
            && !role.can_publish()
        {
            return Err(AppError::forbidden("change publication of this document"));
        }

        // Check version for optimistic concurrency
        if let Some(expected) = request.expected_version {
            if existing.version != expected {
                return Err(AppError::Conflict {
                    message: format!(
                        "Version mismatch: expected {}, current {}",
                        expected, existing.version
                    ),
                    current_version: existing.version,
                });
            }
        }

        let title = match &request.title {
            Some(t) => normalize_title(t).map_err(AppError::Validation)?,
            None => existing.title.clone(),
        };
        let content = request.content.clone().or(existing.content.clone());
        let cover_image = match &request.cover_image {
            Some(value) => value.clone(),
            None => existing.cover_image.clone(),
        };
        let icon = match &request.icon {
            Some(value) => value.clone(),
            None => existing.icon.clone(),
        };
        let is_published = request.is_published.unwrap_or(existing.is_published);

        let now = now();
        let new_version = existing.version + 1;

        let result = sqlx::query(
            "UPDATE documents SET title = ?, content = ?, cover_image = ?, icon = ?, is_published = ?, updated_at = ?, version = ?
             WHERE id = ? AND version = ?",
        )
        .bind(&title)
        .bind(&content)
        .bind(&cover_image)
        .bind(&icon)
        .bind(is_published as i32)
        .bind(&now)
        .bind(new_version)
        .bind(id)
        .bind(existing.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict {
                message: "Concurrent modification detected".to_string(),
                current_version: existing.version,
            });
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(document_id = %id, user_id, version = new_version, "Document updated");

        Ok(Document {
            title,
            content,
            cover_image,
            icon,
            is_published,
            updated_at: now,
            version: new_version,
            ..existing
        })
    }

    /// Clear the cover image. Owner only.
    pub async fn remove_cover_image(&self, id: &str, user_id: &str) -> Result<Document, AppError> {
        self.clear_field(id, user_id, "cover_image", "remove the cover image")
            .await
    }

    /// Clear the icon. Owner only.
    pub async fn remove_icon(&self, id: &str, user_id: &str) -> Result<Document, AppError> {
        self.clear_field(id, user_id, "icon", "remove the icon").await
    }

    async fn clear_field(
        &self,
        id: &str,
        user_id: &str,
        column: &'static str,
        action: &str,
    ) -> Result<Document, AppError> {
        let _write = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;
        let existing = require_owner(&mut tx, id, user_id, action).await?;

        let sql = format!(
            "UPDATE documents SET {} = NULL, updated_at = ?, version = version + 1 WHERE id = ?",
            column
        );
        sqlx::query(&sql)
            .bind(now())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        bump_revision(&mut tx).await?;
        let updated = load_document(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::document_not_found(id))?;
        tx.commit().await?;

        tracing::info!(document_id = %existing.id, field = column, "Document field cleared");
        Ok(updated)
    }

    /// Archive a document and every descendant. Owner only.
    pub async fn archive_document(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<CascadeResult, AppError> {
        self.cascade_archive_flag(id, user_id, ArchiveState::Archived)
            .await
    }

    /// Restore a document and every descendant. Owner only.
    ///
    /// When the parent is still archived the document is detached and
    /// becomes a root.
    pub async fn restore_document(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<CascadeResult, AppError> {
        self.cascade_archive_flag(id, user_id, ArchiveState::Restored)
            .await
    }

    async fn cascade_archive_flag(
        &self,
        id: &str,
        user_id: &str,
        state: ArchiveState,
    ) -> Result<CascadeResult, AppError> {
        let action = match state {
            ArchiveState::Archived => "archive this document",
            ArchiveState::Restored => "restore this document",
        };
        let archived = state == ArchiveState::Archived;

        let _write = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;
        let existing = require_owner(&mut tx, id, user_id, action).await?;

        let mut detach = false;
        if state == ArchiveState::Restored {
            if let Some(parent_id) = &existing.parent_document {
                let parent_archived: Option<i32> =
                    sqlx::query_scalar("SELECT is_archived FROM documents WHERE id = ?")
                        .bind(parent_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                // A missing parent counts as archived.
                detach = parent_archived.map_or(true, |a| a != 0);
            }
        }

        let now = now();
        let detach_sql = if detach {
            ", parent_document = NULL"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE documents SET is_archived = ?, updated_at = ?, version = version + 1{} WHERE id = ?",
            detach_sql
        );
        sqlx::query(&sql)
            .bind(archived as i32)
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let descendant_ids = descendant_ids(&mut tx, user_id, id).await?;
        for chunk in descendant_ids.chunks(ID_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE documents SET is_archived = ");
            qb.push_bind(archived as i32)
                .push(", updated_at = ")
                .push_bind(&now)
                .push(", version = version + 1 WHERE id IN (");
            let mut separated = qb.separated(", ");
            for child in chunk {
                separated.push_bind(child);
            }
            separated.push_unseparated(")");
            qb.build().execute(&mut *tx).await?;
        }

        bump_revision(&mut tx).await?;
        let document = load_document(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::document_not_found(id))?;
        tx.commit().await?;

        tracing::info!(
            document_id = %id,
            archived,
            detached = detach,
            descendants = descendant_ids.len(),
            "Archive flag cascaded"
        );

        Ok(CascadeResult {
            document,
            descendant_ids,
        })
    }

    /// Permanently delete a document and its subtree. Owner only.
    ///
    /// Returns every deleted id, root first.
    pub async fn delete_document(&self, id: &str, user_id: &str) -> Result<Vec<String>, AppError> {
        let _write = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;
        require_owner(&mut tx, id, user_id, "delete this document").await?;

        let mut ids = vec![id.to_string()];
        ids.extend(descendant_ids(&mut tx, user_id, id).await?);

        for chunk in ids.chunks(ID_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM documents WHERE id IN (");
            let mut separated = qb.separated(", ");
            for doc_id in chunk {
                separated.push_bind(doc_id);
            }
            separated.push_unseparated(")");
            qb.build().execute(&mut *tx).await?;
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(document_id = %id, deleted = ids.len(), "Document subtree deleted");
        Ok(ids)
    }

    // ==================== COLLABORATOR OPERATIONS ====================

    /// Collaborator list of a document. Owner or listed users only.
    pub async fn list_collaborators(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Vec<Collaborator>, AppError> {
        let doc = self
            .get_document(id)
            .await?
            .ok_or_else(|| AppError::document_not_found(id))?;

        if !Role::of(&doc, user_id).is_listed_or_owner() {
            return Err(AppError::forbidden("view collaborators of this document"));
        }
        Ok(doc.collaborators)
    }

    /// Ask to join a document. Appends a pending entry for `user_id` unless
    /// the caller owns the document or is already listed.
    pub async fn join_document(
        &self,
        id: &str,
        user_id: &str,
        request: &JoinRequest,
    ) -> Result<JoinOutcome, AppError> {
        let _write = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        let doc = load_document(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::document_not_found(id))?;

        if doc.user_id == user_id {
            return Ok(JoinOutcome {
                status: JoinStatus::Owner,
                collaborator: None,
            });
        }
        if let Some(existing) = doc.collaborator(user_id) {
            return Ok(JoinOutcome {
                status: JoinStatus::Existing,
                collaborator: Some(existing.clone()),
            });
        }

        let result = sqlx::query(
            "INSERT INTO collaborators (document_id, user_id, full_name, image_url, collab_accepted, admin)
             VALUES (?, ?, ?, ?, 0, 0)
             ON CONFLICT (document_id, user_id) DO NOTHING",
        )
        .bind(id)
        .bind(user_id)
        .bind(&request.full_name)
        .bind(&request.image_url)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Lost a race against a concurrent join for the same user.
            let existing = load_collaborator(&mut tx, id, user_id)
                .await?
                .ok_or_else(|| AppError::Internal("Collaborator vanished during join".into()))?;
            return Ok(JoinOutcome {
                status: JoinStatus::Existing,
                collaborator: Some(existing),
            });
        }

        touch_document(&mut tx, id).await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(document_id = %id, user_id, "Collaboration requested");

        Ok(JoinOutcome {
            status: JoinStatus::Requested,
            collaborator: Some(Collaborator {
                user_id: user_id.to_string(),
                full_name: request.full_name.clone(),
                image_url: request.image_url.clone(),
                collab_accepted: false,
                admin: false,
            }),
        })
    }

    /// Accept, promote or demote a collaborator. Owner or admin only.
    pub async fn update_collaborator(
        &self,
        id: &str,
        user_id: &str,
        target_user_id: &str,
        request: &UpdateCollaboratorRequest,
    ) -> Result<Collaborator, AppError> {
        let _write = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        let doc = load_document(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::document_not_found(id))?;

        if !Role::of(&doc, user_id).can_manage_collaborators() {
            return Err(AppError::forbidden("manage collaborators of this document"));
        }

        let existing = doc.collaborator(target_user_id).ok_or_else(|| {
            AppError::NotFound(format!("Collaborator {} not found", target_user_id))
        })?;

        let updated = Collaborator {
            collab_accepted: request.collab_accepted.unwrap_or(existing.collab_accepted),
            admin: request.admin.unwrap_or(existing.admin),
            ..existing.clone()
        };

        if updated != *existing {
            sqlx::query(
                "UPDATE collaborators SET collab_accepted = ?, admin = ? WHERE document_id = ? AND user_id = ?",
            )
            .bind(updated.collab_accepted as i32)
            .bind(updated.admin as i32)
            .bind(id)
            .bind(target_user_id)
            .execute(&mut *tx)
            .await?;

            touch_document(&mut tx, id).await?;
            bump_revision(&mut tx).await?;
            tx.commit().await?;

            tracing::info!(
                document_id = %id,
                collaborator = target_user_id,
                accepted = updated.collab_accepted,
                admin = updated.admin,
                "Collaborator updated"
            );
        }

        Ok(updated)
    }

    /// Remove a collaborator. Removing an absent entry leaves the list as is.
    pub async fn remove_collaborator(
        &self,
        id: &str,
        user_id: &str,
        target_user_id: &str,
    ) -> Result<Vec<Collaborator>, AppError> {
        let _write = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        let doc = load_document(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::document_not_found(id))?;

        // A repeated self-exit: the caller no longer sees the list.
        if user_id == target_user_id
            && doc.user_id != user_id
            && doc.collaborator(user_id).is_none()
        {
            return Ok(Vec::new());
        }

        if !access::can_remove_collaborator(&doc, user_id, target_user_id) {
            return Err(AppError::forbidden("remove this collaborator"));
        }

        let result = sqlx::query("DELETE FROM collaborators WHERE document_id = ? AND user_id = ?")
            .bind(id)
            .bind(target_user_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(doc.collaborators);
        }

        touch_document(&mut tx, id).await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(document_id = %id, collaborator = target_user_id, "Collaborator removed");

        Ok(doc
            .collaborators
            .into_iter()
            .filter(|c| c.user_id != target_user_id)
            .collect())
    }
}

// ==================== HELPERS ====================

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

async fn bump_revision(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
        .bind(now())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Collaborator changes version the owning document too.
async fn touch_document(conn: &mut SqliteConnection, id: &str) -> Result<(), AppError> {
    sqlx::query("UPDATE documents SET updated_at = ?, version = version + 1 WHERE id = ?")
        .bind(now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn load_document(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Document>, AppError> {
    let sql = format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut docs = vec![document_from_row(&row)];
    attach_collaborators(conn, &mut docs).await?;
    Ok(docs.pop())
}

async fn require_owner(
    conn: &mut SqliteConnection,
    id: &str,
    user_id: &str,
    action: &str,
) -> Result<Document, AppError> {
    let doc = load_document(conn, id)
        .await?
        .ok_or_else(|| AppError::document_not_found(id))?;
    if Role::of(&doc, user_id) != Role::Owner {
        return Err(AppError::forbidden(action));
    }
    Ok(doc)
}

async fn load_collaborator(
    conn: &mut SqliteConnection,
    document_id: &str,
    user_id: &str,
) -> Result<Option<Collaborator>, AppError> {
    let row = sqlx::query(
        "SELECT user_id, full_name, image_url, collab_accepted, admin FROM collaborators WHERE document_id = ? AND user_id = ?",
    )
    .bind(document_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(collaborator_from_row))
}

/// Ids of every document below `root` owned by `user_id`, breadth first.
async fn descendant_ids(
    conn: &mut SqliteConnection,
    user_id: &str,
    root: &str,
) -> Result<Vec<String>, AppError> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        WITH RECURSIVE subtree(id, depth) AS (
            SELECT id, 1 FROM documents WHERE user_id = ?1 AND parent_document = ?2
            UNION
            SELECT d.id, s.depth + 1 FROM documents d
            JOIN subtree s ON d.parent_document = s.id
            WHERE d.user_id = ?1
        )
        SELECT id FROM subtree WHERE id != ?2 GROUP BY id ORDER BY MIN(depth)
        "#,
    )
    .bind(user_id)
    .bind(root)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

async fn attach_collaborators(
    conn: &mut SqliteConnection,
    docs: &mut [Document],
) -> Result<(), AppError> {
    if docs.is_empty() {
        return Ok(());
    }

    let mut by_document: HashMap<String, Vec<Collaborator>> = HashMap::new();
    let ids: Vec<String> = docs.iter().map(|d| d.id.clone()).collect();

    for chunk in ids.chunks(ID_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT document_id, user_id, full_name, image_url, collab_accepted, admin FROM collaborators WHERE document_id IN (",
        );
        let mut separated = qb.separated(", ");
        for id in chunk {
            separated.push_bind(id);
        }
        separated.push_unseparated(") ORDER BY seq");

        let rows = qb.build().fetch_all(&mut *conn).await?;
        for row in &rows {
            let document_id: String = row.get("document_id");
            by_document
                .entry(document_id)
                .or_default()
                .push(collaborator_from_row(row));
        }
    }

    for doc in docs.iter_mut() {
        doc.collaborators = by_document.remove(&doc.id).unwrap_or_default();
    }
    Ok(())
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Document {
    let is_archived: i32 = row.get("is_archived");
    let is_published: i32 = row.get("is_published");
    Document {
        id: row.get("id"),
        title: row.get("title"),
        user_id: row.get("user_id"),
        is_archived: is_archived != 0,
        is_published: is_published != 0,
        parent_document: row.get("parent_document"),
        content: row.get("content"),
        cover_image: row.get("cover_image"),
        icon: row.get("icon"),
        collaborators: Vec::new(),
        creation_time: row.get("creation_time"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}

fn collaborator_from_row(row: &sqlx::sqlite::SqliteRow) -> Collaborator {
    let collab_accepted: i32 = row.get("collab_accepted");
    let admin: i32 = row.get("admin");
    Collaborator {
        user_id: row.get("user_id"),
        full_name: row.get("full_name"),
        image_url: row.get("image_url"),
        collab_accepted: collab_accepted != 0,
        admin: admin != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use tempfile::TempDir;

    async fn repo() -> (Repository, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("test.sqlite")).await.unwrap();
        (Repository::new(pool), dir)
    }

    async fn create(repo: &Repository, owner: &str, title: &str, parent: Option<&str>) -> Document {
        repo.create_document(
            owner,
            &CreateDocumentRequest {
                title: title.to_string(),
                parent_document: parent.map(str::to_string),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_archive_cascades_to_grandchildren() {
        let (repo, _dir) = repo().await;
        let root = create(&repo, "alice", "Root", None).await;
        let child = create(&repo, "alice", "Child", Some(&root.id)).await;
        let grandchild = create(&repo, "alice", "Grandchild", Some(&child.id)).await;
        let sibling = create(&repo, "alice", "Sibling", None).await;

        let result = repo.archive_document(&root.id, "alice").await.unwrap();
        assert!(result.document.is_archived);
        assert_eq!(result.descendant_ids, vec![child.id.clone(), grandchild.id.clone()]);

        let trash = repo.list_owned_documents("alice", true, Page::default()).await.unwrap();
        assert_eq!(trash.len(), 3);
        let live = repo.list_owned_documents("alice", false, Page::default()).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, sibling.id);
    }

    #[tokio::test]
    async fn test_restore_detaches_from_archived_parent() {
        let (repo, _dir) = repo().await;
        let root = create(&repo, "alice", "Root", None).await;
        let child = create(&repo, "alice", "Child", Some(&root.id)).await;
        let leaf = create(&repo, "alice", "Leaf", Some(&child.id)).await;

        repo.archive_document(&root.id, "alice").await.unwrap();
        let restored = repo.restore_document(&child.id, "alice").await.unwrap();

        assert!(!restored.document.is_archived);
        assert_eq!(restored.document.parent_document, None);
        assert_eq!(restored.descendant_ids, vec![leaf.id.clone()]);
        let leaf = repo.get_document(&leaf.id).await.unwrap().unwrap();
        assert!(!leaf.is_archived);
        assert_eq!(leaf.parent_document.as_deref(), Some(child.id.as_str()));

        let root = repo.get_document(&root.id).await.unwrap().unwrap();
        assert!(root.is_archived);
    }

    #[tokio::test]
    async fn test_concurrent_joins_produce_one_entry() {
        let (repo, _dir) = repo().await;
        let doc = create(&repo, "alice", "Shared", None).await;

        let request = JoinRequest::default();
        let (a, b) = tokio::join!(
            repo.join_document(&doc.id, "bob", &request),
            repo.join_document(&doc.id, "bob", &request)
        );
        let mut statuses = vec![a.unwrap().status, b.unwrap().status];
        statuses.sort_by_key(|s| *s == JoinStatus::Existing);
        assert_eq!(statuses, vec![JoinStatus::Requested, JoinStatus::Existing]);

        let doc = repo.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(doc.collaborators.len(), 1);
    }

    #[tokio::test]
    async fn test_collaborators_keep_join_order() {
        let (repo, _dir) = repo().await;
        let doc = create(&repo, "alice", "Shared", None).await;
        for user in ["carol", "bob", "dave"] {
            repo.join_document(&doc.id, user, &JoinRequest::default())
                .await
                .unwrap();
        }
        repo.update_collaborator(
            &doc.id,
            "alice",
            "bob",
            &UpdateCollaboratorRequest {
                collab_accepted: Some(true),
                admin: None,
            },
        )
        .await
        .unwrap();

        let list = repo.list_collaborators(&doc.id, "alice").await.unwrap();
        let order: Vec<&str> = list.iter().map(|c| c.user_id.as_str()).collect();
        assert_eq!(order, vec!["carol", "bob", "dave"]);
        assert!(list[1].collab_accepted);
    }

    #[tokio::test]
    async fn test_delete_removes_subtree_and_collaborators() {
        let (repo, _dir) = repo().await;
        let root = create(&repo, "alice", "Root", None).await;
        let child = create(&repo, "alice", "Child", Some(&root.id)).await;
        repo.join_document(&root.id, "bob", &JoinRequest::default())
            .await
            .unwrap();

        let deleted = repo.delete_document(&root.id, "alice").await.unwrap();
        assert_eq!(deleted, vec![root.id.clone(), child.id.clone()]);
        assert!(repo.get_document(&child.id).await.unwrap().is_none());
        assert!(repo.list_accessible_documents("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sidebar_pages_newest_first() {
        let (repo, _dir) = repo().await;
        let first = create(&repo, "alice", "First", None).await;
        let second = create(&repo, "alice", "Second", None).await;
        let third = create(&repo, "alice", "Third", None).await;
        create(&repo, "alice", "Nested", Some(&first.id)).await;

        let all = repo.list_sidebar("alice", None, Page::default()).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec![third.id.as_str(), second.id.as_str(), first.id.as_str()]);

        let page = Page {
            limit: Some(1),
            offset: 1,
        };
        let paged = repo.list_sidebar("alice", None, page).await.unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].id, second.id);

        let nested = repo
            .list_sidebar("alice", Some(&first.id), Page::default())
            .await
            .unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].title, "Nested");
    }
}

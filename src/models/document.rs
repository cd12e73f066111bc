//! Document model: a titled, owned, optionally nested note.

use serde::{Deserialize, Deserializer, Serialize};

use super::Collaborator;

/// Longest accepted title, in characters.
pub const MAX_TITLE_LEN: usize = 200;

/// A document in the notes tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    /// Owning user
    pub user_id: String,
    pub is_archived: bool,
    pub is_published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_document: Option<String>,
    /// Serialized rich-text block tree, opaque to the backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// In join order
    #[serde(default)]
    pub collaborators: Vec<Collaborator>,
    pub creation_time: String,
    pub updated_at: String,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

impl Document {
    pub fn collaborator(&self, user_id: &str) -> Option<&Collaborator> {
        self.collaborators.iter().find(|c| c.user_id == user_id)
    }
}

/// Request body for creating a document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentRequest {
    pub title: String,
    #[serde(default)]
    pub parent_document: Option<String>,
}

/// Request body for a partial document update.
///
/// Omitted fields are left untouched. `coverImage` and `icon` may be set to
/// `null` to clear them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDocumentRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub cover_image: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub icon: Option<Option<String>>,
    #[serde(default)]
    pub is_published: Option<bool>,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}

impl UpdateDocumentRequest {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.cover_image.is_none()
            && self.icon.is_none()
            && self.is_published.is_none()
    }
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Validate and normalize a document title.
pub fn normalize_title(title: &str) -> Result<String, String> {
    let trimmed = title.trim();
    if trimmed.chars().count() > MAX_TITLE_LEN {
        return Err(format!(
            "Title must be at most {} characters",
            MAX_TITLE_LEN
        ));
    }
    Ok(trimmed.to_string())
}

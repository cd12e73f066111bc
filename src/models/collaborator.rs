//! Collaborator model: a user granted access to somebody else's document.

use serde::{Deserialize, Serialize};

/// One entry of a document's collaborator list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// `false` while the join request waits for an owner or admin
    pub collab_accepted: bool,
    pub admin: bool,
}

/// Request body for joining a document through its share link.
///
/// The joining user is always the caller; name and avatar fall back to the
/// identity claims when omitted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Request body for accepting, promoting or demoting a collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCollaboratorRequest {
    #[serde(default)]
    pub collab_accepted: Option<bool>,
    #[serde(default)]
    pub admin: Option<bool>,
}

/// What a join request did.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum JoinStatus {
    /// The caller owns the document; nothing was written.
    Owner,
    /// The caller was already listed; nothing was written.
    Existing,
    /// A pending entry was appended.
    Requested,
}

/// Response body of a join request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOutcome {
    pub status: JoinStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collaborator: Option<Collaborator>,
}

//! Document access policy.
//!
//! Every permission decision in the service goes through [`Role`], derived
//! from the owner id and the collaborator list of a single document.

use crate::models::Document;

/// Relationship between a user and a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    /// Accepted collaborator with the admin flag.
    Admin,
    /// Accepted collaborator without the admin flag.
    Editor,
    /// Listed but not yet accepted. The admin flag is ignored until acceptance.
    Pending,
    /// Not the owner and not listed.
    Stranger,
}

impl Role {
    pub fn of(doc: &Document, user_id: &str) -> Self {
        if doc.user_id == user_id {
            return Role::Owner;
        }
        match doc.collaborator(user_id) {
            Some(c) if c.collab_accepted && c.admin => Role::Admin,
            Some(c) if c.collab_accepted => Role::Editor,
            Some(_) => Role::Pending,
            None => Role::Stranger,
        }
    }

    /// Owner or listed in the collaborator list, accepted or not.
    pub fn is_listed_or_owner(self) -> bool {
        self != Role::Stranger
    }

    pub fn can_edit(self) -> bool {
        matches!(self, Role::Owner | Role::Admin | Role::Editor)
    }

    pub fn can_publish(self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }

    /// Accept, promote, demote or remove other collaborators.
    pub fn can_manage_collaborators(self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

/// Whether `viewer` may read `doc`. Published, unarchived documents are public.
pub fn can_read(doc: &Document, viewer: Option<&str>) -> bool {
    if doc.is_published && !doc.is_archived {
        return true;
    }
    viewer.is_some_and(|user_id| Role::of(doc, user_id).can_edit())
}

/// Whether `viewer` may remove `target` from the collaborator list.
///
/// Managers may remove anyone; any listed collaborator may remove themselves.
pub fn can_remove_collaborator(doc: &Document, viewer: &str, target: &str) -> bool {
    let role = Role::of(doc, viewer);
    role.can_manage_collaborators() || (role.is_listed_or_owner() && viewer == target)
}

//! Group data structures

use super::errors::{CoreError, CoreResult};
use super::role::Role;
use super::types::{GroupId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Longest accepted group or room name, in characters
pub const MAX_NAME_LEN: usize = 100;

/// A Group is the top-level organization owning rooms and members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Unique identifier
    pub id: GroupId,

    /// Human-readable name
    pub name: String,

    /// When the Group was created
    pub created_at: Timestamp,

    /// Last time Group metadata was updated
    pub updated_at: Timestamp,
}

impl Group {
    /// Create a new Group with a fresh id
    pub fn new(name: String, now: Timestamp) -> Self {
        Group {
            id: GroupId::generate(),
            name,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A user's standing in a Group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub role: Role,
    pub joined_at: Timestamp,
    pub updated_at: Timestamp,
}

impl GroupMembership {
    pub fn new(group_id: GroupId, user_id: UserId, role: Role, now: Timestamp) -> Self {
        GroupMembership {
            group_id,
            user_id,
            role,
            joined_at: now,
            updated_at: now,
        }
    }

    /// Banned rows exist only to keep the ban in place
    pub fn is_active(&self) -> bool {
        self.role != Role::Banned
    }
}

/// Trim and check a group or room name
pub fn validate_name(kind: &str, name: &str) -> CoreResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidInput(format!("{} name must not be empty", kind)));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(CoreError::InvalidInput(format!(
            "{} name must be at most {} characters",
            kind, MAX_NAME_LEN
        )));
    }
    Ok(trimmed.to_string())
}

//! Room data structures and visibility defaults

use super::errors::CoreError;
use super::role::Role;
use super::types::{GroupId, RoomId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capacity given to rooms created without an explicit one
pub const DEFAULT_ROOM_CAPACITY: u32 = 16;

/// Deployment zone given to rooms created without an explicit one
pub const DEFAULT_DEPLOYMENT_ZONE: &str = "us-west1-b";

/// Rooms seeded into a new group when default rooms are enabled: (name, description)
pub const DEFAULT_ROOMS: [(&str, &str); 5] = [
    ("Hangout", "Just chatting"),
    ("Co-Work", "Working together"),
    ("Meeting Room Apple", "Inventing the future"),
    ("Meeting Room Banana", "Solving hard problems"),
    ("Office Hours", "Helping each other"),
];

/// Controls which group members see and may enter a room by default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    /// Everyone sees it and may join
    Public,
    /// Everyone sees it, joining needs an explicit grant
    Private,
    /// Hidden unless explicitly granted
    Secret,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::Public => "public",
            RoomType::Private => "private",
            RoomType::Secret => "secret",
        }
    }

    /// Flags a non-creator member receives when a membership is seeded
    pub fn default_access(&self) -> RoomAccess {
        RoomAccess {
            can_see: *self != RoomType::Secret,
            can_join: *self == RoomType::Public,
        }
    }
}

impl FromStr for RoomType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(RoomType::Public),
            "private" => Ok(RoomType::Private),
            "secret" => Ok(RoomType::Secret),
            other => Err(CoreError::InvalidInput(format!("unknown room type: {}", other))),
        }
    }
}

impl fmt::Display for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle flag; inactive rooms stay listed but cannot be entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Active,
    Inactive,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Active => "active",
            RoomStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for RoomStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RoomStatus::Active),
            "inactive" => Ok(RoomStatus::Inactive),
            other => Err(CoreError::InvalidInput(format!("unknown room status: {}", other))),
        }
    }
}

/// Visibility flags carried by a room membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomAccess {
    /// May enumerate and view the room
    pub can_see: bool,
    /// May open a live session in the room
    pub can_join: bool,
}

impl RoomAccess {
    /// The creator always sees and may join their room
    pub const FULL: RoomAccess = RoomAccess { can_see: true, can_join: true };
    pub const NONE: RoomAccess = RoomAccess { can_see: false, can_join: false };
}

/// A channel scoped to exactly one Group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub group_id: GroupId,
    /// Unique within the group
    pub name: String,
    pub description: Option<String>,
    pub capacity: u32,
    pub room_type: RoomType,
    pub deployment_zone: String,
    pub status: RoomStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Room {
    pub fn new(group_id: GroupId, spec: NewRoom, now: Timestamp) -> Self {
        Room {
            id: RoomId::generate(),
            group_id,
            name: spec.name,
            description: spec.description,
            capacity: spec.capacity.unwrap_or(DEFAULT_ROOM_CAPACITY),
            room_type: spec.room_type,
            deployment_zone: spec
                .deployment_zone
                .unwrap_or_else(|| DEFAULT_DEPLOYMENT_ZONE.to_string()),
            status: RoomStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RoomStatus::Active
    }
}

/// Caller-supplied attributes of a room to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoom {
    pub name: String,
    pub room_type: RoomType,
    pub description: Option<String>,
    pub capacity: Option<u32>,
    pub deployment_zone: Option<String>,
}

impl NewRoom {
    pub fn new(name: impl Into<String>, room_type: RoomType) -> Self {
        NewRoom {
            name: name.into(),
            room_type,
            description: None,
            capacity: None,
            deployment_zone: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.deployment_zone = Some(zone.into());
        self
    }
}

/// A user's standing in a Room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMembership {
    pub room_id: RoomId,
    pub user_id: UserId,
    /// Seeded from the group role, independently mutable afterwards
    pub role: Role,
    pub can_see: bool,
    pub can_join: bool,
    pub updated_at: Timestamp,
}

impl RoomMembership {
    pub fn new(room_id: RoomId, user_id: UserId, role: Role, access: RoomAccess, now: Timestamp) -> Self {
        RoomMembership {
            room_id,
            user_id,
            role,
            can_see: access.can_see,
            can_join: access.can_join,
            updated_at: now,
        }
    }

    pub fn access(&self) -> RoomAccess {
        RoomAccess {
            can_see: self.can_see,
            can_join: self.can_join,
        }
    }
}

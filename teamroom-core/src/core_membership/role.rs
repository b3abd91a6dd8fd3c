//! Role ranking shared by group and room memberships
//!
//! Six roles form a strict total order:
//! `banned < guest < member < moderator < admin < owner`.
//! Comparisons always go through the ordinal rank, never the label.

use super::errors::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Role {
    /// Explicitly locked out, keeps the row so the ban sticks
    Banned = 0,
    /// Limited participation, used for guest-tier onboarding
    Guest = 1,
    /// Default role for invited users
    Member = 2,
    /// Can edit roles of lower-ranked members
    Moderator = 3,
    /// Can manage rooms, invites and membership
    Admin = 4,
    /// Full control, including deleting the group
    Owner = 5,
}

impl Role {
    /// All roles, lowest to highest
    pub const ALL: [Role; 6] = [
        Role::Banned,
        Role::Guest,
        Role::Member,
        Role::Moderator,
        Role::Admin,
        Role::Owner,
    ];

    pub fn rank(self) -> u8 {
        self as u8
    }

    /// `true` iff `self` ranks strictly above `other`
    pub fn outranks(self, other: Role) -> bool {
        self.rank() > other.rank()
    }

    pub fn is_at_least(self, threshold: Role) -> bool {
        self.rank() >= threshold.rank()
    }

    pub fn from_rank(rank: u8) -> Result<Self, CoreError> {
        Role::ALL
            .get(rank as usize)
            .copied()
            .ok_or_else(|| CoreError::InvalidRole(format!("rank {}", rank)))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Banned => "banned",
            Role::Guest => "guest",
            Role::Member => "member",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "banned" => Ok(Role::Banned),
            "guest" => Ok(Role::Guest),
            "member" => Ok(Role::Member),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            "owner" => Ok(Role::Owner),
            other => Err(CoreError::InvalidRole(other.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

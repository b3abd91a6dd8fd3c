//! Group invite codes and referrals

use super::errors::{CoreError, CoreResult};
use super::role::Role;
use super::types::{GroupId, InviteId, Timestamp, UserId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How long an invite stays redeemable: 730 hours
pub const DEFAULT_INVITE_TTL: Duration = Duration::from_secs(730 * 60 * 60);

/// Number of decimal digits in an invite code
pub const DEFAULT_CODE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Expired,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Pending => "pending",
            InviteStatus::Accepted => "accepted",
            InviteStatus::Expired => "expired",
        }
    }
}

impl FromStr for InviteStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InviteStatus::Pending),
            "accepted" => Ok(InviteStatus::Accepted),
            "expired" => Ok(InviteStatus::Expired),
            other => Err(CoreError::InvalidInput(format!("unknown invite status: {}", other))),
        }
    }
}

impl fmt::Display for InviteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-use, time-limited invitation into a Group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInvite {
    pub id: InviteId,

    /// Numeric code, only unique within its group
    pub code: String,

    pub group_id: GroupId,

    /// Member who issued the invite
    pub referrer_id: UserId,

    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub status: InviteStatus,
}

impl GroupInvite {
    /// Issue a pending invite expiring `ttl` after `now`
    pub fn issue(group_id: GroupId, referrer_id: UserId, code: String, now: Timestamp, ttl: Duration) -> Self {
        GroupInvite {
            id: InviteId::generate(),
            code,
            group_id,
            referrer_id,
            created_at: now,
            expires_at: now.plus(ttl),
            status: InviteStatus::Pending,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Status as a reader should see it: a stale pending invite reads as expired
    pub fn effective_status(&self, now: Timestamp) -> InviteStatus {
        match self.status {
            InviteStatus::Pending if self.is_expired(now) => InviteStatus::Expired,
            status => status,
        }
    }

    /// Check that the invite can still be redeemed at `now`
    pub fn ensure_redeemable(&self, now: Timestamp) -> CoreResult<()> {
        if self.status != InviteStatus::Pending {
            return Err(CoreError::InvalidInvite(format!("invite has already been {}", self.status)));
        }
        if self.is_expired(now) {
            return Err(CoreError::InvalidInvite("invite has expired".to_string()));
        }
        Ok(())
    }
}

/// Draw `len` independent random decimal digits
pub fn generate_invite_code<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

/// Reject codes that could never have been issued
pub fn validate_invite_code(code: &str) -> CoreResult<&str> {
    let code = code.trim();
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(CoreError::InvalidInvite("invite code must be numeric".to_string()));
    }
    Ok(code)
}

/// Role a redeemer is enrolled with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinTier {
    #[default]
    Member,
    Guest,
}

impl JoinTier {
    pub fn role(&self) -> Role {
        match self {
            JoinTier::Member => Role::Member,
            JoinTier::Guest => Role::Guest,
        }
    }
}

/// Records that `referrer_id` onboarded `user_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referral {
    pub user_id: UserId,
    pub referrer_id: UserId,
    pub created_at: Timestamp,
}

//! Authorization guard
//!
//! Pure predicates over roles. Callers load the relevant memberships inside
//! their transaction, ask the guard, and turn a `false` into `Forbidden`
//! via [`ensure`].

use super::errors::{CoreError, CoreResult};
use super::role::Role;
use super::room::{RoomMembership, RoomStatus};
use super::types::UserId;
use crate::metrics::{record_counter, GUARD_DENIED};
use tracing::warn;

/// May `requester` move a member from `current_target` to `desired`?
///
/// Self role changes are rejected by the caller before this is consulted.
pub fn can_change_group_role(requester: Role, current_target: Role, desired: Role) -> bool {
    let is_owner = requester == Role::Owner;
    (is_owner || requester.outranks(current_target))
        && requester.is_at_least(Role::Moderator)
        && (is_owner || requester.outranks(desired))
}

/// May `requester` remove `target` from the group?
///
/// `sole_owner_remaining` is `true` when the group has at most one owner.
pub fn can_delete_group_member(
    requester: Role,
    target: Role,
    is_self: bool,
    sole_owner_remaining: bool,
) -> bool {
    if is_self {
        requester != Role::Owner || !sole_owner_remaining
    } else {
        requester.is_at_least(Role::Admin)
            && (requester == Role::Owner || requester.outranks(target))
    }
}

pub fn can_create_or_delete_room(requester: Role) -> bool {
    requester.is_at_least(Role::Admin)
}

pub fn can_invite_to_group(requester: Role) -> bool {
    requester.is_at_least(Role::Admin)
}

pub fn can_view_group_invites(requester: Role) -> bool {
    requester.is_at_least(Role::Admin)
}

/// May `requester` set `target_current`'s room role to `desired`?
///
/// Mirrors the group rule, and additionally forbids self-demotion.
pub fn can_update_room_member(requester: Role, target_current: Role, desired: Role, is_self: bool) -> bool {
    requester.is_at_least(Role::Moderator)
        && (target_current < requester || requester == Role::Owner)
        && desired <= requester
        && !(is_self && desired < requester)
}

pub fn can_delete_group(requester: Role) -> bool {
    requester == Role::Owner
}

/// May `requester` directly add a user to the group with role `desired`?
pub fn can_add_group_member(requester: Role, desired: Role) -> bool {
    requester.is_at_least(Role::Admin) && (requester == Role::Owner || requester.outranks(desired))
}

/// May `requester` change the `can_see`/`can_join` flags of a member holding `target_current`?
pub fn can_set_room_access(requester: Role, target_current: Role) -> bool {
    requester.is_at_least(Role::Moderator)
        && (requester == Role::Owner || requester.outranks(target_current))
}

/// Rooms the member may enumerate and view
pub fn can_view_room(membership: &RoomMembership) -> bool {
    membership.can_see && membership.role != Role::Banned
}

/// Whether the calling layer may request a live session token for this member
pub fn can_enter_room(membership: &RoomMembership, status: RoomStatus) -> bool {
    membership.can_join && membership.role != Role::Banned && status == RoomStatus::Active
}

/// Turn a guard decision into `Forbidden`
pub fn ensure(allowed: bool, user: &UserId, action: impl Into<String>) -> CoreResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(deny(user, action))
    }
}

/// Log and count a denial, returning the `Forbidden` error to surface
pub fn deny(user: &UserId, action: impl Into<String>) -> CoreError {
    let action = action.into();
    warn!(user = %user, action = %action, "authorization denied");
    record_counter(GUARD_DENIED, 1);
    CoreError::forbidden(user, action)
}

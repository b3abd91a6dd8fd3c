//! Manager traits for group, room and invite operations
//!
//! Every operation takes the acting user's id (already authenticated by the
//! calling layer) and an [`OpContext`] bounding how long it may run.

use super::context::OpContext;
use super::errors::CoreResult;
use super::group::{Group, GroupMembership};
use super::invite::{GroupInvite, JoinTier, Referral};
use super::role::Role;
use super::room::{NewRoom, Room, RoomAccess, RoomMembership, RoomStatus};
use super::types::{GroupId, RoomId, User, UserId};
use serde::Serialize;

/// A group as listed for one of its members
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserGroup {
    pub group: Group,
    pub role: Role,
}

/// A room the acting user can see, with their membership in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibleRoom {
    pub room: Room,
    pub membership: RoomMembership,
}

/// Outcome of redeeming an invite
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redemption {
    pub invite: GroupInvite,
    pub membership: GroupMembership,
}

/// Registration of users known to the identity layer
pub trait UserDirectory {
    /// Register a user so they can act on groups
    fn register_user(
        &self,
        ctx: &OpContext,
        user_id: UserId,
        display_name: &str,
        email: &str,
    ) -> CoreResult<User>;
}

/// Manager for Group and group membership operations
pub trait GroupManager {
    /// Create a new Group owned by `actor`
    fn create_group(&self, ctx: &OpContext, actor: &UserId, name: &str) -> CoreResult<Group>;

    fn get_group(&self, ctx: &OpContext, actor: &UserId, group_id: &GroupId) -> CoreResult<Group>;

    /// Delete a Group (owner only), cascading rooms, memberships and invites
    fn delete_group(&self, ctx: &OpContext, actor: &UserId, group_id: &GroupId) -> CoreResult<()>;

    /// Groups `actor` is an active member of
    fn list_user_groups(&self, ctx: &OpContext, actor: &UserId) -> CoreResult<Vec<UserGroup>>;

    /// Directly add a registered user to a Group (admin or owner)
    fn add_group_member(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        group_id: &GroupId,
        user_id: &UserId,
        role: Role,
    ) -> CoreResult<GroupMembership>;

    fn get_group_membership(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        group_id: &GroupId,
        user_id: &UserId,
    ) -> CoreResult<GroupMembership>;

    fn list_group_members(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        group_id: &GroupId,
    ) -> CoreResult<Vec<GroupMembership>>;

    /// Change another member's group role
    fn update_group_membership_role(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        group_id: &GroupId,
        user_id: &UserId,
        new_role: Role,
    ) -> CoreResult<GroupMembership>;

    /// Kick a member, or leave the group when `user_id == actor`
    ///
    /// A banned member cannot leave: the actor must hold an active membership,
    /// otherwise the call is `Forbidden` and the ban stays in place.
    fn remove_group_member(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        group_id: &GroupId,
        user_id: &UserId,
    ) -> CoreResult<()>;
}

/// Manager for Room and room membership operations
pub trait RoomManager {
    /// Create a Room and seed memberships for the group
    fn create_room(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        group_id: &GroupId,
        room: NewRoom,
    ) -> CoreResult<Room>;

    fn get_room(&self, ctx: &OpContext, actor: &UserId, room_id: &RoomId) -> CoreResult<Room>;

    fn delete_room(&self, ctx: &OpContext, actor: &UserId, room_id: &RoomId) -> CoreResult<()>;

    /// Rooms of a group `actor` may see
    fn list_visible_rooms(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        group_id: &GroupId,
    ) -> CoreResult<Vec<VisibleRoom>>;

    /// Activate or deactivate a Room
    fn set_room_status(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        room_id: &RoomId,
        status: RoomStatus,
    ) -> CoreResult<Room>;

    fn get_room_membership(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> CoreResult<RoomMembership>;

    /// Change a member's room role
    fn update_room_member(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        room_id: &RoomId,
        user_id: &UserId,
        role: Role,
    ) -> CoreResult<RoomMembership>;

    /// Grant or revoke `can_see`/`can_join` for one member
    fn set_room_member_access(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        room_id: &RoomId,
        user_id: &UserId,
        access: RoomAccess,
    ) -> CoreResult<RoomMembership>;

    /// Whether `actor` may currently open a live session in the room
    fn can_enter_room(&self, ctx: &OpContext, actor: &UserId, room_id: &RoomId) -> CoreResult<bool>;
}

/// Manager for invites and referrals
pub trait InviteManager {
    /// Issue a single-use invite code for a Group
    fn create_invite(&self, ctx: &OpContext, actor: &UserId, group_id: &GroupId) -> CoreResult<GroupInvite>;

    /// Invites of a Group, with stale pending invites reported as expired
    fn list_group_invites(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        group_id: &GroupId,
    ) -> CoreResult<Vec<GroupInvite>>;

    /// Redeem `code` for `group_id`, enrolling `redeemer`
    fn redeem_invite(
        &self,
        ctx: &OpContext,
        redeemer: &UserId,
        group_id: &GroupId,
        code: &str,
        tier: JoinTier,
    ) -> CoreResult<Redemption>;

    /// Users `actor` has onboarded
    fn list_referrals(&self, ctx: &OpContext, actor: &UserId) -> CoreResult<Vec<Referral>>;
}

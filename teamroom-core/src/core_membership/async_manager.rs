//! Async facade over [`MembershipService`]
//!
//! Each call runs the synchronous operation on tokio's blocking pool under a
//! fresh [`OpContext`]. When the timeout elapses the context is cancelled and
//! the task is still awaited: it either rolls back at its next statement and
//! reports `Cancelled`, or it had already committed and reports its result.

use super::context::OpContext;
use super::errors::{CoreError, CoreResult};
use super::group::{Group, GroupMembership};
use super::invite::{GroupInvite, JoinTier, Referral};
use super::manager::{
    GroupManager, InviteManager, Redemption, RoomManager, UserDirectory, UserGroup, VisibleRoom,
};
use super::manager_impl::MembershipService;
use super::role::Role;
use super::room::{NewRoom, Room, RoomAccess, RoomMembership, RoomStatus};
use super::types::{GroupId, RoomId, User, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Async manager with a per-call timeout
#[derive(Clone)]
pub struct AsyncMembershipService {
    service: Arc<MembershipService>,
    timeout: Duration,
}

impl AsyncMembershipService {
    pub fn new(service: MembershipService, timeout: Duration) -> Self {
        Self {
            service: Arc::new(service),
            timeout,
        }
    }

    /// The wrapped synchronous service
    pub fn service(&self) -> &MembershipService {
        &self.service
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `f` on the blocking pool, cancelling it once the timeout elapses
    pub async fn run<T, F>(&self, operation: &'static str, f: F) -> CoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&MembershipService, &OpContext) -> CoreResult<T> + Send + 'static,
    {
        let ctx = OpContext::with_timeout(self.timeout);
        let task_ctx = ctx.clone();
        let service = self.service.clone();

        let mut handle = tokio::task::spawn_blocking(move || f(&service, &task_ctx));

        let joined = match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                ctx.cancel();
                warn!(operation, timeout = ?self.timeout, "operation timed out, waiting for rollback");
                handle.await
            }
        };
        joined.map_err(|e| CoreError::Internal(format!("Task join error: {}", e)))?
    }

    // ===== Users =====

    pub async fn register_user(&self, user_id: UserId, display_name: String, email: String) -> CoreResult<User> {
        self.run("register_user", move |s, ctx| s.register_user(ctx, user_id, &display_name, &email))
            .await
    }

    // ===== Groups =====

    pub async fn create_group(&self, actor: UserId, name: String) -> CoreResult<Group> {
        self.run("create_group", move |s, ctx| s.create_group(ctx, &actor, &name))
            .await
    }

    pub async fn get_group(&self, actor: UserId, group_id: GroupId) -> CoreResult<Group> {
        self.run("get_group", move |s, ctx| s.get_group(ctx, &actor, &group_id))
            .await
    }

    pub async fn delete_group(&self, actor: UserId, group_id: GroupId) -> CoreResult<()> {
        self.run("delete_group", move |s, ctx| s.delete_group(ctx, &actor, &group_id))
            .await
    }

    pub async fn list_user_groups(&self, actor: UserId) -> CoreResult<Vec<UserGroup>> {
        self.run("list_user_groups", move |s, ctx| s.list_user_groups(ctx, &actor))
            .await
    }

    pub async fn add_group_member(
        &self,
        actor: UserId,
        group_id: GroupId,
        user_id: UserId,
        role: Role,
    ) -> CoreResult<GroupMembership> {
        self.run("add_group_member", move |s, ctx| {
            s.add_group_member(ctx, &actor, &group_id, &user_id, role)
        })
        .await
    }

    pub async fn get_group_membership(
        &self,
        actor: UserId,
        group_id: GroupId,
        user_id: UserId,
    ) -> CoreResult<GroupMembership> {
        self.run("get_group_membership", move |s, ctx| {
            s.get_group_membership(ctx, &actor, &group_id, &user_id)
        })
        .await
    }

    pub async fn list_group_members(&self, actor: UserId, group_id: GroupId) -> CoreResult<Vec<GroupMembership>> {
        self.run("list_group_members", move |s, ctx| s.list_group_members(ctx, &actor, &group_id))
            .await
    }

    pub async fn update_group_membership_role(
        &self,
        actor: UserId,
        group_id: GroupId,
        user_id: UserId,
        new_role: Role,
    ) -> CoreResult<GroupMembership> {
        self.run("update_group_membership_role", move |s, ctx| {
            s.update_group_membership_role(ctx, &actor, &group_id, &user_id, new_role)
        })
        .await
    }

    pub async fn remove_group_member(&self, actor: UserId, group_id: GroupId, user_id: UserId) -> CoreResult<()> {
        self.run("remove_group_member", move |s, ctx| {
            s.remove_group_member(ctx, &actor, &group_id, &user_id)
        })
        .await
    }

    // ===== Rooms =====

    pub async fn create_room(&self, actor: UserId, group_id: GroupId, room: NewRoom) -> CoreResult<Room> {
        self.run("create_room", move |s, ctx| s.create_room(ctx, &actor, &group_id, room))
            .await
    }

    pub async fn get_room(&self, actor: UserId, room_id: RoomId) -> CoreResult<Room> {
        self.run("get_room", move |s, ctx| s.get_room(ctx, &actor, &room_id))
            .await
    }

    pub async fn delete_room(&self, actor: UserId, room_id: RoomId) -> CoreResult<()> {
        self.run("delete_room", move |s, ctx| s.delete_room(ctx, &actor, &room_id))
            .await
    }

    pub async fn list_visible_rooms(&self, actor: UserId, group_id: GroupId) -> CoreResult<Vec<VisibleRoom>> {
        self.run("list_visible_rooms", move |s, ctx| s.list_visible_rooms(ctx, &actor, &group_id))
            .await
    }

    pub async fn set_room_status(&self, actor: UserId, room_id: RoomId, status: RoomStatus) -> CoreResult<Room> {
        self.run("set_room_status", move |s, ctx| s.set_room_status(ctx, &actor, &room_id, status))
            .await
    }

    pub async fn get_room_membership(
        &self,
        actor: UserId,
        room_id: RoomId,
        user_id: UserId,
    ) -> CoreResult<RoomMembership> {
        self.run("get_room_membership", move |s, ctx| {
            s.get_room_membership(ctx, &actor, &room_id, &user_id)
        })
        .await
    }

    pub async fn update_room_member(
        &self,
        actor: UserId,
        room_id: RoomId,
        user_id: UserId,
        role: Role,
    ) -> CoreResult<RoomMembership> {
        self.run("update_room_member", move |s, ctx| {
            s.update_room_member(ctx, &actor, &room_id, &user_id, role)
        })
        .await
    }

    pub async fn set_room_member_access(
        &self,
        actor: UserId,
        room_id: RoomId,
        user_id: UserId,
        access: RoomAccess,
    ) -> CoreResult<RoomMembership> {
        self.run("set_room_member_access", move |s, ctx| {
            s.set_room_member_access(ctx, &actor, &room_id, &user_id, access)
        })
        .await
    }

    pub async fn can_enter_room(&self, actor: UserId, room_id: RoomId) -> CoreResult<bool> {
        self.run("can_enter_room", move |s, ctx| s.can_enter_room(ctx, &actor, &room_id))
            .await
    }

    // ===== Invites =====

    pub async fn create_invite(&self, actor: UserId, group_id: GroupId) -> CoreResult<GroupInvite> {
        self.run("create_invite", move |s, ctx| s.create_invite(ctx, &actor, &group_id))
            .await
    }

    pub async fn list_group_invites(&self, actor: UserId, group_id: GroupId) -> CoreResult<Vec<GroupInvite>> {
        self.run("list_group_invites", move |s, ctx| s.list_group_invites(ctx, &actor, &group_id))
            .await
    }

    pub async fn redeem_invite(
        &self,
        redeemer: UserId,
        group_id: GroupId,
        code: String,
        tier: JoinTier,
    ) -> CoreResult<Redemption> {
        self.run("redeem_invite", move |s, ctx| {
            s.redeem_invite(ctx, &redeemer, &group_id, &code, tier)
        })
        .await
    }

    pub async fn list_referrals(&self, actor: UserId) -> CoreResult<Vec<Referral>> {
        self.run("list_referrals", move |s, ctx| s.list_referrals(ctx, &actor))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_membership::errors::ErrorKind;
    use crate::core_membership::room::RoomType;
    use crate::test_utils::TestWorld;

    fn async_world_with_timeout(timeout: Duration) -> (AsyncMembershipService, UserId, UserId) {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        (AsyncMembershipService::new(world.service, timeout), alice, bob)
    }

    fn async_world() -> (AsyncMembershipService, UserId, UserId) {
        async_world_with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_invite_flow() {
        let (svc, alice, bob) = async_world();

        let group = svc.create_group(alice.clone(), "Acme".to_string()).await.unwrap();
        svc.create_room(alice.clone(), group.id, NewRoom::new("general", RoomType::Public))
            .await
            .unwrap();
        let invite = svc.create_invite(alice.clone(), group.id).await.unwrap();

        let redemption = svc
            .redeem_invite(bob.clone(), group.id, invite.code.clone(), JoinTier::Member)
            .await
            .unwrap();
        assert_eq!(redemption.membership.role, Role::Member);

        let rooms = svc.list_visible_rooms(bob.clone(), group.id).await.unwrap();
        assert_eq!(rooms.len(), 1);

        let referrals = svc.list_referrals(alice).await.unwrap();
        assert_eq!(referrals.len(), 1);
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let (svc, alice, bob) = async_world();
        let group = svc.create_group(alice, "Acme".to_string()).await.unwrap();

        let err = svc.list_group_members(bob, group.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_timeout_cancels_operation() {
        let (svc, alice, _) = async_world_with_timeout(Duration::from_millis(20));

        let actor = alice.clone();
        let err = svc
            .run("slow_create_group", move |s, ctx| {
                std::thread::sleep(Duration::from_millis(200));
                s.create_group(ctx, &actor, "Late")
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        let groups = svc
            .service()
            .list_user_groups(&OpContext::background(), &alice)
            .unwrap();
        assert!(groups.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_after_commit_reports_the_write() {
        let (svc, alice, _) = async_world_with_timeout(Duration::from_millis(50));

        let actor = alice.clone();
        let group = svc
            .run("create_group", move |s, ctx| {
                let group = s.create_group(ctx, &actor, "Committed");
                std::thread::sleep(Duration::from_millis(200));
                group
            })
            .await
            .unwrap();
        assert_eq!(group.name, "Committed");

        let groups = svc
            .service()
            .list_user_groups(&OpContext::background(), &alice)
            .unwrap();
        assert_eq!(groups.len(), 1);
    }
}

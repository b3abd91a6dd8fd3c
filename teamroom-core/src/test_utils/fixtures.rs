//! Test fixtures for membership scenarios
//!
//! [`TestWorld`] wires a [`MembershipService`] to a fresh in-memory store, a
//! [`ManualClock`] and a seeded RNG. Helpers panic on failure since they only
//! build the scene a test then exercises.

use super::deterministic_rng::test_rng;
use crate::core_membership::{
    GroupInvite, GroupManager, Group, InviteManager, ManualClock, MembershipService, NewRoom,
    OpContext, Role, Room, RoomManager, RoomType, ServiceSettings, SqlStore, Timestamp,
    UserDirectory, UserId,
};
use std::sync::Arc;

/// Fixed start time for every world: 2024-01-01T00:00:00Z
pub const TEST_EPOCH_MILLIS: u64 = 1_704_067_200_000;

pub struct TestWorld {
    pub service: MembershipService,
    pub clock: Arc<ManualClock>,
    pub ctx: OpContext,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::with_settings(ServiceSettings::default())
    }

    pub fn with_settings(settings: ServiceSettings) -> Self {
        let store = SqlStore::memory().expect("in-memory store");
        Self::with_store(store, settings)
    }

    /// Build a world over an existing store, e.g. a file-backed one
    pub fn with_store(store: SqlStore, settings: ServiceSettings) -> Self {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(TEST_EPOCH_MILLIS)));
        let service = MembershipService::new(store, settings)
            .with_clock(clock.clone())
            .with_rng(test_rng());

        TestWorld {
            service,
            clock,
            ctx: OpContext::background(),
        }
    }

    /// Register a user named `name`
    pub fn user(&self, name: &str) -> UserId {
        let id = UserId::new(name);
        self.service
            .register_user(&self.ctx, id.clone(), name, &format!("{}@example.com", name))
            .expect("register user");
        id
    }

    pub fn group_owned_by(&self, owner: &UserId) -> Group {
        self.service
            .create_group(&self.ctx, owner, &format!("{}'s group", owner))
            .expect("create group")
    }

    pub fn add_member(&self, actor: &UserId, group: &Group, user: &UserId, role: Role) {
        self.service
            .add_group_member(&self.ctx, actor, &group.id, user, role)
            .expect("add group member");
    }

    pub fn room(&self, actor: &UserId, group: &Group, name: &str, room_type: RoomType) -> Room {
        self.service
            .create_room(&self.ctx, actor, &group.id, NewRoom::new(name, room_type))
            .expect("create room")
    }

    pub fn invite(&self, actor: &UserId, group: &Group) -> GroupInvite {
        self.service
            .create_invite(&self.ctx, actor, &group.id)
            .expect("create invite")
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

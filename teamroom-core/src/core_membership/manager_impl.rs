//! Membership service: every operation as one store transaction
//!
//! Each call loads the acting user's memberships, asks the guard, and
//! performs its writes inside a single unit of work, so a decision and the
//! mutation it authorizes can never interleave with another writer.

use super::clock::{Clock, SystemClock};
use super::context::OpContext;
use super::errors::{CoreError, CoreResult, ErrorKind};
use super::group::{validate_name, Group, GroupMembership};
use super::guard;
use super::invite::{
    generate_invite_code, validate_invite_code, GroupInvite, InviteStatus, JoinTier, Referral,
    DEFAULT_CODE_LEN, DEFAULT_INVITE_TTL,
};
use super::manager::{
    GroupManager, InviteManager, Redemption, RoomManager, UserDirectory, UserGroup, VisibleRoom,
};
use super::propagator::{propagate_group_join, propagate_room_creation};
use super::role::Role;
use super::room::{
    NewRoom, Room, RoomAccess, RoomMembership, RoomStatus, RoomType, DEFAULT_DEPLOYMENT_ZONE,
    DEFAULT_ROOMS, DEFAULT_ROOM_CAPACITY,
};
use super::storage::{SqlStore, StoreTx};
use super::types::{GroupId, RoomId, Timestamp, User, UserId};
use crate::config::Config;
use crate::metrics::{
    record_counter, Timer, GROUPS_CREATED, GROUPS_DELETED, INVITES_CREATED, INVITES_REDEEMED,
    INVITES_REJECTED, MEMBERS_ADDED, MEMBERS_REMOVED, OPERATIONS_CANCELLED, ROOMS_CREATED,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tunables the service reads on every call
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub invite_ttl: Duration,
    pub invite_code_length: usize,
    pub seed_default_rooms: bool,
    pub default_room_capacity: u32,
    pub default_zone: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            invite_ttl: DEFAULT_INVITE_TTL,
            invite_code_length: DEFAULT_CODE_LEN,
            seed_default_rooms: false,
            default_room_capacity: DEFAULT_ROOM_CAPACITY,
            default_zone: DEFAULT_DEPLOYMENT_ZONE.to_string(),
        }
    }
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            invite_ttl: config.invites.ttl,
            invite_code_length: config.invites.code_length,
            seed_default_rooms: config.groups.seed_default_rooms,
            default_room_capacity: config.groups.default_room_capacity,
            default_zone: config.groups.default_zone.clone(),
        }
    }
}

/// Group, room and invite operations over a [`SqlStore`]
pub struct MembershipService {
    store: SqlStore,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
    settings: ServiceSettings,
}

impl MembershipService {
    pub fn new(store: SqlStore, settings: ServiceSettings) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            rng: Mutex::new(StdRng::from_os_rng()),
            settings,
        }
    }

    /// Open the configured store and build a service over it
    pub fn from_config(config: &Config) -> CoreResult<Self> {
        let store = SqlStore::open(&config.store)?;
        Ok(Self::new(store, ServiceSettings::from(config)))
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the generator used for invite codes
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn store(&self) -> &SqlStore {
        &self.store
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn next_invite_code(&self) -> CoreResult<String> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| CoreError::Internal("invite code generator lock poisoned".to_string()))?;
        Ok(generate_invite_code(&mut *rng, self.settings.invite_code_length))
    }

    /// Fill in the configured capacity and zone where the caller left them out
    fn apply_room_defaults(&self, mut spec: NewRoom) -> NewRoom {
        if spec.capacity.is_none() {
            spec.capacity = Some(self.settings.default_room_capacity);
        }
        if spec.deployment_zone.is_none() {
            spec.deployment_zone = Some(self.settings.default_zone.clone());
        }
        spec
    }

    fn seed_default_rooms(&self, tx: &StoreTx<'_>, group: &Group, owner: &UserId, now: Timestamp) -> CoreResult<()> {
        for (name, description) in DEFAULT_ROOMS {
            let spec = NewRoom::new(name, RoomType::Public).with_description(description);
            let room = Room::new(group.id, self.apply_room_defaults(spec), now);
            tx.insert_room(&room)?;
            propagate_room_creation(tx, &room, owner, now)?;
        }
        debug!(group_id = %group.id, rooms = DEFAULT_ROOMS.len(), "seeded default rooms");
        Ok(())
    }
}

/// Time an operation and log how it failed, if it did
fn instrument<T>(operation: &'static str, f: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
    let timer = Timer::start(operation);
    let result = f();
    timer.stop();

    if let Err(e) = &result {
        match e.kind() {
            ErrorKind::Cancelled => {
                record_counter(OPERATIONS_CANCELLED, 1);
                warn!(operation, error = %e, "operation cancelled");
            }
            ErrorKind::Internal => error!(operation, error = %e, "operation failed"),
            _ => debug!(operation, error = %e, "operation rejected"),
        }
    }
    result
}

/// The actor's active membership, or `Forbidden`
fn require_member(tx: &StoreTx<'_>, group_id: &GroupId, actor: &UserId, action: &str) -> CoreResult<GroupMembership> {
    match tx.get_group_membership(group_id, actor)? {
        Some(membership) if membership.is_active() => Ok(membership),
        _ => Err(guard::deny(actor, format!("{} in group {}", action, group_id))),
    }
}

/// A room the actor may see, with their room membership
///
/// Missing and hidden rooms are indistinguishable: both are `NotFound`.
fn visible_room(tx: &StoreTx<'_>, actor: &UserId, room_id: &RoomId) -> CoreResult<(Room, RoomMembership)> {
    let hidden = || CoreError::not_found("room", room_id);

    let room = tx.get_room(room_id)?.ok_or_else(hidden)?;
    let in_group = tx
        .get_group_membership(&room.group_id, actor)?
        .is_some_and(|m| m.is_active());
    if !in_group {
        return Err(hidden());
    }

    match tx.get_room_membership(room_id, actor)? {
        Some(membership) if guard::can_view_room(&membership) => Ok((room, membership)),
        _ => Err(hidden()),
    }
}

/// A room the actor may manage at group level (create/delete/status)
fn managed_room(tx: &StoreTx<'_>, actor: &UserId, room_id: &RoomId, action: &str) -> CoreResult<(Room, GroupMembership)> {
    let hidden = || CoreError::not_found("room", room_id);

    let room = tx.get_room(room_id)?.ok_or_else(hidden)?;
    let membership = match tx.get_group_membership(&room.group_id, actor)? {
        Some(m) if m.is_active() => m,
        _ => return Err(hidden()),
    };

    if !guard::can_create_or_delete_room(membership.role) {
        let visible = tx
            .get_room_membership(room_id, actor)?
            .is_some_and(|m| guard::can_view_room(&m));
        if !visible {
            return Err(hidden());
        }
        return Err(guard::deny(actor, format!("{} room {}", action, room.name)));
    }
    Ok((room, membership))
}

fn validate_new_room(spec: NewRoom) -> CoreResult<NewRoom> {
    let name = validate_name("room", &spec.name)?;
    if spec.capacity == Some(0) {
        return Err(CoreError::InvalidInput("room capacity must be greater than 0".to_string()));
    }
    if spec.deployment_zone.as_deref().is_some_and(|z| z.trim().is_empty()) {
        return Err(CoreError::InvalidInput("deployment zone must not be empty".to_string()));
    }
    let description = spec
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    Ok(NewRoom {
        name,
        description,
        ..spec
    })
}

impl UserDirectory for MembershipService {
    fn register_user(&self, ctx: &OpContext, user_id: UserId, display_name: &str, email: &str) -> CoreResult<User> {
        instrument("register_user", || {
            let id = user_id.as_str().trim();
            if id.is_empty() {
                return Err(CoreError::InvalidInput("user id must not be empty".to_string()));
            }
            let display_name = display_name.trim();
            if display_name.is_empty() {
                return Err(CoreError::InvalidInput("display name must not be empty".to_string()));
            }

            let user = User {
                id: UserId::new(id),
                display_name: display_name.to_string(),
                email: email.trim().to_string(),
                created_at: self.now(),
            };

            self.store.write(ctx, |tx| {
                tx.insert_user(&user).map_err(|e| match e {
                    CoreError::Conflict(_) => CoreError::Conflict(format!("user {} already exists", user.id)),
                    other => other,
                })
            })?;

            info!(user_id = %user.id, "user registered");
            Ok(user)
        })
    }
}

impl GroupManager for MembershipService {
    fn create_group(&self, ctx: &OpContext, actor: &UserId, name: &str) -> CoreResult<Group> {
        instrument("create_group", || {
            let name = validate_name("group", name)?;
            let now = self.now();

            let group = self.store.write(ctx, |tx| {
                tx.require_user(actor)?;

                let group = Group::new(name, now);
                tx.insert_group(&group)?;
                tx.insert_group_membership(&GroupMembership::new(group.id, actor.clone(), Role::Owner, now))?;

                if self.settings.seed_default_rooms {
                    self.seed_default_rooms(tx, &group, actor, now)?;
                }
                Ok(group)
            })?;

            record_counter(GROUPS_CREATED, 1);
            info!(group_id = %group.id, owner = %actor, "group created");
            Ok(group)
        })
    }

    fn get_group(&self, ctx: &OpContext, actor: &UserId, group_id: &GroupId) -> CoreResult<Group> {
        instrument("get_group", || {
            self.store.read(ctx, |tx| {
                tx.require_user(actor)?;
                let group = tx.require_group(group_id)?;
                require_member(tx, group_id, actor, "view group")?;
                Ok(group)
            })
        })
    }

    fn delete_group(&self, ctx: &OpContext, actor: &UserId, group_id: &GroupId) -> CoreResult<()> {
        instrument("delete_group", || {
            self.store.write(ctx, |tx| {
                tx.require_user(actor)?;
                tx.require_group(group_id)?;
                let membership = require_member(tx, group_id, actor, "delete group")?;
                guard::ensure(
                    guard::can_delete_group(membership.role),
                    actor,
                    format!("delete group {}", group_id),
                )?;
                tx.delete_group(group_id)?;
                Ok(())
            })?;

            record_counter(GROUPS_DELETED, 1);
            info!(group_id = %group_id, actor = %actor, "group deleted");
            Ok(())
        })
    }

    fn list_user_groups(&self, ctx: &OpContext, actor: &UserId) -> CoreResult<Vec<UserGroup>> {
        instrument("list_user_groups", || {
            self.store.read(ctx, |tx| {
                tx.require_user(actor)?;
                let groups = tx
                    .list_user_groups(actor)?
                    .into_iter()
                    .filter(|(_, role)| *role != Role::Banned)
                    .map(|(group, role)| UserGroup { group, role })
                    .collect();
                Ok(groups)
            })
        })
    }

    fn add_group_member(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        group_id: &GroupId,
        user_id: &UserId,
        role: Role,
    ) -> CoreResult<GroupMembership> {
        instrument("add_group_member", || {
            let now = self.now();

            let (membership, rooms) = self.store.write(ctx, |tx| {
                tx.require_user(actor)?;
                tx.require_group(group_id)?;
                let requester = require_member(tx, group_id, actor, "add members")?;
                guard::ensure(
                    guard::can_add_group_member(requester.role, role),
                    actor,
                    format!("add {} as {} to group {}", user_id, role, group_id),
                )?;
                tx.require_user(user_id)?;

                let membership = GroupMembership::new(*group_id, user_id.clone(), role, now);
                tx.insert_group_membership(&membership)?;
                let rooms = propagate_group_join(tx, &membership, now)?;
                Ok((membership, rooms))
            })?;

            record_counter(MEMBERS_ADDED, 1);
            info!(group_id = %group_id, user_id = %user_id, role = %role, rooms, "member added");
            Ok(membership)
        })
    }

    fn get_group_membership(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        group_id: &GroupId,
        user_id: &UserId,
    ) -> CoreResult<GroupMembership> {
        instrument("get_group_membership", || {
            self.store.read(ctx, |tx| {
                tx.require_user(actor)?;
                tx.require_group(group_id)?;
                let own = require_member(tx, group_id, actor, "view members")?;
                if user_id == actor {
                    return Ok(own);
                }
                tx.get_group_membership(group_id, user_id)?
                    .ok_or_else(|| CoreError::not_found("group membership", user_id))
            })
        })
    }

    fn list_group_members(&self, ctx: &OpContext, actor: &UserId, group_id: &GroupId) -> CoreResult<Vec<GroupMembership>> {
        instrument("list_group_members", || {
            self.store.read(ctx, |tx| {
                tx.require_user(actor)?;
                tx.require_group(group_id)?;
                require_member(tx, group_id, actor, "view members")?;
                tx.list_group_members(group_id)
            })
        })
    }

    fn update_group_membership_role(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        group_id: &GroupId,
        user_id: &UserId,
        new_role: Role,
    ) -> CoreResult<GroupMembership> {
        instrument("update_group_membership_role", || {
            let now = self.now();

            let (membership, previous) = self.store.write(ctx, |tx| {
                tx.require_user(actor)?;
                tx.require_group(group_id)?;
                let requester = require_member(tx, group_id, actor, "change roles")?;

                // never allowed, whatever the ranks say
                if user_id == actor {
                    return Err(guard::deny(actor, "change their own role"));
                }

                let mut target = tx
                    .get_group_membership(group_id, user_id)?
                    .ok_or_else(|| CoreError::not_found("group membership", user_id))?;
                guard::ensure(
                    guard::can_change_group_role(requester.role, target.role, new_role),
                    actor,
                    format!("change {} from {} to {}", user_id, target.role, new_role),
                )?;

                tx.update_group_membership_role(group_id, user_id, new_role, now)?;
                let previous = target.role;
                target.role = new_role;
                target.updated_at = now;
                Ok((target, previous))
            })?;

            info!(
                group_id = %group_id,
                user_id = %user_id,
                from = %previous,
                to = %new_role,
                "group role changed"
            );
            Ok(membership)
        })
    }

    fn remove_group_member(&self, ctx: &OpContext, actor: &UserId, group_id: &GroupId, user_id: &UserId) -> CoreResult<()> {
        instrument("remove_group_member", || {
            self.store.write(ctx, |tx| {
                tx.require_user(actor)?;
                tx.require_group(group_id)?;
                // banned members cannot lift their own ban by leaving
                let requester = require_member(tx, group_id, actor, "remove members")?;

                let is_self = user_id == actor;
                let target = if is_self {
                    requester.clone()
                } else {
                    tx.get_group_membership(group_id, user_id)?
                        .ok_or_else(|| CoreError::not_found("group membership", user_id))?
                };

                let sole_owner_remaining = tx.count_group_members_with_role(group_id, Role::Owner)? <= 1;
                if is_self && requester.role == Role::Owner && sole_owner_remaining {
                    warn!(group_id = %group_id, user_id = %actor, "sole owner tried to leave");
                    return Err(CoreError::SoleOwner { group: group_id.to_string() });
                }

                guard::ensure(
                    guard::can_delete_group_member(requester.role, target.role, is_self, sole_owner_remaining),
                    actor,
                    format!("remove {} from group {}", user_id, group_id),
                )?;

                tx.delete_group_membership(group_id, user_id)?;
                Ok(())
            })?;

            record_counter(MEMBERS_REMOVED, 1);
            if user_id == actor {
                info!(group_id = %group_id, user_id = %user_id, "member left group");
            } else {
                info!(group_id = %group_id, user_id = %user_id, actor = %actor, "member removed");
            }
            Ok(())
        })
    }
}

impl RoomManager for MembershipService {
    fn create_room(&self, ctx: &OpContext, actor: &UserId, group_id: &GroupId, room: NewRoom) -> CoreResult<Room> {
        instrument("create_room", || {
            let spec = self.apply_room_defaults(validate_new_room(room)?);
            let now = self.now();

            let (room, creator) = self.store.write(ctx, |tx| {
                tx.require_user(actor)?;
                tx.require_group(group_id)?;
                let requester = require_member(tx, group_id, actor, "create rooms")?;
                guard::ensure(
                    guard::can_create_or_delete_room(requester.role),
                    actor,
                    format!("create room {} in group {}", spec.name, group_id),
                )?;

                if tx.find_room_by_name(group_id, &spec.name)?.is_some() {
                    return Err(CoreError::Conflict(format!(
                        "a room named '{}' already exists in group {}",
                        spec.name, group_id
                    )));
                }

                let room = Room::new(*group_id, spec, now);
                tx.insert_room(&room)?;
                let creator = propagate_room_creation(tx, &room, actor, now)?;
                Ok((room, creator))
            })?;

            record_counter(ROOMS_CREATED, 1);
            info!(
                room_id = %room.id,
                group_id = %group_id,
                room_type = %room.room_type,
                creator = %creator.user_id,
                "room created"
            );
            Ok(room)
        })
    }

    fn get_room(&self, ctx: &OpContext, actor: &UserId, room_id: &RoomId) -> CoreResult<Room> {
        instrument("get_room", || {
            self.store.read(ctx, |tx| {
                tx.require_user(actor)?;
                visible_room(tx, actor, room_id).map(|(room, _)| room)
            })
        })
    }

    fn delete_room(&self, ctx: &OpContext, actor: &UserId, room_id: &RoomId) -> CoreResult<()> {
        instrument("delete_room", || {
            let room = self.store.write(ctx, |tx| {
                tx.require_user(actor)?;
                let (room, _) = managed_room(tx, actor, room_id, "delete")?;
                tx.delete_room(room_id)?;
                Ok(room)
            })?;

            info!(room_id = %room.id, group_id = %room.group_id, actor = %actor, "room deleted");
            Ok(())
        })
    }

    fn list_visible_rooms(&self, ctx: &OpContext, actor: &UserId, group_id: &GroupId) -> CoreResult<Vec<VisibleRoom>> {
        instrument("list_visible_rooms", || {
            self.store.read(ctx, |tx| {
                tx.require_user(actor)?;
                tx.require_group(group_id)?;
                require_member(tx, group_id, actor, "list rooms")?;
                let rooms = tx
                    .list_visible_rooms(group_id, actor)?
                    .into_iter()
                    .map(|(room, membership)| VisibleRoom { room, membership })
                    .collect();
                Ok(rooms)
            })
        })
    }

    fn set_room_status(&self, ctx: &OpContext, actor: &UserId, room_id: &RoomId, status: RoomStatus) -> CoreResult<Room> {
        instrument("set_room_status", || {
            let now = self.now();

            let room = self.store.write(ctx, |tx| {
                tx.require_user(actor)?;
                let (mut room, _) = managed_room(tx, actor, room_id, "change status of")?;
                tx.update_room_status(room_id, status, now)?;
                room.status = status;
                room.updated_at = now;
                Ok(room)
            })?;

            info!(room_id = %room.id, status = status.as_str(), "room status changed");
            Ok(room)
        })
    }

    fn get_room_membership(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> CoreResult<RoomMembership> {
        instrument("get_room_membership", || {
            self.store.read(ctx, |tx| {
                tx.require_user(actor)?;
                let (_, own) = visible_room(tx, actor, room_id)?;
                if user_id == actor {
                    return Ok(own);
                }
                tx.get_room_membership(room_id, user_id)?
                    .ok_or_else(|| CoreError::not_found("room membership", user_id))
            })
        })
    }

    fn update_room_member(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        room_id: &RoomId,
        user_id: &UserId,
        role: Role,
    ) -> CoreResult<RoomMembership> {
        instrument("update_room_member", || {
            let now = self.now();

            let (membership, previous) = self.store.write(ctx, |tx| {
                tx.require_user(actor)?;
                let (room, requester) = visible_room(tx, actor, room_id)?;
                let mut target = tx
                    .get_room_membership(room_id, user_id)?
                    .ok_or_else(|| CoreError::not_found("room membership", user_id))?;

                guard::ensure(
                    guard::can_update_room_member(requester.role, target.role, role, user_id == actor),
                    actor,
                    format!("set {} to {} in room {}", user_id, role, room.name),
                )?;

                tx.update_room_membership_role(room_id, user_id, role, now)?;
                let previous = target.role;
                target.role = role;
                target.updated_at = now;
                Ok((target, previous))
            })?;

            info!(room_id = %room_id, user_id = %user_id, from = %previous, to = %role, "room role changed");
            Ok(membership)
        })
    }

    fn set_room_member_access(
        &self,
        ctx: &OpContext,
        actor: &UserId,
        room_id: &RoomId,
        user_id: &UserId,
        access: RoomAccess,
    ) -> CoreResult<RoomMembership> {
        instrument("set_room_member_access", || {
            if access.can_join && !access.can_see {
                return Err(CoreError::InvalidInput("can_join requires can_see".to_string()));
            }
            let now = self.now();

            let membership = self.store.write(ctx, |tx| {
                tx.require_user(actor)?;
                let (room, requester) = visible_room(tx, actor, room_id)?;

                let existing = tx.get_room_membership(room_id, user_id)?;
                let target_role = match &existing {
                    Some(membership) => membership.role,
                    // opening the room to a group member who has no row yet
                    None => match tx.get_group_membership(&room.group_id, user_id)? {
                        Some(m) if m.is_active() => m.role,
                        _ => return Err(CoreError::not_found("group membership", user_id)),
                    },
                };

                guard::ensure(
                    guard::can_set_room_access(requester.role, target_role),
                    actor,
                    format!("change access of {} to room {}", user_id, room.name),
                )?;

                let membership = match existing {
                    Some(mut membership) => {
                        tx.set_room_membership_access(room_id, user_id, access, now)?;
                        membership.can_see = access.can_see;
                        membership.can_join = access.can_join;
                        membership.updated_at = now;
                        membership
                    }
                    None => {
                        let membership = RoomMembership::new(*room_id, user_id.clone(), target_role, access, now);
                        tx.insert_room_membership(&membership)?;
                        membership
                    }
                };
                Ok(membership)
            })?;

            info!(
                room_id = %room_id,
                user_id = %user_id,
                can_see = access.can_see,
                can_join = access.can_join,
                "room access changed"
            );
            Ok(membership)
        })
    }

    fn can_enter_room(&self, ctx: &OpContext, actor: &UserId, room_id: &RoomId) -> CoreResult<bool> {
        instrument("can_enter_room", || {
            self.store.read(ctx, |tx| {
                tx.require_user(actor)?;
                let (room, membership) = visible_room(tx, actor, room_id)?;
                Ok(guard::can_enter_room(&membership, room.status))
            })
        })
    }
}

impl InviteManager for MembershipService {
    fn create_invite(&self, ctx: &OpContext, actor: &UserId, group_id: &GroupId) -> CoreResult<GroupInvite> {
        instrument("create_invite", || {
            let code = self.next_invite_code()?;
            let now = self.now();

            let invite = self.store.write(ctx, |tx| {
                tx.require_user(actor)?;
                tx.require_group(group_id)?;
                let requester = require_member(tx, group_id, actor, "invite")?;
                guard::ensure(
                    guard::can_invite_to_group(requester.role),
                    actor,
                    format!("invite to group {}", group_id),
                )?;

                let invite = GroupInvite::issue(*group_id, actor.clone(), code, now, self.settings.invite_ttl);
                tx.insert_invite(&invite)?;
                Ok(invite)
            })?;

            record_counter(INVITES_CREATED, 1);
            info!(
                invite_id = %invite.id,
                group_id = %group_id,
                referrer = %actor,
                expires_at = %invite.expires_at,
                "invite created"
            );
            Ok(invite)
        })
    }

    fn list_group_invites(&self, ctx: &OpContext, actor: &UserId, group_id: &GroupId) -> CoreResult<Vec<GroupInvite>> {
        instrument("list_group_invites", || {
            let now = self.now();

            self.store.read(ctx, |tx| {
                tx.require_user(actor)?;
                tx.require_group(group_id)?;
                let requester = require_member(tx, group_id, actor, "view invites")?;
                guard::ensure(
                    guard::can_view_group_invites(requester.role),
                    actor,
                    format!("view invites of group {}", group_id),
                )?;

                let invites = tx
                    .list_group_invites(group_id)?
                    .into_iter()
                    .map(|mut invite| {
                        invite.status = invite.effective_status(now);
                        invite
                    })
                    .collect();
                Ok(invites)
            })
        })
    }

    fn redeem_invite(
        &self,
        ctx: &OpContext,
        redeemer: &UserId,
        group_id: &GroupId,
        code: &str,
        tier: JoinTier,
    ) -> CoreResult<Redemption> {
        let result = instrument("redeem_invite", || {
            let code = validate_invite_code(code)?;
            let now = self.now();

            let (redemption, rooms, new_referral) = self.store.write(ctx, |tx| {
                tx.require_user(redeemer)?;

                let invite = tx.find_pending_invite(group_id, code)?.ok_or_else(|| {
                    CoreError::InvalidInvite("invite code not found or already redeemed".to_string())
                })?;
                invite.ensure_redeemable(now)?;

                if tx.get_group_membership(group_id, redeemer)?.is_some() {
                    return Err(CoreError::Conflict(format!(
                        "{} is already a member of group {}",
                        redeemer, group_id
                    )));
                }

                let membership = GroupMembership::new(*group_id, redeemer.clone(), tier.role(), now);
                tx.insert_group_membership(&membership)?;
                let rooms = propagate_group_join(tx, &membership, now)?;

                if !tx.mark_invite_accepted(&invite.id)? {
                    return Err(CoreError::InvalidInvite("invite has already been accepted".to_string()));
                }

                let new_referral = tx.insert_referral_if_absent(&Referral {
                    user_id: redeemer.clone(),
                    referrer_id: invite.referrer_id.clone(),
                    created_at: now,
                })?;

                let invite = GroupInvite {
                    status: InviteStatus::Accepted,
                    ..invite
                };
                Ok((Redemption { invite, membership }, rooms, new_referral))
            })?;

            record_counter(INVITES_REDEEMED, 1);
            record_counter(MEMBERS_ADDED, 1);
            info!(
                invite_id = %redemption.invite.id,
                group_id = %group_id,
                user_id = %redeemer,
                referrer = %redemption.invite.referrer_id,
                role = %redemption.membership.role,
                rooms,
                new_referral,
                "invite redeemed"
            );
            Ok(redemption)
        });

        if matches!(result, Err(CoreError::InvalidInvite(_))) {
            record_counter(INVITES_REJECTED, 1);
        }
        result
    }

    fn list_referrals(&self, ctx: &OpContext, actor: &UserId) -> CoreResult<Vec<Referral>> {
        instrument("list_referrals", || {
            self.store.read(ctx, |tx| {
                tx.require_user(actor)?;
                tx.list_referrals(actor)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestWorld;
    use std::time::Duration;

    // ===== Groups =====

    #[test]
    fn test_create_group_makes_creator_owner() {
        let world = TestWorld::new();
        let alice = world.user("alice");

        let group = world.service.create_group(&world.ctx, &alice, "  Acme  ").unwrap();
        assert_eq!(group.name, "Acme");

        let membership = world
            .service
            .get_group_membership(&world.ctx, &alice, &group.id, &alice)
            .unwrap();
        assert_eq!(membership.role, Role::Owner);
    }

    #[test]
    fn test_create_group_requires_registered_user() {
        let world = TestWorld::new();
        let result = world.service.create_group(&world.ctx, &UserId::new("ghost"), "Acme");
        assert!(matches!(result, Err(CoreError::NotFound { entity: "user", .. })));
    }

    #[test]
    fn test_create_group_rejects_empty_name() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let result = world.service.create_group(&world.ctx, &alice, "   ");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_default_rooms_seeded_when_enabled() {
        let world = TestWorld::with_settings(ServiceSettings {
            seed_default_rooms: true,
            ..ServiceSettings::default()
        });
        let alice = world.user("alice");
        let group = world.group_owned_by(&alice);

        let rooms = world.service.list_visible_rooms(&world.ctx, &alice, &group.id).unwrap();
        let names: Vec<_> = rooms.iter().map(|r| r.room.name.as_str()).collect();
        assert_eq!(names.len(), 5);
        for (name, _) in DEFAULT_ROOMS {
            assert!(names.contains(&name), "missing {}", name);
        }
        assert!(rooms.iter().all(|r| r.room.capacity == 16 && r.room.deployment_zone == "us-west1-b"));
        assert!(rooms.iter().all(|r| r.membership.role == Role::Owner));
    }

    #[test]
    fn test_non_member_is_forbidden() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let mallory = world.user("mallory");
        let group = world.group_owned_by(&alice);

        let result = world.service.get_group(&world.ctx, &mallory, &group.id);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);

        let result = world.service.list_group_members(&world.ctx, &mallory, &group.id);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_missing_group_is_not_found() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let result = world.service.get_group(&world.ctx, &alice, &GroupId::generate());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_only_owner_deletes_group() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &bob, Role::Admin);

        let result = world.service.delete_group(&world.ctx, &bob, &group.id);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);

        world.service.delete_group(&world.ctx, &alice, &group.id).unwrap();
        let result = world.service.get_group(&world.ctx, &alice, &group.id);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_delete_group_cascades() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &bob, Role::Member);
        let room = world.room(&alice, &group, "general", RoomType::Public);
        world.invite(&alice, &group);

        world.service.delete_group(&world.ctx, &alice, &group.id).unwrap();

        let (members, room_row, room_members, invites) = world
            .service
            .store()
            .read(&world.ctx, |tx| {
                Ok((
                    tx.list_group_members(&group.id)?,
                    tx.get_room(&room.id)?,
                    tx.list_room_members(&room.id)?,
                    tx.list_group_invites(&group.id)?,
                ))
            })
            .unwrap();
        assert!(members.is_empty());
        assert!(room_row.is_none());
        assert!(room_members.is_empty());
        assert!(invites.is_empty());

        assert!(world.service.list_user_groups(&world.ctx, &bob).unwrap().is_empty());
    }

    #[test]
    fn test_list_user_groups_hides_banned() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let open = world.group_owned_by(&alice);
        let closed = world.group_owned_by(&alice);
        world.add_member(&alice, &open, &bob, Role::Member);
        world.add_member(&alice, &closed, &bob, Role::Banned);

        let groups = world.service.list_user_groups(&world.ctx, &bob).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group.id, open.id);
        assert_eq!(groups[0].role, Role::Member);
    }

    // ===== Direct add =====

    #[test]
    fn test_add_member_respects_rank() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let carol = world.user("carol");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &bob, Role::Admin);

        // admins cannot mint peers
        let result = world.service.add_group_member(&world.ctx, &bob, &group.id, &carol, Role::Admin);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);

        let membership = world
            .service
            .add_group_member(&world.ctx, &bob, &group.id, &carol, Role::Moderator)
            .unwrap();
        assert_eq!(membership.role, Role::Moderator);

        let again = world.service.add_group_member(&world.ctx, &alice, &group.id, &carol, Role::Member);
        assert_eq!(again.unwrap_err().kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_add_member_propagates_to_existing_rooms() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        let lobby = world.room(&alice, &group, "lobby", RoomType::Public);
        let staff = world.room(&alice, &group, "staff", RoomType::Private);
        let board = world.room(&alice, &group, "board", RoomType::Secret);

        world.add_member(&alice, &group, &bob, Role::Member);

        let rows = world
            .service
            .store()
            .read(&world.ctx, |tx| {
                Ok(vec![
                    tx.get_room_membership(&lobby.id, &bob)?,
                    tx.get_room_membership(&staff.id, &bob)?,
                    tx.get_room_membership(&board.id, &bob)?,
                ])
            })
            .unwrap();
        let flags: Vec<_> = rows
            .into_iter()
            .map(|m| m.map(|m| (m.role, m.can_see, m.can_join)))
            .collect();
        assert_eq!(
            flags,
            vec![
                Some((Role::Member, true, true)),
                Some((Role::Member, true, false)),
                Some((Role::Member, false, false)),
            ]
        );
    }

    // ===== Role changes =====

    #[test]
    fn test_admin_cannot_promote_to_owner() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let carol = world.user("carol");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &bob, Role::Admin);
        world.add_member(&alice, &group, &carol, Role::Member);

        let result = world
            .service
            .update_group_membership_role(&world.ctx, &bob, &group.id, &carol, Role::Owner);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);

        let promoted = world
            .service
            .update_group_membership_role(&world.ctx, &alice, &group.id, &carol, Role::Owner)
            .unwrap();
        assert_eq!(promoted.role, Role::Owner);
    }

    #[test]
    fn test_self_role_change_rejected() {
        let world = TestWorld::new();
        let a = world.user("a");
        let b = world.user("b");
        let group = world.group_owned_by(&a);
        world.add_member(&a, &group, &b, Role::Member);

        let result = world
            .service
            .update_group_membership_role(&world.ctx, &b, &group.id, &b, Role::Admin);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);

        // even the owner cannot edit their own row
        let result = world
            .service
            .update_group_membership_role(&world.ctx, &a, &group.id, &a, Role::Admin);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);

        let b_now = world.service.get_group_membership(&world.ctx, &a, &group.id, &b).unwrap();
        assert_eq!(b_now.role, Role::Member);
    }

    #[test]
    fn test_group_role_change_not_propagated_to_rooms() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &bob, Role::Member);
        let room = world.room(&alice, &group, "general", RoomType::Public);

        world
            .service
            .update_group_membership_role(&world.ctx, &alice, &group.id, &bob, Role::Moderator)
            .unwrap();

        let membership = world
            .service
            .get_room_membership(&world.ctx, &bob, &room.id, &bob)
            .unwrap();
        assert_eq!(membership.role, Role::Member);
    }

    #[test]
    fn test_banning_hides_rooms() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &bob, Role::Member);
        let room = world.room(&alice, &group, "general", RoomType::Public);
        assert!(world.service.can_enter_room(&world.ctx, &bob, &room.id).unwrap());

        world
            .service
            .update_group_membership_role(&world.ctx, &alice, &group.id, &bob, Role::Banned)
            .unwrap();

        let result = world.service.can_enter_room(&world.ctx, &bob, &room.id);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
        let result = world.service.list_visible_rooms(&world.ctx, &bob, &group.id);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);
    }

    // ===== Removal =====

    #[test]
    fn test_sole_owner_cannot_leave_until_successor() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &bob, Role::Member);

        let result = world.service.remove_group_member(&world.ctx, &alice, &group.id, &alice);
        assert!(matches!(result, Err(CoreError::SoleOwner { .. })));

        world
            .service
            .update_group_membership_role(&world.ctx, &alice, &group.id, &bob, Role::Owner)
            .unwrap();
        world
            .service
            .remove_group_member(&world.ctx, &alice, &group.id, &alice)
            .unwrap();

        let members = world.service.list_group_members(&world.ctx, &bob, &group.id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, bob);
    }

    #[test]
    fn test_member_can_leave() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &bob, Role::Guest);

        world.service.remove_group_member(&world.ctx, &bob, &group.id, &bob).unwrap();
        let result = world.service.get_group(&world.ctx, &bob, &group.id);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_banned_member_cannot_leave() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let eve = world.user("eve");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &eve, Role::Banned);

        let result = world.service.remove_group_member(&world.ctx, &eve, &group.id, &eve);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_kick_requires_admin_and_rank() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let carol = world.user("carol");
        let dave = world.user("dave");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &bob, Role::Moderator);
        world.add_member(&alice, &group, &carol, Role::Admin);
        world.add_member(&alice, &group, &dave, Role::Member);

        let result = world.service.remove_group_member(&world.ctx, &bob, &group.id, &dave);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);

        world.service.remove_group_member(&world.ctx, &carol, &group.id, &dave).unwrap();

        let result = world.service.remove_group_member(&world.ctx, &carol, &group.id, &alice);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_removal_deletes_room_memberships_in_group_only() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let first = world.group_owned_by(&alice);
        let second = world.group_owned_by(&alice);
        world.add_member(&alice, &first, &bob, Role::Member);
        world.add_member(&alice, &second, &bob, Role::Member);
        let kept = world.room(&alice, &second, "general", RoomType::Public);
        let dropped = world.room(&alice, &first, "general", RoomType::Public);

        world.service.remove_group_member(&world.ctx, &alice, &first.id, &bob).unwrap();

        let (gone, still) = world
            .service
            .store()
            .read(&world.ctx, |tx| {
                Ok((tx.get_room_membership(&dropped.id, &bob)?, tx.get_room_membership(&kept.id, &bob)?))
            })
            .unwrap();
        assert!(gone.is_none());
        assert!(still.is_some());
    }

    // ===== Rooms =====

    #[test]
    fn test_private_room_scenario() {
        let world = TestWorld::new();
        let a = world.user("a");
        let b = world.user("b");
        let group = world.group_owned_by(&a);
        world.add_member(&a, &group, &b, Role::Member);

        let room = world.room(&a, &group, "planning", RoomType::Private);

        let a_row = world.service.get_room_membership(&world.ctx, &a, &room.id, &a).unwrap();
        assert_eq!((a_row.role, a_row.can_see, a_row.can_join), (Role::Owner, true, true));
        let b_row = world.service.get_room_membership(&world.ctx, &a, &room.id, &b).unwrap();
        assert_eq!((b_row.role, b_row.can_see, b_row.can_join), (Role::Member, true, false));

        assert!(!world.service.can_enter_room(&world.ctx, &b, &room.id).unwrap());
        assert!(world.service.can_enter_room(&world.ctx, &a, &room.id).unwrap());
    }

    #[test]
    fn test_public_room_with_n_members() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let group = world.group_owned_by(&alice);
        let names = ["bob", "carol", "dave"];
        for name in names {
            let user = world.user(name);
            world.add_member(&alice, &group, &user, Role::Member);
        }
        let eve = world.user("eve");
        world.add_member(&alice, &group, &eve, Role::Banned);

        let creator = world.user("admin");
        world.add_member(&alice, &group, &creator, Role::Admin);
        let room = world.room(&creator, &group, "all-hands", RoomType::Public);

        let rows = world
            .service
            .store()
            .read(&world.ctx, |tx| tx.list_room_members(&room.id))
            .unwrap();
        // alice + three members + creator; the banned member is skipped
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|m| m.can_join));
        assert!(rows.iter().all(|m| m.user_id != eve));
    }

    #[test]
    fn test_secret_room_is_not_found_for_others() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &bob, Role::Member);
        let room = world.room(&alice, &group, "board", RoomType::Secret);

        let result = world.service.get_room(&world.ctx, &bob, &room.id);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
        let listed = world.service.list_visible_rooms(&world.ctx, &bob, &group.id).unwrap();
        assert!(listed.is_empty());

        // opening it to bob explicitly
        world
            .service
            .set_room_member_access(&world.ctx, &alice, &room.id, &bob, RoomAccess::FULL)
            .unwrap();
        assert!(world.service.can_enter_room(&world.ctx, &bob, &room.id).unwrap());
    }

    #[test]
    fn test_room_creation_requires_admin() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &bob, Role::Moderator);

        let result = world
            .service
            .create_room(&world.ctx, &bob, &group.id, NewRoom::new("mods", RoomType::Public));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_duplicate_room_name() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let first = world.group_owned_by(&alice);
        let second = world.group_owned_by(&alice);
        world.room(&alice, &first, "general", RoomType::Public);

        let result = world
            .service
            .create_room(&world.ctx, &alice, &first.id, NewRoom::new("general", RoomType::Private));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Conflict);

        world.room(&alice, &second, "general", RoomType::Public);
    }

    #[test]
    fn test_room_validation_and_defaults() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let group = world.group_owned_by(&alice);

        let result = world.service.create_room(
            &world.ctx,
            &alice,
            &group.id,
            NewRoom::new("tiny", RoomType::Public).with_capacity(0),
        );
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidInput);

        let room = world
            .service
            .create_room(&world.ctx, &alice, &group.id, NewRoom::new("standup", RoomType::Public).with_description("  "))
            .unwrap();
        assert_eq!(room.capacity, DEFAULT_ROOM_CAPACITY);
        assert_eq!(room.deployment_zone, DEFAULT_DEPLOYMENT_ZONE);
        assert!(room.description.is_none());
    }

    #[test]
    fn test_inactive_room_cannot_be_entered() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let group = world.group_owned_by(&alice);
        let room = world.room(&alice, &group, "old", RoomType::Public);

        let updated = world
            .service
            .set_room_status(&world.ctx, &alice, &room.id, RoomStatus::Inactive)
            .unwrap();
        assert_eq!(updated.status, RoomStatus::Inactive);

        // still listed, no longer enterable
        assert_eq!(world.service.list_visible_rooms(&world.ctx, &alice, &group.id).unwrap().len(), 1);
        assert!(!world.service.can_enter_room(&world.ctx, &alice, &room.id).unwrap());
    }

    #[test]
    fn test_delete_room() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &bob, Role::Member);
        let room = world.room(&alice, &group, "general", RoomType::Public);

        let result = world.service.delete_room(&world.ctx, &bob, &room.id);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);

        world.service.delete_room(&world.ctx, &alice, &room.id).unwrap();
        let result = world.service.get_room(&world.ctx, &alice, &room.id);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_update_room_member() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &bob, Role::Member);
        let room = world.room(&alice, &group, "general", RoomType::Public);

        let updated = world
            .service
            .update_room_member(&world.ctx, &alice, &room.id, &bob, Role::Moderator)
            .unwrap();
        assert_eq!(updated.role, Role::Moderator);

        // room owner may not demote themselves
        let result = world
            .service
            .update_room_member(&world.ctx, &alice, &room.id, &alice, Role::Admin);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);

        // a moderator cannot raise a peer
        let result = world
            .service
            .update_room_member(&world.ctx, &bob, &room.id, &bob, Role::Admin);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);

        // group role is untouched
        let group_row = world.service.get_group_membership(&world.ctx, &alice, &group.id, &bob).unwrap();
        assert_eq!(group_row.role, Role::Member);
    }

    #[test]
    fn test_set_access_validation() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &bob, Role::Member);
        let room = world.room(&alice, &group, "general", RoomType::Private);

        let result = world.service.set_room_member_access(
            &world.ctx,
            &alice,
            &room.id,
            &bob,
            RoomAccess { can_see: false, can_join: true },
        );
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidInput);

        let result = world
            .service
            .set_room_member_access(&world.ctx, &bob, &room.id, &bob, RoomAccess::FULL);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);
    }

    // ===== Invites =====

    #[test]
    fn test_invite_requires_admin() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &bob, Role::Moderator);

        let result = world.service.create_invite(&world.ctx, &bob, &group.id);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);

        let result = world.service.list_group_invites(&world.ctx, &bob, &group.id);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_invite_code_shape_and_expiry() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let group = world.group_owned_by(&alice);

        let invite = world.invite(&alice, &group);
        assert_eq!(invite.code.len(), 16);
        assert!(invite.code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(invite.status, InviteStatus::Pending);
        assert_eq!(
            invite.expires_at.as_millis() - invite.created_at.as_millis(),
            730 * 3600 * 1000
        );
    }

    #[test]
    fn test_redeem_once() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let carol = world.user("carol");
        let group = world.group_owned_by(&alice);
        world.room(&alice, &group, "general", RoomType::Public);
        let invite = world.invite(&alice, &group);

        let redemption = world
            .service
            .redeem_invite(&world.ctx, &bob, &group.id, &invite.code, JoinTier::Member)
            .unwrap();
        assert_eq!(redemption.invite.status, InviteStatus::Accepted);
        assert_eq!(redemption.membership.role, Role::Member);
        assert_eq!(world.service.list_visible_rooms(&world.ctx, &bob, &group.id).unwrap().len(), 1);

        let again = world
            .service
            .redeem_invite(&world.ctx, &carol, &group.id, &invite.code, JoinTier::Member);
        assert_eq!(again.unwrap_err().kind(), ErrorKind::InvalidInvite);

        let listed = world.service.list_group_invites(&world.ctx, &alice, &group.id).unwrap();
        assert_eq!(listed[0].status, InviteStatus::Accepted);
    }

    #[test]
    fn test_guest_tier_redemption() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        let invite = world.invite(&alice, &group);

        let redemption = world
            .service
            .redeem_invite(&world.ctx, &bob, &group.id, &invite.code, JoinTier::Guest)
            .unwrap();
        assert_eq!(redemption.membership.role, Role::Guest);
    }

    #[test]
    fn test_invite_scoped_to_group() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        let other = world.group_owned_by(&alice);
        let invite = world.invite(&alice, &group);

        let result = world
            .service
            .redeem_invite(&world.ctx, &bob, &other.id, &invite.code, JoinTier::Member);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidInvite);

        let result = world
            .service
            .redeem_invite(&world.ctx, &bob, &group.id, "not-a-code", JoinTier::Member);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidInvite);
    }

    #[test]
    fn test_expired_invite_rejected_and_listed_expired() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        let invite = world.invite(&alice, &group);

        world.clock.advance(Duration::from_secs(730 * 3600));

        let result = world
            .service
            .redeem_invite(&world.ctx, &bob, &group.id, &invite.code, JoinTier::Member);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidInvite);

        let listed = world.service.list_group_invites(&world.ctx, &alice, &group.id).unwrap();
        assert_eq!(listed[0].status, InviteStatus::Expired);

        // the stored row is untouched
        let stored = world
            .service
            .store()
            .read(&world.ctx, |tx| tx.find_pending_invite(&group.id, &invite.code))
            .unwrap();
        assert!(stored.is_some());
    }

    #[test]
    fn test_existing_member_cannot_redeem() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        world.add_member(&alice, &group, &bob, Role::Member);
        let invite = world.invite(&alice, &group);

        let result = world
            .service
            .redeem_invite(&world.ctx, &bob, &group.id, &invite.code, JoinTier::Member);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Conflict);

        let listed = world.service.list_group_invites(&world.ctx, &alice, &group.id).unwrap();
        assert_eq!(listed[0].status, InviteStatus::Pending);
    }

    #[test]
    fn test_one_referral_per_referrer() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let first = world.group_owned_by(&alice);
        let second = world.group_owned_by(&alice);

        for group in [&first, &second] {
            let invite = world.invite(&alice, group);
            world
                .service
                .redeem_invite(&world.ctx, &bob, &group.id, &invite.code, JoinTier::Member)
                .unwrap();
        }

        let referrals = world.service.list_referrals(&world.ctx, &alice).unwrap();
        assert_eq!(referrals.len(), 1);
        assert_eq!(referrals[0].user_id, bob);
    }

    // ===== Cancellation =====

    #[test]
    fn test_cancelled_context_writes_nothing() {
        let world = TestWorld::new();
        let alice = world.user("alice");
        let bob = world.user("bob");
        let group = world.group_owned_by(&alice);
        let invite = world.invite(&alice, &group);

        let ctx = OpContext::background();
        ctx.cancel();
        let result = world
            .service
            .redeem_invite(&ctx, &bob, &group.id, &invite.code, JoinTier::Member);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);

        let members = world.service.list_group_members(&world.ctx, &alice, &group.id).unwrap();
        assert_eq!(members.len(), 1);
        let listed = world.service.list_group_invites(&world.ctx, &alice, &group.id).unwrap();
        assert_eq!(listed[0].status, InviteStatus::Pending);
    }

    #[test]
    fn test_expired_deadline_is_cancelled() {
        let world = TestWorld::new();
        let alice = world.user("alice");

        let ctx = OpContext::with_timeout(Duration::ZERO);
        let result = world.service.create_group(&ctx, &alice, "Acme");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
        assert!(world.service.list_user_groups(&world.ctx, &alice).unwrap().is_empty());
    }

    // ===== Users =====

    #[test]
    fn test_register_user() {
        let world = TestWorld::new();
        let user = world
            .service
            .register_user(&world.ctx, UserId::new(" zoe "), "Zoe", "zoe@example.com")
            .unwrap();
        assert_eq!(user.id.as_str(), "zoe");

        let again = world
            .service
            .register_user(&world.ctx, UserId::new("zoe"), "Zoe", "zoe@example.com");
        assert_eq!(again.unwrap_err().kind(), ErrorKind::Conflict);

        let blank = world.service.register_user(&world.ctx, UserId::new(""), "Nobody", "");
        assert_eq!(blank.unwrap_err().kind(), ErrorKind::InvalidInput);
    }
}

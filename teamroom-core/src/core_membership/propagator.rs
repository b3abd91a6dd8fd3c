//! Room visibility propagation
//!
//! Seeds room memberships when a room is created and when a user joins a
//! group. The planning functions are pure; the `propagate_*` functions write
//! the planned rows inside the caller's transaction.

use super::errors::{CoreError, CoreResult};
use super::group::GroupMembership;
use super::role::Role;
use super::room::{Room, RoomAccess, RoomMembership};
use super::storage::StoreTx;
use super::types::{Timestamp, UserId};
use tracing::debug;

/// Memberships for a freshly created room
///
/// Every non-banned group member gets their group role and the room type's
/// default flags. The creator always gets `owner` with full access.
pub fn seed_room_memberships(
    room: &Room,
    creator: &UserId,
    group_members: &[GroupMembership],
    now: Timestamp,
) -> Vec<RoomMembership> {
    let access = room.room_type.default_access();

    let mut memberships: Vec<RoomMembership> = group_members
        .iter()
        .filter(|m| m.is_active() && &m.user_id != creator)
        .map(|m| RoomMembership::new(room.id, m.user_id.clone(), m.role, access, now))
        .collect();

    memberships.push(RoomMembership::new(
        room.id,
        creator.clone(),
        Role::Owner,
        RoomAccess::FULL,
        now,
    ));
    memberships
}

/// Memberships for a user who just joined the group owning `rooms`
///
/// A banned joiner gets none.
pub fn memberships_for_new_group_member(
    membership: &GroupMembership,
    rooms: &[Room],
    now: Timestamp,
) -> Vec<RoomMembership> {
    if !membership.is_active() {
        return Vec::new();
    }

    rooms
        .iter()
        .map(|room| {
            RoomMembership::new(
                room.id,
                membership.user_id.clone(),
                membership.role,
                room.room_type.default_access(),
                now,
            )
        })
        .collect()
}

/// Seed and persist memberships for `room`, returning the creator's
pub fn propagate_room_creation(
    tx: &StoreTx<'_>,
    room: &Room,
    creator: &UserId,
    now: Timestamp,
) -> CoreResult<RoomMembership> {
    let members = tx.list_group_members(&room.group_id)?;
    let mut memberships = seed_room_memberships(room, creator, &members, now);
    let inserted = tx.insert_room_memberships(&memberships)?;

    debug!(room_id = %room.id, group_id = %room.group_id, inserted, "seeded room memberships");

    // the creator's row is always pushed last
    let creator_membership = memberships.pop().ok_or_else(|| {
        CoreError::Internal("room seeding produced no creator membership".to_string())
    })?;
    Ok(creator_membership)
}

/// Persist room memberships for a new group member across every room of the group
pub fn propagate_group_join(
    tx: &StoreTx<'_>,
    membership: &GroupMembership,
    now: Timestamp,
) -> CoreResult<usize> {
    let rooms = tx.list_group_rooms(&membership.group_id)?;
    let memberships = memberships_for_new_group_member(membership, &rooms, now);
    let inserted = tx.insert_room_memberships(&memberships)?;

    debug!(
        group_id = %membership.group_id,
        user_id = %membership.user_id,
        inserted,
        "propagated group join to rooms"
    );
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_membership::room::{NewRoom, RoomType};
    use crate::core_membership::types::GroupId;

    fn members(group_id: GroupId, roles: &[(&str, Role)]) -> Vec<GroupMembership> {
        roles
            .iter()
            .map(|(name, role)| GroupMembership::new(group_id, UserId::new(*name), *role, Timestamp::from_millis(0)))
            .collect()
    }

    fn room(group_id: GroupId, room_type: RoomType) -> Room {
        Room::new(group_id, NewRoom::new("general", room_type), Timestamp::from_millis(1))
    }

    fn find<'a>(rows: &'a [RoomMembership], user: &str) -> Option<&'a RoomMembership> {
        rows.iter().find(|m| m.user_id.as_str() == user)
    }

    #[test]
    fn test_public_room_includes_every_active_member() {
        let group_id = GroupId::generate();
        let group = members(
            group_id,
            &[("alice", Role::Owner), ("bob", Role::Member), ("carol", Role::Guest), ("dave", Role::Admin)],
        );
        let room = room(group_id, RoomType::Public);

        let rows = seed_room_memberships(&room, &UserId::new("dave"), &group, Timestamp::from_millis(2));

        // three other members plus the creator
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|m| m.can_join && m.can_see));
        assert_eq!(find(&rows, "dave").unwrap().role, Role::Owner);
        assert_eq!(find(&rows, "carol").unwrap().role, Role::Guest);
    }

    #[test]
    fn test_banned_members_are_skipped() {
        let group_id = GroupId::generate();
        let group = members(group_id, &[("alice", Role::Owner), ("eve", Role::Banned)]);
        let rows = seed_room_memberships(&room(group_id, RoomType::Public), &UserId::new("alice"), &group, Timestamp::from_millis(2));

        assert_eq!(rows.len(), 1);
        assert!(find(&rows, "eve").is_none());
    }

    #[test]
    fn test_secret_room_hidden_from_all_but_creator() {
        let group_id = GroupId::generate();
        let group = members(group_id, &[("alice", Role::Owner), ("bob", Role::Admin), ("carol", Role::Member)]);
        let rows = seed_room_memberships(&room(group_id, RoomType::Secret), &UserId::new("bob"), &group, Timestamp::from_millis(2));

        for row in &rows {
            if row.user_id.as_str() == "bob" {
                assert_eq!(row.access(), RoomAccess::FULL);
            } else {
                assert_eq!(row.access(), RoomAccess::NONE);
            }
        }
    }

    #[test]
    fn test_private_room_scenario() {
        let group_id = GroupId::generate();
        let group = members(group_id, &[("a", Role::Owner), ("b", Role::Member)]);
        let rows = seed_room_memberships(&room(group_id, RoomType::Private), &UserId::new("a"), &group, Timestamp::from_millis(2));

        let a = find(&rows, "a").unwrap();
        assert_eq!((a.role, a.can_see, a.can_join), (Role::Owner, true, true));
        let b = find(&rows, "b").unwrap();
        assert_eq!((b.role, b.can_see, b.can_join), (Role::Member, true, false));
    }

    #[test]
    fn test_empty_group_seeds_only_creator() {
        let group_id = GroupId::generate();
        let rows = seed_room_memberships(&room(group_id, RoomType::Private), &UserId::new("alice"), &[], Timestamp::from_millis(2));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].role, Role::Owner);
    }

    #[test]
    fn test_new_member_gets_every_room() {
        let group_id = GroupId::generate();
        let rooms = vec![
            Room::new(group_id, NewRoom::new("lobby", RoomType::Public), Timestamp::from_millis(1)),
            Room::new(group_id, NewRoom::new("staff", RoomType::Private), Timestamp::from_millis(1)),
            Room::new(group_id, NewRoom::new("board", RoomType::Secret), Timestamp::from_millis(1)),
        ];
        let joiner = GroupMembership::new(group_id, UserId::new("bob"), Role::Guest, Timestamp::from_millis(5));

        let rows = memberships_for_new_group_member(&joiner, &rooms, Timestamp::from_millis(5));

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|m| m.role == Role::Guest));
        let flags: Vec<_> = rows.iter().map(|m| (m.can_see, m.can_join)).collect();
        assert_eq!(flags, vec![(true, true), (true, false), (false, false)]);
    }

    #[test]
    fn test_banned_joiner_gets_no_rooms() {
        let group_id = GroupId::generate();
        let rooms = vec![Room::new(group_id, NewRoom::new("lobby", RoomType::Public), Timestamp::from_millis(1))];
        let joiner = GroupMembership::new(group_id, UserId::new("eve"), Role::Banned, Timestamp::from_millis(5));

        assert!(memberships_for_new_group_member(&joiner, &rooms, Timestamp::from_millis(5)).is_empty());
    }
}

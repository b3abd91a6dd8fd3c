//! SQL-based storage for users, groups, rooms and invites
//!
//! All access goes through a unit of work: [`SqlStore::read`] and
//! [`SqlStore::write`] open one transaction, hand the closure a [`StoreTx`],
//! and commit only if the closure succeeds. Dropping the transaction on any
//! error rolls it back.

use super::migrations;
use crate::config::StoreConfig;
use crate::core_membership::context::OpContext;
use crate::core_membership::errors::{CoreError, CoreResult};
use crate::core_membership::group::{Group, GroupMembership};
use crate::core_membership::invite::{GroupInvite, Referral};
use crate::core_membership::role::Role;
use crate::core_membership::room::{RoomAccess, Room, RoomMembership, RoomStatus};
use crate::core_membership::types::{GroupId, InviteId, RoomId, Timestamp, User, UserId};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::time::Duration;
use tracing::debug;

pub type SqlitePool = Pool<SqliteConnectionManager>;

const USER_COLUMNS: &str = "id, display_name, email, created_at";
const GROUP_COLUMNS: &str = "g.id, g.name, g.created_at, g.updated_at";
const GROUP_MEMBER_COLUMNS: &str = "group_id, user_id, role, joined_at, updated_at";
const ROOM_COLUMNS: &str = "r.id, r.group_id, r.name, r.description, r.capacity, r.room_type, \
                            r.deployment_zone, r.status, r.created_at, r.updated_at";
const ROOM_MEMBER_COLUMNS: &str = "rm.room_id, rm.user_id, rm.role, rm.can_see, rm.can_join, rm.updated_at";
const INVITE_COLUMNS: &str = "id, code, group_id, referrer_id, created_at, expires_at, status";

/// Pooled SQLite store
#[derive(Clone)]
pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    /// Wrap an existing pool, running pending migrations
    pub fn new(pool: SqlitePool) -> CoreResult<Self> {
        migrations::migrate(&pool)?;
        Ok(Self { pool })
    }

    /// Open (or create) the database file named in `config`
    pub fn open(config: &StoreConfig) -> CoreResult<Self> {
        let busy_timeout = config.busy_timeout;
        let manager = SqliteConnectionManager::file(&config.database_path).with_init(move |conn| {
            init_connection(conn, busy_timeout)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
            Ok(())
        });
        let pool = Pool::builder().max_size(config.pool_size).build(manager)?;

        debug!(path = %config.database_path.display(), pool_size = config.pool_size, "opened store");
        Self::new(pool)
    }

    /// Create a fresh in-memory store
    ///
    /// Backed by a single connection, since each in-memory connection is a
    /// separate database.
    pub fn memory() -> CoreResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| init_connection(conn, Duration::from_secs(5)));
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;
        Self::new(pool)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run `f` inside a deferred (read) transaction
    pub fn read<T, F>(&self, ctx: &OpContext, f: F) -> CoreResult<T>
    where
        F: FnOnce(&StoreTx<'_>) -> CoreResult<T>,
    {
        self.run(ctx, TransactionBehavior::Deferred, f)
    }

    /// Run `f` inside an immediate (write-locked) transaction
    ///
    /// Writers are serialized by SQLite, so every read made in `f` stays
    /// valid until commit.
    pub fn write<T, F>(&self, ctx: &OpContext, f: F) -> CoreResult<T>
    where
        F: FnOnce(&StoreTx<'_>) -> CoreResult<T>,
    {
        self.run(ctx, TransactionBehavior::Immediate, f)
    }

    fn run<T, F>(&self, ctx: &OpContext, behavior: TransactionBehavior, f: F) -> CoreResult<T>
    where
        F: FnOnce(&StoreTx<'_>) -> CoreResult<T>,
    {
        ctx.checkpoint()?;
        let mut conn = self.pool.get()?;
        let tx = StoreTx {
            tx: conn.transaction_with_behavior(behavior)?,
            ctx,
        };

        let value = f(&tx)?;

        // a cancellation that raced the last statement still wins
        ctx.checkpoint()?;
        tx.tx.commit()?;
        Ok(value)
    }
}

fn init_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(busy_timeout)
}

/// One open transaction plus the context it runs under
///
/// Every statement checks the context first, so a cancelled or expired
/// operation stops at its next query and the whole unit rolls back.
pub struct StoreTx<'a> {
    tx: Transaction<'a>,
    ctx: &'a OpContext,
}

impl StoreTx<'_> {
    fn conn(&self) -> CoreResult<&Connection> {
        self.ctx.checkpoint()?;
        Ok(&*self.tx)
    }

    // ===== Users =====

    pub fn insert_user(&self, user: &User) -> CoreResult<()> {
        self.conn()?.execute(
            "INSERT INTO users (id, display_name, email, created_at) VALUES (?, ?, ?, ?)",
            params![user.id, user.display_name, user.email, user.created_at],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &UserId) -> CoreResult<Option<User>> {
        let user = self
            .conn()?
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
                params![user_id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Load a user or fail with `NotFound`
    pub fn require_user(&self, user_id: &UserId) -> CoreResult<User> {
        self.get_user(user_id)?
            .ok_or_else(|| CoreError::not_found("user", user_id))
    }

    // ===== Groups =====

    pub fn insert_group(&self, group: &Group) -> CoreResult<()> {
        self.conn()?.execute(
            "INSERT INTO groups (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)",
            params![group.id, group.name, group.created_at, group.updated_at],
        )?;
        Ok(())
    }

    pub fn get_group(&self, group_id: &GroupId) -> CoreResult<Option<Group>> {
        let group = self
            .conn()?
            .query_row(
                &format!("SELECT {} FROM groups g WHERE g.id = ?", GROUP_COLUMNS),
                params![group_id],
                |row| group_from_row(row, 0),
            )
            .optional()?;
        Ok(group)
    }

    /// Load a group or fail with `NotFound`
    pub fn require_group(&self, group_id: &GroupId) -> CoreResult<Group> {
        self.get_group(group_id)?
            .ok_or_else(|| CoreError::not_found("group", group_id))
    }

    /// Delete a group; memberships, rooms and invites cascade
    pub fn delete_group(&self, group_id: &GroupId) -> CoreResult<bool> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM groups WHERE id = ?", params![group_id])?;
        Ok(deleted > 0)
    }

    /// Groups the user belongs to, with their role in each
    pub fn list_user_groups(&self, user_id: &UserId) -> CoreResult<Vec<(Group, Role)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, gm.role FROM groups g
             JOIN group_memberships gm ON gm.group_id = g.id
             WHERE gm.user_id = ?
             ORDER BY g.created_at, g.name",
            GROUP_COLUMNS
        ))?;
        let groups = stmt
            .query_map(params![user_id], |row| Ok((group_from_row(row, 0)?, row.get(4)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(groups)
    }

    // ===== Group memberships =====

    pub fn get_group_membership(
        &self,
        group_id: &GroupId,
        user_id: &UserId,
    ) -> CoreResult<Option<GroupMembership>> {
        let membership = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {} FROM group_memberships WHERE group_id = ? AND user_id = ?",
                    GROUP_MEMBER_COLUMNS
                ),
                params![group_id, user_id],
                group_membership_from_row,
            )
            .optional()?;
        Ok(membership)
    }

    /// Insert a membership; an existing (group, user) row yields `Conflict`
    pub fn insert_group_membership(&self, membership: &GroupMembership) -> CoreResult<()> {
        self.conn()?
            .execute(
                "INSERT INTO group_memberships (group_id, user_id, role, joined_at, updated_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    membership.group_id,
                    membership.user_id,
                    membership.role,
                    membership.joined_at,
                    membership.updated_at,
                ],
            )
            .map_err(|e| match CoreError::from(e) {
                CoreError::Conflict(_) => CoreError::Conflict(format!(
                    "{} is already a member of group {}",
                    membership.user_id, membership.group_id
                )),
                other => other,
            })?;
        Ok(())
    }

    /// Unconditional role write; callers consult the guard first
    pub fn update_group_membership_role(
        &self,
        group_id: &GroupId,
        user_id: &UserId,
        role: Role,
        now: Timestamp,
    ) -> CoreResult<bool> {
        let updated = self.conn()?.execute(
            "UPDATE group_memberships SET role = ?, updated_at = ? WHERE group_id = ? AND user_id = ?",
            params![role, now, group_id, user_id],
        )?;
        Ok(updated > 0)
    }

    /// Remove a membership together with the user's room memberships in that group
    pub fn delete_group_membership(&self, group_id: &GroupId, user_id: &UserId) -> CoreResult<bool> {
        let conn = self.conn()?;
        let rooms = conn.execute(
            "DELETE FROM room_memberships
             WHERE user_id = ?1 AND room_id IN (SELECT id FROM rooms WHERE group_id = ?2)",
            params![user_id, group_id],
        )?;
        let deleted = conn.execute(
            "DELETE FROM group_memberships WHERE group_id = ? AND user_id = ?",
            params![group_id, user_id],
        )?;
        debug!(group_id = %group_id, user_id = %user_id, room_memberships = rooms, "deleted group membership");
        Ok(deleted > 0)
    }

    pub fn list_group_members(&self, group_id: &GroupId) -> CoreResult<Vec<GroupMembership>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM group_memberships WHERE group_id = ? ORDER BY joined_at, user_id",
            GROUP_MEMBER_COLUMNS
        ))?;
        let members = stmt
            .query_map(params![group_id], group_membership_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    }

    pub fn count_group_members_with_role(&self, group_id: &GroupId, role: Role) -> CoreResult<u32> {
        let count = self.conn()?.query_row(
            "SELECT COUNT(*) FROM group_memberships WHERE group_id = ? AND role = ?",
            params![group_id, role],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ===== Rooms =====

    /// Insert a room; a duplicate name within the group yields `Conflict`
    pub fn insert_room(&self, room: &Room) -> CoreResult<()> {
        self.conn()?
            .execute(
                "INSERT INTO rooms (id, group_id, name, description, capacity, room_type,
                                    deployment_zone, status, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    room.id,
                    room.group_id,
                    room.name,
                    room.description,
                    room.capacity,
                    room.room_type,
                    room.deployment_zone,
                    room.status,
                    room.created_at,
                    room.updated_at,
                ],
            )
            .map_err(|e| match CoreError::from(e) {
                CoreError::Conflict(_) => CoreError::Conflict(format!(
                    "a room named '{}' already exists in group {}",
                    room.name, room.group_id
                )),
                other => other,
            })?;
        Ok(())
    }

    pub fn get_room(&self, room_id: &RoomId) -> CoreResult<Option<Room>> {
        let room = self
            .conn()?
            .query_row(
                &format!("SELECT {} FROM rooms r WHERE r.id = ?", ROOM_COLUMNS),
                params![room_id],
                |row| room_from_row(row, 0),
            )
            .optional()?;
        Ok(room)
    }

    pub fn find_room_by_name(&self, group_id: &GroupId, name: &str) -> CoreResult<Option<Room>> {
        let room = self
            .conn()?
            .query_row(
                &format!("SELECT {} FROM rooms r WHERE r.group_id = ? AND r.name = ?", ROOM_COLUMNS),
                params![group_id, name],
                |row| room_from_row(row, 0),
            )
            .optional()?;
        Ok(room)
    }

    /// Delete a room; its memberships cascade
    pub fn delete_room(&self, room_id: &RoomId) -> CoreResult<bool> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM rooms WHERE id = ?", params![room_id])?;
        Ok(deleted > 0)
    }

    pub fn list_group_rooms(&self, group_id: &GroupId) -> CoreResult<Vec<Room>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM rooms r WHERE r.group_id = ? ORDER BY r.created_at, r.name",
            ROOM_COLUMNS
        ))?;
        let rooms = stmt
            .query_map(params![group_id], |row| room_from_row(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rooms)
    }

    pub fn update_room_status(&self, room_id: &RoomId, status: RoomStatus, now: Timestamp) -> CoreResult<bool> {
        let updated = self.conn()?.execute(
            "UPDATE rooms SET status = ?, updated_at = ? WHERE id = ?",
            params![status, now, room_id],
        )?;
        Ok(updated > 0)
    }

    /// Rooms of a group the user may see, paired with their membership
    pub fn list_visible_rooms(
        &self,
        group_id: &GroupId,
        user_id: &UserId,
    ) -> CoreResult<Vec<(Room, RoomMembership)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {} FROM rooms r
             JOIN room_memberships rm ON rm.room_id = r.id
             WHERE r.group_id = ? AND rm.user_id = ? AND rm.can_see = 1 AND rm.role > ?
             ORDER BY r.created_at, r.name",
            ROOM_COLUMNS, ROOM_MEMBER_COLUMNS
        ))?;
        let rooms = stmt
            .query_map(params![group_id, user_id, Role::Banned], |row| {
                Ok((room_from_row(row, 0)?, room_membership_from_row(row, 10)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rooms)
    }

    // ===== Room memberships =====

    pub fn get_room_membership(&self, room_id: &RoomId, user_id: &UserId) -> CoreResult<Option<RoomMembership>> {
        let membership = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {} FROM room_memberships rm WHERE rm.room_id = ? AND rm.user_id = ?",
                    ROOM_MEMBER_COLUMNS
                ),
                params![room_id, user_id],
                |row| room_membership_from_row(row, 0),
            )
            .optional()?;
        Ok(membership)
    }

    pub fn insert_room_membership(&self, membership: &RoomMembership) -> CoreResult<()> {
        self.insert_room_memberships(std::slice::from_ref(membership))
            .map(|_| ())
    }

    /// Insert many room memberships with one prepared statement
    pub fn insert_room_memberships(&self, memberships: &[RoomMembership]) -> CoreResult<usize> {
        if memberships.is_empty() {
            return Ok(0);
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "INSERT INTO room_memberships (room_id, user_id, role, can_see, can_join, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )?;
        for m in memberships {
            self.ctx.checkpoint()?;
            stmt.execute(params![m.room_id, m.user_id, m.role, m.can_see, m.can_join, m.updated_at])?;
        }
        Ok(memberships.len())
    }

    pub fn update_room_membership_role(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        role: Role,
        now: Timestamp,
    ) -> CoreResult<bool> {
        let updated = self.conn()?.execute(
            "UPDATE room_memberships SET role = ?, updated_at = ? WHERE room_id = ? AND user_id = ?",
            params![role, now, room_id, user_id],
        )?;
        Ok(updated > 0)
    }

    pub fn set_room_membership_access(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        access: RoomAccess,
        now: Timestamp,
    ) -> CoreResult<bool> {
        let updated = self.conn()?.execute(
            "UPDATE room_memberships SET can_see = ?, can_join = ?, updated_at = ?
             WHERE room_id = ? AND user_id = ?",
            params![access.can_see, access.can_join, now, room_id, user_id],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_room_membership(&self, room_id: &RoomId, user_id: &UserId) -> CoreResult<bool> {
        let deleted = self.conn()?.execute(
            "DELETE FROM room_memberships WHERE room_id = ? AND user_id = ?",
            params![room_id, user_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn list_room_members(&self, room_id: &RoomId) -> CoreResult<Vec<RoomMembership>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM room_memberships rm WHERE rm.room_id = ? ORDER BY rm.user_id",
            ROOM_MEMBER_COLUMNS
        ))?;
        let members = stmt
            .query_map(params![room_id], |row| room_membership_from_row(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    }

    // ===== Invites =====

    pub fn insert_invite(&self, invite: &GroupInvite) -> CoreResult<()> {
        self.conn()?.execute(
            "INSERT INTO group_invites (id, code, group_id, referrer_id, created_at, expires_at, status)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                invite.id,
                invite.code,
                invite.group_id,
                invite.referrer_id,
                invite.created_at,
                invite.expires_at,
                invite.status,
            ],
        )?;
        Ok(())
    }

    /// The pending invite carrying `code` in `group_id`, if any
    pub fn find_pending_invite(&self, group_id: &GroupId, code: &str) -> CoreResult<Option<GroupInvite>> {
        let invite = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {} FROM group_invites WHERE group_id = ? AND code = ? AND status = 'pending'",
                    INVITE_COLUMNS
                ),
                params![group_id, code],
                invite_from_row,
            )
            .optional()?;
        Ok(invite)
    }

    /// Transition `pending -> accepted`; returns false if it was no longer pending
    pub fn mark_invite_accepted(&self, invite_id: &InviteId) -> CoreResult<bool> {
        let updated = self.conn()?.execute(
            "UPDATE group_invites SET status = 'accepted' WHERE id = ? AND status = 'pending'",
            params![invite_id],
        )?;
        Ok(updated > 0)
    }

    pub fn list_group_invites(&self, group_id: &GroupId) -> CoreResult<Vec<GroupInvite>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM group_invites WHERE group_id = ? ORDER BY created_at DESC, id",
            INVITE_COLUMNS
        ))?;
        let invites = stmt
            .query_map(params![group_id], invite_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(invites)
    }

    // ===== Referrals =====

    /// Record a referral unless the pair already exists; returns whether a row was written
    pub fn insert_referral_if_absent(&self, referral: &Referral) -> CoreResult<bool> {
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO referrals (user_id, referrer_id, created_at) VALUES (?, ?, ?)",
            params![referral.user_id, referral.referrer_id, referral.created_at],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_referral(&self, user_id: &UserId, referrer_id: &UserId) -> CoreResult<Option<Referral>> {
        let referral = self
            .conn()?
            .query_row(
                "SELECT user_id, referrer_id, created_at FROM referrals WHERE user_id = ? AND referrer_id = ?",
                params![user_id, referrer_id],
                referral_from_row,
            )
            .optional()?;
        Ok(referral)
    }

    /// Users onboarded by `referrer_id`
    pub fn list_referrals(&self, referrer_id: &UserId) -> CoreResult<Vec<Referral>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, referrer_id, created_at FROM referrals
             WHERE referrer_id = ? ORDER BY created_at, user_id",
        )?;
        let referrals = stmt
            .query_map(params![referrer_id], referral_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(referrals)
    }
}

// ===== Row mapping =====

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        display_name: row.get(1)?,
        email: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn group_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(base)?,
        name: row.get(base + 1)?,
        created_at: row.get(base + 2)?,
        updated_at: row.get(base + 3)?,
    })
}

fn group_membership_from_row(row: &Row<'_>) -> rusqlite::Result<GroupMembership> {
    Ok(GroupMembership {
        group_id: row.get(0)?,
        user_id: row.get(1)?,
        role: row.get(2)?,
        joined_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn room_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Room> {
    Ok(Room {
        id: row.get(base)?,
        group_id: row.get(base + 1)?,
        name: row.get(base + 2)?,
        description: row.get(base + 3)?,
        capacity: row.get(base + 4)?,
        room_type: row.get(base + 5)?,
        deployment_zone: row.get(base + 6)?,
        status: row.get(base + 7)?,
        created_at: row.get(base + 8)?,
        updated_at: row.get(base + 9)?,
    })
}

fn room_membership_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<RoomMembership> {
    Ok(RoomMembership {
        room_id: row.get(base)?,
        user_id: row.get(base + 1)?,
        role: row.get(base + 2)?,
        can_see: row.get(base + 3)?,
        can_join: row.get(base + 4)?,
        updated_at: row.get(base + 5)?,
    })
}

fn invite_from_row(row: &Row<'_>) -> rusqlite::Result<GroupInvite> {
    Ok(GroupInvite {
        id: row.get(0)?,
        code: row.get(1)?,
        group_id: row.get(2)?,
        referrer_id: row.get(3)?,
        created_at: row.get(4)?,
        expires_at: row.get(5)?,
        status: row.get(6)?,
    })
}

fn referral_from_row(row: &Row<'_>) -> rusqlite::Result<Referral> {
    Ok(Referral {
        user_id: row.get(0)?,
        referrer_id: row.get(1)?,
        created_at: row.get(2)?,
    })
}

//! Database migrations for groups, rooms and invites
//!
//! Provides versioned migrations for the membership schema.
//! Each migration is applied atomically and tracked in the schema_version table.

use crate::core_membership::errors::CoreResult;
use crate::core_membership::types::Timestamp;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use tracing::info;

/// Current schema version for the membership store
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Migration descriptor
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

/// All available migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial users, groups, rooms and invites schema",
        up_sql: r#"
                CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at INTEGER NOT NULL
                );

                -- Users known to the identity layer
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    display_name TEXT NOT NULL,
                    email TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS groups (
                    id TEXT PRIMARY KEY,                    -- GroupId (uuid)
                    name TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                -- Roles are stored by rank: 0 = banned .. 5 = owner
                CREATE TABLE IF NOT EXISTS group_memberships (
                    group_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    role INTEGER NOT NULL CHECK(role BETWEEN 0 AND 5),
                    joined_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (group_id, user_id),
                    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE,
                    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_group_memberships_user ON group_memberships(user_id);
                CREATE INDEX IF NOT EXISTS idx_group_memberships_role ON group_memberships(group_id, role);

                CREATE TABLE IF NOT EXISTS rooms (
                    id TEXT PRIMARY KEY,                    -- RoomId (uuid)
                    group_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    description TEXT,
                    capacity INTEGER NOT NULL CHECK(capacity > 0),
                    room_type TEXT NOT NULL CHECK(room_type IN ('public', 'private', 'secret')),
                    deployment_zone TEXT NOT NULL,
                    status TEXT NOT NULL CHECK(status IN ('active', 'inactive')),
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    UNIQUE (group_id, name),
                    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_rooms_group ON rooms(group_id);

                CREATE TABLE IF NOT EXISTS room_memberships (
                    room_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    role INTEGER NOT NULL CHECK(role BETWEEN 0 AND 5),
                    can_see INTEGER NOT NULL,
                    can_join INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (room_id, user_id),
                    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE,
                    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_room_memberships_user ON room_memberships(user_id);

                CREATE TABLE IF NOT EXISTS group_invites (
                    id TEXT PRIMARY KEY,                    -- InviteId (uuid)
                    code TEXT NOT NULL,
                    group_id TEXT NOT NULL,
                    referrer_id TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL,
                    status TEXT NOT NULL CHECK(status IN ('pending', 'accepted', 'expired')),
                    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE,
                    FOREIGN KEY (referrer_id) REFERENCES users(id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_invites_group ON group_invites(group_id, created_at);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_invites_pending_code
                    ON group_invites(group_id, code)
                    WHERE status = 'pending';

                CREATE TABLE IF NOT EXISTS referrals (
                    user_id TEXT NOT NULL,
                    referrer_id TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    PRIMARY KEY (user_id, referrer_id),
                    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                    FOREIGN KEY (referrer_id) REFERENCES users(id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_referrals_referrer ON referrals(referrer_id);
            "#,
    }]
}

/// Get current schema version from database
fn get_current_version(conn: &Connection) -> Result<i32, rusqlite::Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
}

/// Run all pending migrations
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> CoreResult<()> {
    let conn = pool.get()?;
    let current_version = get_current_version(&conn)?;

    let pending: Vec<_> = get_migrations()
        .into_iter()
        .filter(|m| m.version > current_version)
        .collect();

    for migration in pending {
        let tx = conn.unchecked_transaction()?;

        tx.execute_batch(migration.up_sql)?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
            params![migration.version, Timestamp::now().as_millis() as i64],
        )?;

        tx.commit()?;

        info!(
            version = migration.version,
            description = migration.description,
            "applied migration"
        );
    }

    Ok(())
}

/// Get the latest migration version available
pub fn get_latest_version() -> i32 {
    get_migrations().iter().map(|m| m.version).max().unwrap_or(0)
}

//! rusqlite conversions for membership types
//!
//! Uuid ids are stored as hyphenated text, roles by rank, enums by their
//! lowercase label and timestamps as signed milliseconds.

use crate::core_membership::invite::InviteStatus;
use crate::core_membership::role::Role;
use crate::core_membership::room::{RoomStatus, RoomType};
use crate::core_membership::types::{GroupId, InviteId, RoomId, Timestamp, UserId};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use std::str::FromStr;

macro_rules! sql_uuid_id {
    ($($name:ident),*) => {$(
        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0.to_string()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                $name::from_str(text).map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    )*};
}

sql_uuid_id!(GroupId, RoomId, InviteId);

/// Enums persisted by their `as_str` label
macro_rules! sql_label {
    ($($name:ident),*) => {$(
        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                $name::from_str(text).map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    )*};
}

sql_label!(RoomType, RoomStatus, InviteStatus);

impl ToSql for UserId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for UserId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str().map(UserId::new)
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(i64::from(self.rank())))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let rank = value.as_i64()?;
        u8::try_from(rank)
            .ok()
            .and_then(|r| Role::from_rank(r).ok())
            .ok_or(FromSqlError::OutOfRange(rank))
    }
}

impl ToSql for Timestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let millis = i64::try_from(self.as_millis())
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(ToSqlOutput::from(millis))
    }
}

impl FromSql for Timestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let millis = value.as_i64()?;
        u64::try_from(millis)
            .map(Timestamp::from_millis)
            .map_err(|_| FromSqlError::OutOfRange(millis))
    }
}

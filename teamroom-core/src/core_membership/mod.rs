//! Group & Room Membership
//!
//! Role-based membership for groups and their rooms, plus invite-code
//! onboarding.
//!
//! ## Architecture
//!
//! - **Group**: top-level organization owning rooms and members
//! - **Room**: channel scoped to one group, `public`, `private` or `secret`
//! - **Role**: one ordered ladder (`banned` < `guest` < `member` < `moderator`
//!   < `admin` < `owner`) shared by group and room memberships
//! - **Invite**: single-use numeric code that enrolls its redeemer
//!
//! ## Key Design Principles
//!
//! 1. Every operation is one store transaction: load, authorize, mutate
//! 2. Authorization is a set of pure predicates in [`guard`]
//! 3. Room memberships are seeded on room creation and group join, then evolve independently
//! 4. Rooms a user cannot see are reported as not found

pub mod async_manager;
pub mod clock;
pub mod context;
pub mod errors;
pub mod group;
pub mod guard;
pub mod invite;
pub mod manager;
pub mod manager_impl;
pub mod propagator;
pub mod role;
pub mod room;
pub mod storage;
pub mod types;

pub use async_manager::AsyncMembershipService;
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::OpContext;
pub use errors::{CoreError, CoreResult, ErrorKind};
pub use group::{Group, GroupMembership};
pub use invite::{GroupInvite, InviteStatus, JoinTier, Referral};
pub use manager::{
    GroupManager, InviteManager, Redemption, RoomManager, UserDirectory, UserGroup, VisibleRoom,
};
pub use manager_impl::{MembershipService, ServiceSettings};
pub use role::Role;
pub use room::{NewRoom, Room, RoomAccess, RoomMembership, RoomStatus, RoomType};
pub use storage::{SqlStore, StoreTx};
pub use types::{GroupId, InviteId, RoomId, Timestamp, User, UserId};

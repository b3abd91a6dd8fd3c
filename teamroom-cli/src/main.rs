use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use teamroom_core::config::Config;
use teamroom_core::core_membership::{
    AsyncMembershipService, GroupId, JoinTier, MembershipService, NewRoom, Role, RoomId,
    RoomStatus, RoomType, ServiceSettings, UserId,
};
use teamroom_core::logging::{init_logging_with_config, LogLevel};
use teamroom_core::metrics::init_metrics;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "teamroom")]
#[command(author, version, about = "Operate a teamroom membership store", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long, global = true)]
    json_logs: bool,

    /// Acting user id
    #[arg(long = "as", global = true, value_name = "USER")]
    actor: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and apply migrations
    Init {
        /// Also write the effective configuration to this file
        #[arg(long)]
        write_config: Option<PathBuf>,
    },
    /// Manage users
    #[command(subcommand)]
    User(UserCommand),
    /// Manage groups
    #[command(subcommand)]
    Group(GroupCommand),
    /// Manage rooms
    #[command(subcommand)]
    Room(RoomCommand),
    /// Issue and redeem invite codes
    #[command(subcommand)]
    Invite(InviteCommand),
    /// Change or remove group members
    #[command(subcommand)]
    Member(MemberCommand),
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Register a user
    Add {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        email: String,
    },
}

#[derive(Subcommand, Debug)]
enum GroupCommand {
    /// Create a group owned by the acting user
    Create { name: String },
    /// Groups the acting user belongs to
    List,
    /// Members of a group
    Members { group: GroupId },
    /// Delete a group and everything in it
    Delete { group: GroupId },
}

#[derive(Subcommand, Debug)]
enum RoomCommand {
    /// Create a room in a group
    Create {
        group: GroupId,
        name: String,
        #[arg(long = "type", default_value = "public")]
        room_type: RoomType,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        capacity: Option<u32>,
        #[arg(long)]
        zone: Option<String>,
    },
    /// Rooms of a group visible to the acting user
    List { group: GroupId },
    /// Activate or deactivate a room
    Status { room: RoomId, status: RoomStatus },
}

#[derive(Subcommand, Debug)]
enum InviteCommand {
    /// Issue a new invite code
    Create { group: GroupId },
    /// Invites of a group
    List { group: GroupId },
    /// Redeem a code as the acting user
    Redeem {
        group: GroupId,
        code: String,
        /// Join as guest instead of member
        #[arg(long)]
        guest: bool,
    },
}

#[derive(Subcommand, Debug)]
enum MemberCommand {
    /// Add a registered user directly
    Add { group: GroupId, user: String, role: Role },
    /// Change a member's group role
    Role { group: GroupId, user: String, role: Role },
    /// Remove a member, or leave when USER is the acting user
    Remove { group: GroupId, user: String },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn actor(args_actor: &Option<String>) -> Result<UserId> {
    args_actor
        .as_deref()
        .map(UserId::new)
        .context("this command needs an acting user, pass --as <USER>")
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.parse::<LogLevel>()?;
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    Ok(config)
}

async fn run(args: Args, config: Config) -> Result<()> {
    let service = MembershipService::from_config(&config)?;
    debug!(settings = ?service.settings(), "service ready");

    if let Command::Init { write_config } = &args.command {
        if let Some(path) = write_config {
            config.save_to_file(path)?;
            info!(path = %path.display(), "configuration written");
        }
        info!(path = %config.store.database_path.display(), "store initialized");
        return Ok(());
    }

    let svc = AsyncMembershipService::new(service, config.operations.default_timeout);

    match args.command {
        Command::Init { .. } => {}
        Command::User(UserCommand::Add { id, name, email }) => {
            print_json(&svc.register_user(UserId::new(id), name, email).await?)?;
        }
        Command::Group(cmd) => {
            let me = actor(&args.actor)?;
            match cmd {
                GroupCommand::Create { name } => print_json(&svc.create_group(me, name).await?)?,
                GroupCommand::List => print_json(&svc.list_user_groups(me).await?)?,
                GroupCommand::Members { group } => print_json(&svc.list_group_members(me, group).await?)?,
                GroupCommand::Delete { group } => {
                    svc.delete_group(me, group).await?;
                    print_json(&serde_json::json!({ "deleted": group }))?;
                }
            }
        }
        Command::Room(cmd) => {
            let me = actor(&args.actor)?;
            match cmd {
                RoomCommand::Create {
                    group,
                    name,
                    room_type,
                    description,
                    capacity,
                    zone,
                } => {
                    let spec = NewRoom {
                        name,
                        room_type,
                        description,
                        capacity,
                        deployment_zone: zone,
                    };
                    print_json(&svc.create_room(me, group, spec).await?)?;
                }
                RoomCommand::List { group } => print_json(&svc.list_visible_rooms(me, group).await?)?,
                RoomCommand::Status { room, status } => {
                    print_json(&svc.set_room_status(me, room, status).await?)?
                }
            }
        }
        Command::Invite(cmd) => {
            let me = actor(&args.actor)?;
            match cmd {
                InviteCommand::Create { group } => print_json(&svc.create_invite(me, group).await?)?,
                InviteCommand::List { group } => print_json(&svc.list_group_invites(me, group).await?)?,
                InviteCommand::Redeem { group, code, guest } => {
                    let tier = if guest { JoinTier::Guest } else { JoinTier::Member };
                    print_json(&svc.redeem_invite(me, group, code, tier).await?)?;
                }
            }
        }
        Command::Member(cmd) => {
            let me = actor(&args.actor)?;
            match cmd {
                MemberCommand::Add { group, user, role } => {
                    print_json(&svc.add_group_member(me, group, UserId::new(user), role).await?)?
                }
                MemberCommand::Role { group, user, role } => print_json(
                    &svc.update_group_membership_role(me, group, UserId::new(user), role)
                        .await?,
                )?,
                MemberCommand::Remove { group, user } => {
                    let user = UserId::new(user);
                    svc.remove_group_member(me, group, user.clone()).await?;
                    print_json(&serde_json::json!({ "removed": user, "group": group }))?;
                }
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging_with_config(config.logging.to_log_config())?;
    init_metrics();

    debug!(command = ?args.command, "teamroom CLI started");
    run(args, config).await
}

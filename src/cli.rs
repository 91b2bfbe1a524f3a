//! CLI struct definitions for the cmi5-lrs command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use crate::core::output::Format;
use crate::core::store::DEFAULT_STORE_DIR;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "cmi5-lrs",
    version = env!("CARGO_PKG_VERSION"),
    about = "Local cmi5/xAPI Learning Record Store: package registration, launch, statements, state and progress."
)]
pub(crate) struct Cli {
    /// Store root directory (database, audit log and lrs.toml).
    #[clap(long, global = true, default_value = DEFAULT_STORE_DIR)]
    pub root: PathBuf,
    /// Output format.
    #[clap(long, global = true, value_enum, default_value = "text")]
    pub format: Format,
    #[clap(subcommand)]
    pub command: Command,
}

/// Identifies a learner by exactly one of mailbox or account.
#[derive(clap::Args, Debug, Clone)]
pub(crate) struct ActorArgs {
    /// Mailbox identifier, with or without the `mailto:` prefix.
    #[clap(long, conflicts_with = "account_name")]
    pub mbox: Option<String>,
    /// Account name; the home page defaults to `actor_homepage` from lrs.toml.
    #[clap(long)]
    pub account_name: Option<String>,
    #[clap(long, requires = "account_name")]
    pub account_home_page: Option<String>,
    /// Display name.
    #[clap(long)]
    pub name: Option<String>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create the store, its database and a default lrs.toml
    Init,
    /// Register and inspect packages
    Package(PackageCli),
    /// Issue a launch URL for an activity
    Launch {
        package_id: String,
        activity_id: String,
        #[clap(flatten)]
        actor: ActorArgs,
        /// Existing registration (UUID); generated when omitted.
        #[clap(long)]
        registration: Option<String>,
        /// Extra query parameter as key=value, copied verbatim. Repeatable.
        #[clap(long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },
    /// Submit, list and validate xAPI statements
    Statement(StatementCli),
    /// Read and write activity state documents
    State(StateCli),
    /// Course progress for a learner and registration
    Progress {
        package_id: String,
        #[clap(flatten)]
        actor: ActorArgs,
        #[clap(long)]
        registration: Option<String>,
    },
    /// Launch session summary for one activity
    Session {
        package_id: String,
        activity_id: String,
        #[clap(flatten)]
        actor: ActorArgs,
        #[clap(long)]
        registration: Option<String>,
    },
    /// Actor registry operations
    Actor(ActorCli),
    /// Show the mutation audit log
    Audit {
        /// Show only the last N events.
        #[clap(long)]
        limit: Option<usize>,
    },
    /// Print the machine-readable description of every component
    Schema,
}

#[derive(clap::Args, Debug)]
pub(crate) struct PackageCli {
    #[clap(subcommand)]
    pub command: PackageCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum PackageCommand {
    /// Register a manifest (JSON course tree)
    Register {
        /// Manifest file, or '-' for stdin.
        #[clap(long)]
        file: PathBuf,
    },
    /// List registered packages
    List,
    /// Show a package tree
    Show { package_id: String },
    /// Locate an activity anywhere in a package tree
    Find {
        package_id: String,
        activity_id: String,
    },
    /// List the packages that contain an activity
    Locate { activity_id: String },
}

#[derive(clap::Args, Debug)]
pub(crate) struct StatementCli {
    #[clap(subcommand)]
    pub command: StatementCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum StatementCommand {
    /// Submit one statement or a JSON array of statements
    Submit {
        /// Statement file, or '-' for stdin.
        #[clap(long)]
        file: PathBuf,
    },
    /// Fetch one statement by id
    Get { statement_id: String },
    /// List statements in stored order
    List {
        /// Only statements after this sequence number.
        #[clap(long, default_value_t = 0)]
        after: i64,
        #[clap(long, default_value_t = 50)]
        limit: usize,
    },
    /// Validate statements without storing them
    Validate {
        #[clap(long)]
        file: PathBuf,
        /// Also apply the cmi5 profile rules.
        #[clap(long)]
        cmi5: bool,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct StateCli {
    #[clap(subcommand)]
    pub command: StateCommand,
}

#[derive(clap::Args, Debug, Clone)]
pub(crate) struct StateTarget {
    #[clap(long)]
    pub activity: String,
    #[clap(flatten)]
    pub actor: ActorArgs,
    #[clap(long)]
    pub registration: Option<String>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum StateCommand {
    /// Print a state document
    Get {
        #[clap(flatten)]
        target: StateTarget,
        #[clap(long)]
        state_id: String,
    },
    /// Write a state document
    Put {
        #[clap(flatten)]
        target: StateTarget,
        #[clap(long)]
        state_id: String,
        /// Inline payload.
        #[clap(long, conflicts_with = "file")]
        data: Option<String>,
        /// Payload file, or '-' for stdin.
        #[clap(long)]
        file: Option<PathBuf>,
        #[clap(long, default_value = "application/json")]
        content_type: String,
        /// Compare-and-set: fail unless the stored version matches (0 = must not exist).
        #[clap(long)]
        expected_version: Option<i64>,
    },
    /// Delete one state document, or all of them with --all
    Delete {
        #[clap(flatten)]
        target: StateTarget,
        #[clap(long, required_unless_present = "all")]
        state_id: Option<String>,
        #[clap(long)]
        all: bool,
        #[clap(long)]
        expected_version: Option<i64>,
    },
    /// List state ids for an activity attempt
    List {
        #[clap(flatten)]
        target: StateTarget,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct ActorCli {
    #[clap(subcommand)]
    pub command: ActorCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ActorCommand {
    /// Resolve an identity to its stable internal id (creating it on first sight)
    Resolve {
        #[clap(flatten)]
        actor: ActorArgs,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

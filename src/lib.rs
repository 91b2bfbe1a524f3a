//! cmi5-lrs: a local cmi5/xAPI Learning Record Store.
//!
//! The LRS registers cmi5 packages, issues launch URLs, ingests xAPI statements
//! idempotently, stores versioned activity state and derives completion
//! verdicts by replaying the statement log.
//!
//! # Architecture
//!
//! ## Single Store
//!
//! A store is one directory (`.cmi5-lrs/` by default) holding `lrs.db`, the
//! optional `lrs.toml` and the audit log. Four collections live in the
//! database: actors, packages/activities, statements (append-only) and
//! activity state (versioned). Progress is never stored.
//!
//! ## The Thin Waist
//!
//! All state mutations route through `DbBroker` for:
//! - Fresh WAL connections per operation
//! - Audit logging (`broker.events.jsonl`)
//!
//! Serialization happens on narrow keys (`KeyedLocks`), never globally.
//!
//! ## Components
//!
//! - `actors`: identity registry (mailbox or account to stable id)
//! - `manifest`: immutable block/activity trees
//! - `statements`: idempotent, append-only statement log
//! - `state`: compare-and-set activity state documents
//! - `session`: pure replay of one activity attempt
//! - `progress`: AND roll-up across the manifest tree
//! - `api`: `Lrs`, the launch/query boundary
//!
//! # Examples
//!
//! ```bash
//! cmi5-lrs init
//! cmi5-lrs package register --file course.json
//! cmi5-lrs launch P_01J... https://example.com/au/1 --mbox learner@example.com
//! cmi5-lrs statement submit --file completed.json
//! cmi5-lrs progress P_01J... --mbox learner@example.com --registration <uuid>
//! ```

mod cli;
pub mod core;
pub mod services;
pub mod subsystems;
pub mod xapi;

pub use crate::core::config::LrsConfig;
pub use crate::core::error::{LrsError, LrsResult};
pub use crate::core::store::Store;
pub use crate::services::api::{LaunchRequest, LaunchResponse, Lrs};

use crate::cli::{
    ActorArgs, ActorCommand, Cli, Command, PackageCommand, StateCommand, StateTarget,
    StatementCommand,
};
use crate::core::output::{self, Format};
use crate::core::{broker, config, time};
use crate::services::manifest::PackageManifest;
use crate::xapi::model::{Agent, Statement};
use crate::xapi::validate::StatementValidator;
use clap::Parser;
use colored::Colorize;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_filter))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run() -> Result<(), LrsError> {
    let cli = Cli::parse();
    let format = cli.format;
    let result = dispatch(cli);
    if let (Err(e), Format::Json) = (&result, format) {
        println!(
            "{}",
            time::command_envelope(
                "error",
                "error",
                serde_json::json!({ "kind": e.kind(), "message": e.to_string() })
            )
        );
    }
    result
}

fn dispatch(cli: Cli) -> Result<(), LrsError> {
    let store = Store::open(&cli.root)?;
    init_tracing(&store.config.log_filter);
    let format = cli.format;

    subsystems::initialize_all_dbs(&store)?;
    let lrs = Lrs::open(&store);

    match cli.command {
        Command::Init => init_store(&store, format),
        Command::Package(pkg) => run_package(&lrs, pkg.command, format),
        Command::Launch {
            package_id,
            activity_id,
            actor,
            registration,
            params,
        } => {
            let request = LaunchRequest {
                package_id,
                activity_id,
                actor: agent_from_args(&actor, lrs.config())?,
                registration,
                launch_parameters: params,
            };
            let response = lrs.launch(&request)?;
            output::emit(format, "launch", serde_json::to_value(&response)?, || {
                println!("{} {}", "Registration".bold(), response.registration);
                println!("{} {}", "Launch URL".bold(), response.launch_url.bright_cyan());
                println!(
                    "{} {}  {} {}",
                    "Method".bold(),
                    response.launch_method,
                    "moveOn".bold(),
                    response.move_on
                );
            });
            Ok(())
        }
        Command::Statement(st) => run_statement(&lrs, st.command, format),
        Command::State(state) => run_state(&lrs, state.command, format),
        Command::Progress {
            package_id,
            actor,
            registration,
        } => {
            let agent = agent_from_args(&actor, lrs.config())?;
            let progress = lrs.get_progress(&package_id, &agent, registration.as_deref())?;
            output::emit(format, "progress", serde_json::to_value(&progress)?, || {
                output::print_progress(&progress)
            });
            Ok(())
        }
        Command::Session {
            package_id,
            activity_id,
            actor,
            registration,
        } => {
            let agent = agent_from_args(&actor, lrs.config())?;
            let (activity, summary) =
                lrs.session(&package_id, &activity_id, &agent, registration.as_deref())?;
            let payload = serde_json::json!({ "activity": activity, "session": summary });
            output::emit(format, "session", payload, || {
                output::print_session(&activity.id, &summary)
            });
            Ok(())
        }
        Command::Actor(actor) => match actor.command {
            ActorCommand::Resolve { actor } => {
                let agent = agent_from_args(&actor, lrs.config())?;
                let actor_id = lrs.actors().resolve_agent(&agent)?;
                let record = lrs.actors().get(&actor_id)?;
                output::emit(format, "actor.resolve", serde_json::to_value(&record)?, || {
                    println!("{}", actor_id)
                });
                Ok(())
            }
        },
        Command::Audit { limit } => {
            let mut events = broker::read_audit_log(&store)?;
            if let Some(limit) = limit {
                let skip = events.len().saturating_sub(limit);
                events.drain(..skip);
            }
            output::emit(format, "audit", serde_json::json!({ "events": events }), || {
                for ev in &events {
                    let status = if ev.status == "success" {
                        ev.status.bright_green()
                    } else {
                        ev.status.bright_red()
                    };
                    println!("{}  {:<22} {:<8} {}", ev.ts.dimmed(), ev.op, status, ev.actor);
                }
            });
            Ok(())
        }
        Command::Schema => {
            let payload = schema();
            output::emit(format, "schema", payload.clone(), || {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload).unwrap_or_default()
                )
            });
            Ok(())
        }
    }
}

/// Machine-readable description of every component.
pub fn schema() -> serde_json::Value {
    use crate::services::{actors, api, manifest, progress, session, state, statements};
    serde_json::json!({
        "name": "cmi5-lrs",
        "version": env!("CARGO_PKG_VERSION"),
        "components": [
            broker::schema(),
            actors::schema(),
            manifest::schema(),
            statements::schema(),
            state::schema(),
            session::schema(),
            progress::schema(),
            api::schema(),
        ]
    })
}

fn init_store(store: &Store, format: Format) -> Result<(), LrsError> {
    let config_path = store.root.join(config::CONFIG_FILE_NAME);
    let wrote_config = !config_path.exists();
    if wrote_config {
        store.config.write(&store.root)?;
    }
    tracing::info!(root = %store.root.display(), "store initialized");

    let names: Vec<&str> = subsystems::SUBSYSTEMS.iter().map(|s| s.name).collect();
    let payload = serde_json::json!({
        "root": store.root.display().to_string(),
        "database": store.db_path().display().to_string(),
        "config_written": wrote_config,
        "subsystems": names,
    });
    output::emit(format, "init", payload, || {
        println!(
            "  {} Store ready at {}",
            "▸".bright_green(),
            store.root.display().to_string().bright_white()
        );
        for name in &names {
            println!("    {} {}", "●".bright_green(), name);
        }
        if wrote_config {
            println!("    {} {}", "●".bright_green(), config::CONFIG_FILE_NAME);
        }
    });
    Ok(())
}

fn run_package(lrs: &Lrs, command: PackageCommand, format: Format) -> Result<(), LrsError> {
    match command {
        PackageCommand::Register { file } => {
            let manifest = PackageManifest::from_json(&read_input(&file)?)?;
            let package_id = lrs.register_package(&manifest)?;
            output::emit(
                format,
                "package.register",
                serde_json::json!({ "package_id": package_id }),
                || println!("Package registered: {}", package_id),
            );
        }
        PackageCommand::List => {
            let packages = lrs.manifests().list_packages()?;
            output::emit(
                format,
                "package.list",
                serde_json::json!({ "packages": packages }),
                || {
                    for p in &packages {
                        println!(
                            "{}  {}  {} activities",
                            p.package_id.bright_white(),
                            output::compact_line(&p.title, 50),
                            p.activity_count
                        );
                    }
                },
            );
        }
        PackageCommand::Show { package_id } => {
            let tree = lrs.manifests().package(&package_id)?;
            output::emit(format, "package.show", serde_json::to_value(&*tree)?, || {
                output::print_tree(&tree)
            });
        }
        PackageCommand::Find {
            package_id,
            activity_id,
        } => {
            let activity = lrs.manifests().find_activity(&package_id, &activity_id)?;
            output::emit(
                format,
                "package.find",
                serde_json::to_value(&activity)?,
                || {
                    println!("{} {}", activity.id.bright_white(), activity.title);
                    println!("  block   {}", activity.block_id);
                    println!("  url     {}", activity.launch_url);
                    println!("  moveOn  {}", activity.move_on);
                },
            );
        }
        PackageCommand::Locate { activity_id } => {
            let locations = lrs.manifests().locate_activity(&activity_id)?;
            if locations.is_empty() {
                return Err(LrsError::not_found(format!(
                    "activity '{}' in any package",
                    activity_id
                )));
            }
            output::emit(
                format,
                "package.locate",
                serde_json::json!({ "activity_id": activity_id, "locations": locations }),
                || {
                    for l in &locations {
                        println!(
                            "{}  #{}  {}  {}",
                            l.package_id.bright_white(),
                            l.order_index,
                            l.block_id,
                            l.move_on
                        );
                    }
                },
            );
        }
    }
    Ok(())
}

fn parse_statements(raw: &str) -> Result<Vec<Statement>, LrsError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| LrsError::validation(format!("statement JSON is not well-formed: {}", e)))?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| LrsError::validation(format!("invalid statement: {}", e)))
        })
        .collect()
}

fn run_statement(lrs: &Lrs, command: StatementCommand, format: Format) -> Result<(), LrsError> {
    match command {
        StatementCommand::Submit { file } => {
            let statements = parse_statements(&read_input(&file)?)?;
            let mut results = Vec::with_capacity(statements.len());
            for statement in statements {
                results.push(lrs.submit_statement(statement)?);
            }
            output::emit(
                format,
                "statement.submit",
                serde_json::json!({ "results": results }),
                || {
                    for r in &results {
                        let label = if r.is_duplicate() {
                            "duplicate".yellow()
                        } else {
                            "stored".bright_green()
                        };
                        let receipt = r.receipt();
                        println!("{:<9} {} seq={}", label, receipt.statement_id, receipt.seq);
                    }
                },
            );
        }
        StatementCommand::Get { statement_id } => {
            let stored = lrs.statements().get(&statement_id)?;
            output::emit(format, "statement.get", serde_json::to_value(&stored)?, || {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&stored.statement).unwrap_or_default()
                );
                if stored.voided {
                    println!("{}", "voided".bright_red());
                }
            });
        }
        StatementCommand::List { after, limit } => {
            let rows = lrs.statements().list_after(after, limit)?;
            output::emit(
                format,
                "statement.list",
                serde_json::json!({ "statements": rows }),
                || rows.iter().for_each(output::print_statement),
            );
        }
        StatementCommand::Validate { file, cmi5 } => {
            let statements = parse_statements(&read_input(&file)?)?;
            let validator = StatementValidator::new(lrs.config().max_clock_skew_secs);
            let now = time::now();
            let reports: Vec<_> = statements
                .iter()
                .map(|s| {
                    if cmi5 {
                        validator.validate_cmi5(s, now)
                    } else {
                        validator.validate(s, now)
                    }
                })
                .collect();
            let invalid = reports.iter().filter(|r| !r.is_valid()).count();
            output::emit(
                format,
                "statement.validate",
                serde_json::json!({ "reports": reports, "invalid": invalid }),
                || {
                    for (i, report) in reports.iter().enumerate() {
                        let mark = if report.is_valid() {
                            "valid".bright_green()
                        } else {
                            "invalid".bright_red()
                        };
                        println!("#{} {}", i + 1, mark);
                        for e in &report.errors {
                            println!("    {} {}", "error".red(), e);
                        }
                        for w in &report.warnings {
                            println!("    {} {:?}", "warning".yellow(), w);
                        }
                    }
                },
            );
            if invalid > 0 {
                return Err(LrsError::validation(format!(
                    "{} of {} statements are invalid",
                    invalid,
                    reports.len()
                )));
            }
        }
    }
    Ok(())
}

fn run_state(lrs: &Lrs, command: StateCommand, format: Format) -> Result<(), LrsError> {
    match command {
        StateCommand::Get { target, state_id } => {
            let agent = agent_from_args(&target.actor, lrs.config())?;
            let doc = lrs.get_state(
                &target.activity,
                &agent,
                target.registration.as_deref(),
                &state_id,
            )?;
            let payload = String::from_utf8_lossy(&doc.payload).into_owned();
            let mut value = serde_json::to_value(&doc)?;
            if let Some(obj) = value.as_object_mut() {
                obj.insert("payload".to_string(), serde_json::Value::String(payload.clone()));
            }
            output::emit(format, "state.get", value, || {
                println!(
                    "{} v{} {} {}",
                    doc.key.state_id.bold(),
                    doc.version,
                    doc.content_type.dimmed(),
                    doc.etag.dimmed()
                );
                println!("{}", payload);
            });
        }
        StateCommand::Put {
            target,
            state_id,
            data,
            file,
            content_type,
            expected_version,
        } => {
            let payload = match (data, file) {
                (Some(data), _) => data.into_bytes(),
                (None, Some(file)) => read_input(&file)?.into_bytes(),
                (None, None) => {
                    return Err(LrsError::validation("state put needs --data or --file"));
                }
            };
            let agent = agent_from_args(&target.actor, lrs.config())?;
            let version = lrs.put_state(
                &target.activity,
                &agent,
                target.registration.as_deref(),
                &state_id,
                &payload,
                &content_type,
                expected_version,
            )?;
            output::emit(
                format,
                "state.put",
                serde_json::json!({ "state_id": state_id, "version": version }),
                || println!("State '{}' written (version {})", state_id, version),
            );
        }
        StateCommand::Delete {
            target,
            state_id,
            all,
            expected_version,
        } => {
            let agent = agent_from_args(&target.actor, lrs.config())?;
            let removed = match (all, state_id) {
                (true, _) => lrs.clear_state(&target.activity, &agent, target.registration.as_deref())?,
                (false, Some(state_id)) => usize::from(lrs.delete_state(
                    &target.activity,
                    &agent,
                    target.registration.as_deref(),
                    &state_id,
                    expected_version,
                )?),
                (false, None) => {
                    return Err(LrsError::validation("state delete needs --state-id or --all"));
                }
            };
            output::emit(
                format,
                "state.delete",
                serde_json::json!({ "removed": removed }),
                || println!("Removed {} state document(s)", removed),
            );
        }
        StateCommand::List { target } => {
            let StateTarget {
                activity,
                actor,
                registration,
            } = target;
            let agent = agent_from_args(&actor, lrs.config())?;
            let ids = lrs.list_state_ids(&activity, &agent, registration.as_deref())?;
            output::emit(
                format,
                "state.list",
                serde_json::json!({ "state_ids": ids }),
                || ids.iter().for_each(|id| println!("{}", id)),
            );
        }
    }
    Ok(())
}

fn agent_from_args(args: &ActorArgs, config: &LrsConfig) -> Result<Agent, LrsError> {
    let agent = match (&args.mbox, &args.account_name) {
        (Some(mbox), None) => {
            let mbox = if mbox.starts_with("mailto:") {
                mbox.clone()
            } else {
                format!("mailto:{}", mbox)
            };
            Agent::with_mbox(&mbox)
        }
        (None, Some(name)) => {
            let home_page = args
                .account_home_page
                .as_deref()
                .unwrap_or(&config.actor_homepage);
            Agent::with_account(home_page, name)
        }
        _ => {
            return Err(LrsError::validation(
                "identify the learner with exactly one of --mbox or --account-name",
            ));
        }
    };
    Ok(match &args.name {
        Some(name) => agent.named(name),
        None => agent,
    })
}

fn read_input(path: &Path) -> Result<String, LrsError> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    Ok(fs::read_to_string(path)?)
}

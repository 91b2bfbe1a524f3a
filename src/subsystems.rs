//! Subsystem registration: centralizes all DB initialization functions.
//!
//! Adding a new persistent collection: append one entry to `SUBSYSTEMS`.

use crate::core::error::LrsError;
use crate::core::store::Store;
use crate::services::{actors, manifest, state, statements};

pub struct SubsystemInit {
    pub name: &'static str,
    pub initialize_db: fn(&Store) -> Result<(), LrsError>,
}

/// Order matters: statements and state reference actors. Initializers run
/// sequentially so first start never contends on the SQLite write lock.
pub const SUBSYSTEMS: &[SubsystemInit] = &[
    SubsystemInit { name: "actors", initialize_db: actors::initialize_actors_db },
    SubsystemInit { name: "manifest", initialize_db: manifest::initialize_packages_db },
    SubsystemInit { name: "statements", initialize_db: statements::initialize_statements_db },
    SubsystemInit { name: "state", initialize_db: state::initialize_state_db },
];

/// Initialize every collection in `store`. Idempotent.
pub fn initialize_all_dbs(store: &Store) -> Result<(), LrsError> {
    for sub in SUBSYSTEMS {
        (sub.initialize_db)(store)?;
        tracing::debug!(subsystem = sub.name, "initialized");
    }
    Ok(())
}

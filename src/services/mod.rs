//! LRS components, leaf-first: actors, manifest, statements, state, session,
//! progress, and the api that routes between them.

pub mod actors;
pub mod api;
pub mod manifest;
pub mod progress;
pub mod session;
pub mod state;
pub mod statements;

//! Core modules shared by every LRS component.
//!
//! Storage plumbing, configuration, errors and small primitives live here;
//! the components themselves live in [`crate::services`].

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod locks;
pub mod output;
pub mod schemas;
pub mod store;
pub mod time;

//! xAPI statement model, verbs, validation and construction helpers.

pub mod builder;
pub mod model;
pub mod validate;
pub mod verbs;

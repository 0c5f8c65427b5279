//! Core domain model, patch engine, validation and fix rules for Remedy.

pub mod detect;
pub mod diff;
pub mod dispatch;
pub mod model;
pub mod parser;
pub mod patch;
pub mod registry;
pub mod rules;
pub mod score;
pub mod validate;

pub use model::*;

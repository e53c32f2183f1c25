//! CLI command implementations.

pub mod attributes;
pub mod common;
pub mod control;
pub mod run;
pub mod status;
pub mod version;
pub mod wait;

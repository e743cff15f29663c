//! CLI command implementations

pub mod install;
pub mod report;
pub mod run;

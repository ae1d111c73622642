//! CLI command implementations

pub mod interrupt;
pub mod nodes;
pub mod pools;
pub mod report;

//! Records, sources, filters and configuration

pub mod config;
pub mod filter;
pub mod paths;
pub mod record;
pub mod source;
pub mod sqlite;

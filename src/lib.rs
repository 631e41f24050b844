// ABOUTME: Library root for table-syncer
// ABOUTME: Incremental MySQL-to-MySQL table sync driven by a per-table watermark

pub mod commands;
pub mod config;
pub mod filters;
pub mod mysql;
pub mod sync;
pub mod utils;

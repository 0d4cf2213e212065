// Database module
// This module handles the SQLite store behind persisted settings

pub mod connection;
pub mod migrations;
pub mod operations;

//! # Configuration
//!
//! Server, logging and stream retention settings shared by the server and CLI binaries.

pub mod server;

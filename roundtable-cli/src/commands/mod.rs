pub mod client;
pub mod completion;
pub mod config;
pub mod follow;
pub mod resume;

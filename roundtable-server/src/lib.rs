#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

pub mod app_state;
pub mod handlers;
pub mod http;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod services;
mod tracer;

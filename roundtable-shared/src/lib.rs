#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod models;
pub mod rounds;
pub mod streams;

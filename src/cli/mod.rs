//! # CLI Module
//!
//! ## Commands
//!
//! ### `serve`
//!
//! Run the server with the built-in `/` and `/health` routes:
//!
//! ```bash
//! stanza serve --config config/config.yaml --addr 0.0.0.0:8080
//! ```
//!
//! ### `routes`
//!
//! Print the route table in matching order, followed by a warning for every
//! registration an earlier pattern shadows:
//!
//! ```bash
//! stanza routes
//! ```
//!
//! `--config` (or `STANZA_CONFIG`) applies to both commands.

mod commands;


pub use commands::{base_router, run_cli, Cli, Commands};

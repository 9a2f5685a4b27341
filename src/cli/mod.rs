//! CLI module for the ecofed command-line interface.
//!
//! Commands run the query pipeline in process against the configured
//! stores, or start the HTTP server.

mod commands;
mod output;

pub use commands::*;

// Copyright 2018-2026 the Deno authors. MIT license.

//! esdev: a development server for native ES modules.
//!
//! Point a browser at an HTML entry and each imported source module is
//! compiled and delivered only when requested; edit a file and a
//! structured hot-module-replacement update reaches the running page
//! over a persistent WebSocket channel.
//!
//! The core pieces:
//!
//! - [`graph`] — the in-memory module graph keyed by url, id, and file
//! - [`plugins`] — the rollup-style hook container
//! - [`optimizer`] — bare-import pre-bundling with a hashed cache
//! - [`server`] — HTTP middleware, transform pipeline, HMR engine,
//!   message channel, and the embedded browser client

pub mod config;
pub mod errors;
pub mod flags;
pub mod graph;
pub mod optimizer;
pub mod plugins;
pub mod server;
pub mod util;

pub use config::ServerConfig;
pub use errors::AnyError;
pub use errors::EsdevError;
pub use server::DevServer;

/// esdev version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

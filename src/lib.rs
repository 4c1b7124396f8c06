//! auth-proxy is an authenticating reverse proxy.
//!
//! Every inbound request carries an identity assertion issued by an
//! authenticating edge. The proxy reads the caller's email from it, looks up
//! that identity's backend bearer token and namespace in a key-value store,
//! injects the token as `Authorization: Bearer <token>`, and forwards the
//! request upstream: either to a single origin, or through an ordered list
//! of fallback hosts that is walked until one answers with something other
//! than 502/503. Failures are mirrored to a Sentry-compatible collector.
//!
//! # Architecture
//!
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, validate, health).
//! - [`config`] -- Configuration model, validation, and hot-reloadable file
//!   sources via the [`ConfigSource`](config::ConfigSource) trait.
//! - [`error`] -- Process-level and per-request error types using `thiserror`.
//! - [`health`] -- `GET /health` endpoint handler.
//! - [`identity`] -- Assertion parsing and email → record resolution.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//! - [`proxy`] -- The forwarding engine: candidate planning, header
//!   construction, upstream dispatch, and the fallback loop.
//! - [`reporter`] -- Error events posted to the external collector.
//! - [`server`] -- Axum server setup, shared state, HTTP client, shutdown.
//! - [`store`] -- The read-only [`KeyValueStore`](store::KeyValueStore) seam.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML config file support _(enabled by default)_ |
//! | `json` | JSON config file support |
//! | `toml` | TOML config file support |
//! | `redis` | Redis key-value store backend |
//! | `file-backends` | All file format backends |
//! | `full` | All features |

// Binary crate: public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod health;
pub mod identity;
pub mod logging;
pub mod proxy;
pub mod reporter;
pub mod server;
pub mod store;

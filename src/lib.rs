//! # Swarm Core
//!
//! Swarm Core is the control plane of a multi-agent orchestration
//! service: a durable task broker that distributes work across a fleet of
//! long-running autonomous CLI agents, mediates their communication, and
//! exposes an operational HTTP surface for runners, integrations, and a
//! dashboard.
//!
//! ## Architecture
//!
//! - **Task engine**: the state machine and transactional claim protocol
//!   that moves a task from creation through offer, assignment,
//!   pause/resume, and completion
//! - **Trigger resolver**: the long-poll protocol each runner uses to
//!   discover what to do next, with atomic claiming
//! - **Runner supervisor**: the client-side loop that spawns and tracks
//!   child agent processes, streams their output back, and survives
//!   restarts via task pause/resume
//! - **Inbox router**: classification of chat, source-hosting, and mail
//!   events into tasks or lead inbox messages, with duplicate suppression
//!
//! Two binaries ship from this crate: `swarm-broker` (the HTTP broker)
//! and `swarm-runner` (the per-agent supervisor).

/// HTTP API server and endpoints
pub mod api;
/// Authentication and agent identification
pub mod auth;
/// System configuration
pub mod config;
/// System-wide constants
pub mod constants;
/// Task lifecycle engine
pub mod engine;
/// Error types and handling
pub mod error;
/// Core data models
pub mod models;
/// Rate limiting for the webhook surface
pub mod rate_limit;
/// Inbox routing and duplicate suppression
pub mod router;
/// Runner supervisor and child process management
pub mod runner;
/// Durable SQLite store
pub mod store;
/// Trigger resolution for the poll protocol
pub mod triggers;

pub use error::{Result, SwarmError};

//! Session orchestration for multiplayer chat Minesweeper.
//!
//! Taps arrive unordered and possibly duplicated; [`coordinator`] serializes
//! them per session, [`render`] coalesces the resulting keyboard edits under
//! the platform rate limit, and [`registry`] keeps sessions, snapshots and
//! collects them.

pub mod clock;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod events;
pub mod players;
pub mod registry;
pub mod render;
pub mod reports;
pub mod reward;
pub mod routes;
pub mod service;
pub mod session;
pub mod telemetry;
pub mod transport;
pub mod webhook;

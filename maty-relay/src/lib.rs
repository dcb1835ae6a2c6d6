//! # maty-relay
//!
//! Real-time contact and message relay for Maty.
//!
//! This crate implements the synchronization core of the relay:
//! - A session registry mapping each authenticated principal to its live
//!   connection (at most one per principal)
//! - A delta poller that turns undelivered history rows into pushes
//! - An action router that executes client requests against the store
//!
//! ## Architecture
//!
//! ```text
//!  client ──ws──► http::ws ──► Relay::on_message ──► ActionRouter ──┐
//!     ▲                                                │            │
//!     │                                        SessionRegistry      │
//!     │                                                │            ▼
//!     └──── ConnectionHandle ◄── DeltaPoller ◄─────────┴──── Store (SQLite)
//! ```
//!
//! The router and the poller share only the store's history table and the
//! session registry.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod digest;
pub mod error;
pub mod http;
pub mod limits;
pub mod poller;
pub mod registry;
pub mod router;
pub mod server;
pub mod storage;

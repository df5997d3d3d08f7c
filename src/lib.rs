//! # hackportal — Problem-Statement Reservation Engine
//!
//! Assigns each registering team a problem statement, keeping committed load
//! balanced across statements and never exceeding a statement's capacity, even
//! under concurrent requests from many coordinator instances.
//!
//! The engine is layered bottom-up:
//!
//! - [`store`] / [`db`]: serializable transactions over problems and holds.
//! - [`cursor`]: shared rotation cursor with TTL.
//! - [`reaper`], [`planner`], [`selector`]: expiry sweep, capacity plan, tiebreak.
//! - [`coordinator`]: the `reserve` / `finalize` workflows.
//! - [`server`]: the HTTP API.

pub mod config;
pub mod coordinator;
pub mod cursor;
pub mod db;
pub mod error;
pub mod events;
pub mod planner;
pub mod prom_metrics;
pub mod reaper;
pub mod selector;
pub mod server;
pub mod store;

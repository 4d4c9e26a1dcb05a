//! Business logic services.
//!
//! The review engine owns every rule about reviewer assignment and pull
//! request state. The HTTP modules are a thin adapter on top of it.
//!
//! The engine only talks to storage through the traits in [`crate::store`],
//! so it runs unchanged against SQLite or the in-memory store.

pub mod http_api;
pub mod http_server;
pub mod review_engine;
pub mod reviewer_selection;

pub use review_engine::{Reassignment, ReviewEngine};
pub use reviewer_selection::ReviewerSelector;

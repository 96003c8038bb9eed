//! Reelstream Web - JSON API Server
//!
//! Catalog browsing, download control and byte-range streaming of movies
//! that are still arriving from the swarm.

pub mod handlers;
pub mod server;

// Re-export main types
pub use server::{AppState, Pagination, build_state, router, run_server};

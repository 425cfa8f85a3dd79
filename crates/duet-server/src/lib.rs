//! # duet-server
//!
//! HTTP surface for duet runs.
//!
//! - `POST /api/tdd` starts a run and streams its events as SSE `data:` JSON
//!   records, closed by `data: [DONE]`
//! - `GET /api/health` reports liveness
//!
//! Each request owns its run: when the client disconnects the event stream is
//! dropped and the run is cancelled.

mod server;
mod sse;

pub use server::{router, serve, AppState, SharedState};
pub use sse::TddRequest;

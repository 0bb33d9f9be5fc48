//! HTTP API for the schemaflow migration orchestration engine
//!
//! Transport is a thin adapter over the engine: routing, request decoding and
//! the error envelope live here; all semantics live in `schemaflow-engine`.

pub mod error;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use routes::{router, AppState};

//! # Tradeflow Server
//!
//! HTTP surface for the run execution engine:
//!
//! - **Submission**: `POST /runs` schedules a pipeline run and returns
//!   its id without blocking on execution
//! - **Status**: `GET /runs/{id}` and `GET /runs` report run state and
//!   full event history
//! - **Streaming**: `GET /runs/{id}/stream` replays history and tails
//!   live events over SSE until the run terminates
//! - **Access gate**: a shared-secret bearer token in front of every
//!   run operation

pub mod auth;
pub mod config;
pub mod errors;
pub mod routes;
pub mod run_handlers;
pub mod state;

//! Examdesk - exam-prep quiz backend
//!
//! Generates multiple-choice questions through an external generator, keeps
//! their answers server-side, grades submissions once per user and question,
//! and enforces per-plan daily and monthly quotas.
//!
//! ## Services
//!
//! - **Quota ledger**: generation and evaluation counters with daily/monthly windows
//! - **Answer vault**: generated items keyed by opaque ids, answers never exposed before grading
//! - **Evaluation engine**: one graded submission per (user, question)
//! - **Generation orchestrator**: premium gate, quota, generator call, persistence
//! - **Chat**: a conversation machine running the same flow over a messaging channel

pub mod auth;
pub mod cache;
pub mod chat;
pub mod config;
pub mod db;
pub mod logging;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{ExamdeskError, Result};

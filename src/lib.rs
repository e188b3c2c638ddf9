//! Floodgate - In-memory Admission Control
//!
//! This crate implements a per-key token-bucket rate limiter and a thin HTTP
//! layer that puts it in front of a handler. State lives in process memory
//! only; a restart resets every quota.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;

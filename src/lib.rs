//! Feedstore - a per-account local content cache for federated social clients
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Live observations (timeline, context, lists, filters)    │
//! │  - Status reconstruction and filter compilation             │
//! └─────────────────────────────────────────────────────────────┘
//!                 │ reads (pool)          ▲ commit generations
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx), one file per identity                     │
//! │  - Single serialized writer with resume policy              │
//! │  - Decoded content cache (moka)                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `data`: Database, normalization and write serialization
//! - `service`: Read-side queries and the observation engine
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod service;

pub use config::StoreConfig;
pub use data::Database;
pub use error::{Result, StoreError};
pub use service::{Observation, ThreadContext};

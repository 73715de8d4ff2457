//! # sortition-runtime
//!
//! Async orchestration for `sortition-core`.
//!
//! Portfolio generation is CPU-bound and can take minutes for large pools.
//! This crate moves it onto tokio's blocking pool, caps how many sortitions
//! generate at once and enforces a wall-clock deadline per run.
//!
//! The engine itself stays synchronous and deterministic; nothing here
//! changes which panels are found or how they are drawn.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sortition_core::SortitionDefinition;
//! use sortition_runtime::{RuntimeConfig, SortitionRuntime};
//!
//! let runtime = SortitionRuntime::new(RuntimeConfig::from_yaml_file("runtime.yaml")?)?;
//! let definition = Arc::new(SortitionDefinition::from_file("assembly.yaml")?);
//!
//! let portfolio = runtime.generate(definition.clone()).await?;
//! let outcome = runtime.sample(portfolio.sortition_id(), Some("public-seed"))?;
//! ```

pub mod config;
pub mod orchestrator;

pub use config::RuntimeConfig;
pub use orchestrator::{RuntimeError, SortitionRuntime, SortitionRuntimeBuilder};

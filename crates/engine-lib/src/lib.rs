//! Core library for the remediation engine
//!
//! This crate provides the decision pipeline that turns detected
//! incidents into safe, bounded corrective actions:
//! - Incident ingestion and classification
//! - Table-driven policy evaluation
//! - Safety guard (cooldown, rate limit, oscillation)
//! - Conflict-safe action execution
//! - Durable action history
//! - Health checks and observability

pub mod classify;
pub mod error;
pub mod executor;
pub mod guard;
pub mod health;
pub mod history;
pub mod ingest;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod policy;

pub use error::{ClusterError, EngineError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use pipeline::{IncidentStatus, PipelineConfig, RemediationPipeline};

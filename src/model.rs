//! Core data model for stagelink.
//!
//! Strategies, the context that selects one, the artifacts they operate on,
//! and the reports they hand back.

mod artifact;
mod context;
mod health;
mod mapping;
mod run;
mod session;
mod strategy;

pub use artifact::{Artifact, ArtifactType};
pub use context::{PerformanceMode, Platform, ReferenceContext};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use mapping::{ImportMapping, LinkKind, Matcher, SymlinkMapping};
pub use run::{ArtifactResult, RunOptions, TestRun};
pub use session::{DeployedDigest, DeploymentLogEntry, DeploymentOutcome, SessionInfo};
pub use strategy::{Details, SetupAttempt, SetupOutcome, SetupReport, StrategyKind};

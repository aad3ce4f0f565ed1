pub mod behavior;
pub mod config;
pub mod executor;
pub mod gate;
pub mod graph;
pub mod mirror;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod telemetry;
pub mod traits;
pub mod verdict;

// Re-export common types for convenience
pub use config::{ConfigError, GateConfig};
pub use executor::*;
pub use gate::{GateDecision, GateError, PromotionGate};
pub use graph::GraphError;
pub use mirror::{MirrorError, MirrorReport, RegistryMirror};
pub use model::*;
pub use orchestrator::{OrchestratorError, PackageResult, TestOrchestrator};
pub use pipeline::{GatePipeline, PipelineError, RunOutcome, RunStats};
pub use traits::*;
pub use verdict::{SecurityAssessment, VerdictStage};

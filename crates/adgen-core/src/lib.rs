//! Pipeline orchestration for generated video ads.
//!
//! A [`StageOrchestrator`] drives a [`Session`] from a product URL to a
//! finished video through a remote multi-agent service:
//!
//! 1. extraction of product metadata
//! 2. market analysis
//! 3. script generation, refined by user feedback until approved
//! 4. A-roll and B-roll footage
//! 5. composition of the final video
//!
//! Agent replies are free-form text. The [`extract`] module pulls the
//! structured artifacts out of them, and [`FallbackPolicy`] supplies
//! defaults when nothing usable comes back.

mod config;
mod error;
mod events;
pub mod extract;
mod fallback;
mod feedback;
mod orchestrator;
mod remote;
mod session;
#[cfg(test)]
mod test_support;

pub use config::{
    EngineConfig, FallbackConfig, FootageConfig, ProjectConfig, PromptsConfig, RemoteConfig,
    StorageConfig, load_project_config, write_default_config,
};
pub use error::CoreError;
pub use events::{Activity, Operation, PipelineObserver, PipelineSnapshot};
pub use extract::{AgentEvent, VideoLabel};
pub use fallback::FallbackPolicy;
pub use feedback::{FeedbackState, validate_feedback};
pub use orchestrator::StageOrchestrator;
pub use remote::{AgentService, HttpAgentService};
pub use session::{
    Artifact, ArtifactKind, AudienceInsights, Competitor, Demographics, MarketAnalysis,
    ProductMetadata, Script, Session, Stage,
};

//! Task breakdown pipeline: prompt building, response parsing and
//! backend orchestration.

pub mod complexity;
pub mod extract;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod repair;
pub mod types;

pub use orchestrator::{
    AttemptFailure, BackendHealth, BackendSlot, BreakdownOrchestrator, FailureReason,
    GenerationError, GenerationReport, USER_MESSAGE,
};
pub use parser::{ParseError, parse, parse_with_description};
pub use prompt::PromptBuilder;
pub use types::{DescriptionError, GenerationRequest, GuideStepDraft, TaskBreakdown, TaskDescription};

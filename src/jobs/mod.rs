//! Transcription jobs: registry, orchestration and persistence

mod events;
mod orchestrator;
mod registry;
mod store;
mod transcript;

pub use events::*;
pub use orchestrator::*;
pub use registry::*;
pub use store::*;
pub use transcript::*;

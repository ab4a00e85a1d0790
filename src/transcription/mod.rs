//! Transcription Module
//!
//! Speech-to-text through remote providers.

mod openai;
mod provider;

pub use openai::*;
pub use provider::*;

//! LLM integration for generating test files
//!
//! A rendered prompt goes to a [`TestGenerator`]; providers live behind that
//! trait so the engine never depends on a particular API.

mod generator;
mod prompt;
mod providers;

pub use generator::{GeneratedArtifact, TestGenerator};
pub use prompt::{PromptRenderer, PromptSections};
pub use providers::create_generator;

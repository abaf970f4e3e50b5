//! Question answering over retrieved context
//!
//! - `client` - Completion service trait and the Ollama client
//! - `prompt` - Prompt assembly from retrieval hits
//! - `response` - Cleanup of raw model output

pub mod client;
pub mod prompt;
pub mod response;

pub use client::{CompletionService, OllamaCompletion};
pub use prompt::PromptBuilder;
pub use response::ResponseFormatter;

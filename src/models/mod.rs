//! Request and Response models for the completion API
//!
//! Wire types exchanged with the upstream chat-completions endpoint.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{ChatCompletionRequest, ChatMessage};
pub use responses::{ChatCompletionResponse, Choice, ChoiceMessage};

// Battlecard generation: prompt construction and response normalization.
// All LLM calls go through llm_client; nothing here talks to a provider.

pub mod processor;
pub mod prompt_builder;
pub mod prompts;

pub use processor::process;
pub use prompt_builder::{Prompt, PromptBuilder};

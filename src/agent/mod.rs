//! Conversation layer: LLM provider clients, the tool-calling
//! orchestrator, and tool dispatch.

pub mod llm;
pub mod orchestrator;
pub mod tools;

pub use orchestrator::Orchestrator;

//! Built-in tools.
//!
//! Each tool exports its registry name, an OpenAI-format schema, a typed
//! argument struct, and an async executor returning a string. Registration
//! is explicit in `agent::tools` — no discovery magic.

pub mod calendar;
pub mod notes;
pub mod web_search;

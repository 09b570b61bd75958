//! Voxgate — a real-time WebRTC voice-assistant gateway.
//!
//! A browser connects over WebSocket, negotiates a WebRTC peer connection,
//! then streams mic audio up while synthesized speech streams down. The
//! server transcribes inbound speech, routes transcripts through a
//! tool-calling LLM loop, and paces the spoken reply back on the same
//! audio track.
//!
//! Module map:
//! - [`audio`] — FIFO queue, clocked frame source, normalization, resampling
//! - [`engine`] — speech-to-text and text-to-speech engines
//! - [`session`] — per-connection peer connection and pipelines
//! - [`server`] — axum HTTP/WebSocket front and the signalling protocol
//! - [`agent`] — LLM clients, tool-calling orchestrator, tool dispatch
//! - [`tools`] — built-in tools (web search, calendar, notes)

pub mod agent;
pub mod audio;
pub mod cli;
pub mod config;
pub mod engine;
pub mod server;
pub mod session;
pub mod tools;

pub use config::Config;
pub use session::Session;

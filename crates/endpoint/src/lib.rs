//! Transport to an Ollama-compatible serving endpoint.
//!
//! [`OllamaClient`] speaks the HTTP API (listing, preload probe, generation);
//! [`OllamaCli`] drives the command-line tool for the textual resident-model
//! report and for unloading. The benchmark core only sees the
//! [`InferenceBackend`] and [`ResidencyProbe`] traits.

pub mod api;
pub mod backend;
pub mod client;
pub mod command;
pub mod error;

pub use api::{GenerateChunk, GenerateOptions, GenerateRequest};
pub use backend::{InferenceBackend, ResidencyProbe};
pub use client::{ByteStream, EndpointAddress, OllamaClient};
pub use command::OllamaCli;
pub use error::EndpointError;

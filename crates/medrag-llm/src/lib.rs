//! Generation service adapters for MedRAG
//!
//! This crate provides the WatsonX and Google Gemini implementations of the
//! `GenerationService` trait.

mod config;
mod gemini;
mod watsonx;


pub use config::{GeminiConfig, WatsonxConfig};
pub use gemini::GeminiClient;
pub use watsonx::WatsonxClient;

// Re-export core types for convenience
pub use medrag_core::{Error, GenerationConfig, GenerationResult, GenerationService, Result};

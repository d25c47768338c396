//! Model provider implementations for toolchat.
//!
//! All providers implement the `toolchat_core::Provider` trait.
//! The factory selects OpenAI or Azure OpenAI based on configuration.

pub mod factory;
pub mod openai_compat;

pub use factory::{build_embedder_from_config, build_from_config};
pub use openai_compat::OpenAiCompatProvider;

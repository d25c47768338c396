//! # toolchat core
//!
//! Domain types, traits, and error definitions for the toolchat service.
//! This crate has no HTTP or runtime dependencies: it defines the model
//! that the provider, tool, and agent crates implement against.
//!
//! - [`message`]: conversation messages and the append-only [`Conversation`]
//! - [`tool`]: the [`Tool`] trait and the name-keyed [`ToolRegistry`]
//! - [`provider`]: the [`Provider`] trait over chat-completion backends
//! - [`error`]: the error taxonomy shared by every crate

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, ReplyOrderError, Role};
pub use provider::{
    EmbeddingRequest, EmbeddingResponse, FinishReason, Provider, ProviderRequest, ProviderResponse,
    ToolDefinition, Usage,
};
pub use tool::{Tool, ToolRegistry, ToolResult, decode_args};

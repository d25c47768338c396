//! The conversation loop: the part of toolchat that talks to the model.
//!
//! Each query follows an **ask → act → observe** cycle:
//!
//! 1. **Send** the conversation and the tool definitions to the provider
//! 2. **If the model stops**: append its answer and return the text
//! 3. **If the model requests tools**: run every call of the round
//!    concurrently, append one tool message per call in request order,
//!    and go back to step 1
//!
//! The cycle is bounded by a round budget and by per-tool, per-round and
//! per-query deadlines.

pub mod loop_runner;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use loop_runner::ConversationLoop;

//! Model transports for Tern.
//!
//! Each transport adapts one upstream wire format (OpenAI-compatible or
//! Anthropic Messages) to the engine's [`traits::ModelTransport`] contract:
//! a uniform request type in, an ordered stream of
//! [`tern_domain::delta::ModelDelta`]s out.  The [`TransportRegistry`]
//! instantiates every configured transport at startup and resolves
//! per-request overrides to an instance.

pub mod anthropic;
pub mod openai_compat;
pub mod registry;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

// The names the rest of the workspace imports.
pub use registry::TransportRegistry;
pub use traits::{ChatRequest, ChatResponse, ModelTransport};

//! Shared domain types for Tern.
//!
//! Everything the engine, transports, tools, and stores agree on lives
//! here: the raw model-delta contract, the outbound packet protocol,
//! conversation messages, document references, configuration, and the
//! common error type.

pub mod config;
pub mod delta;
pub mod document;
pub mod error;
pub mod message;
pub mod packet;
pub mod stream;

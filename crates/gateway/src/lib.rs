//! Tern gateway: the streaming turn engine, the HTTP API that exposes it,
//! and the `tern` CLI.
//!
//! The library target exists so integration tests and embedders can drive
//! the engine directly; the `tern` binary in `main.rs` is a thin shell over
//! [`cli`] and [`api`].

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod engine;
pub mod state;

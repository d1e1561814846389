// src/transport/memory/mod.rs

//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It is intended primarily for testing, local execution,
//! and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! The in-memory transport defines the **reference behavior** for the transport
//! layer: queues on the default exchange, exclusive and auto-delete lifetimes,
//! broker-named queues, prefetch windows, and acknowledgement bookkeeping.
//! The AMQP transport relies on a real broker for the same behaviour.
//!
//! ## Non-Goals
//!
//! This transport does not emulate persistence, exchanges other than the
//! default one, or network failure beyond refused connections.

mod hub;
mod transport;

pub use hub::MemoryHub;
pub use transport::create_transport;

//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `Transport` trait. The AMQP transport is hidden behind a feature flag;
//! callers pick a transport with [`TransportKind`] and never name the
//! concrete types.

mod amqp;
mod memory;

use std::sync::Arc;

pub use memory::MemoryHub;

use crate::{
    // ---
    ConnectionContext,
    Result,
    TransportBox,
};

/// Which broker a [`Channel`](crate::Channel) talks to.
#[derive(Clone, Default)]
pub enum TransportKind {
    /// A real AMQP 0-9-1 broker described by the connection context.
    #[default]
    Amqp,

    /// The in-process broker shared through a [`MemoryHub`].
    Memory(Arc<MemoryHub>),
}

impl std::fmt::Debug for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Amqp => f.write_str("Amqp"),
            TransportKind::Memory(_) => f.write_str("Memory"),
        }
    }
}

/// Build an unopened transport of the requested kind.
///
/// # Errors
///
/// [`Error::Configuration`](crate::Error::Configuration) when `Amqp` is requested but the crate was built
/// without the `transport_lapin` feature.
pub fn create_transport(
    transport_id: &str,
    context: &ConnectionContext,
    kind: &TransportKind,
) -> Result<TransportBox> {
    // ---
    match kind {
        TransportKind::Memory(hub) => Ok(memory::create_transport(transport_id, hub.clone())),

        #[cfg(feature = "transport_lapin")]
        TransportKind::Amqp => Ok(amqp::create_lapin_transport(transport_id, context)),

        #[cfg(not(feature = "transport_lapin"))]
        TransportKind::Amqp => {
            let _ = context;
            Err(crate::Error::Configuration(
                "AMQP transport requires the transport_lapin feature".into(),
            ))
        }
    }
}

//! Domain layer public interface.
//!
//! This module defines domain-level abstractions that are independent of
//! broker client libraries.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod transport;

// --- Transport domain re-exports ---

pub use transport::{
    //
    Delivery,
    Transport,
    TransportBox,
};

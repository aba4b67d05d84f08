//! Payment policies
//!
//! The destination guard decides which addresses the agent may pay.

pub mod destination;

pub use destination::{
    Classification, DestinationGuard, DestinationReason, UNTRUSTED_DESTINATION_REASON,
};

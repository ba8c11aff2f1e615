//! can-connection: thread-affine facade over multi-bus CAN adapters
//!
//! This crate provides the uniform surface that every concrete CAN adapter
//! backend sits behind. A [`CanConnection`] owns at most one execution
//! context for all hardware-touching operations; public methods can be
//! called from any thread and are marshalled onto that context with
//! blocking request/response semantics. Per-bus configuration and an
//! inclusion/exclusion filter engine decide, frame by frame, whether an
//! inbound frame is kept, dropped, or flagged for notification.
//!
//! The default build enables a `mock` backend so that consumers and tests
//! can compile and run on any host without adapter hardware.

mod types;
pub use types::{
    BusConfig, ConnectionKind, ConnectionOptions, ConnectionStatus, FilterRule, Frame,
    FrameVerdict, StatusCell, Timestamp,
};

mod error;
pub use error::{ConnectionError, Result};

mod traits;
pub use traits::ConnectionBackend;

mod queue;
pub use queue::FrameQueue;

mod bus;

mod dispatch;

mod connection;
pub use connection::{CanConnection, ReceiveContext};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockBackend, MockCall};

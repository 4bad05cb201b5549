//! Power-state sequencer management.
//!
//! The pieces fit together like this: a [`registry::Registry`] owns one
//! [`device::SequencerDevice`] per possible core (plus an optional shared
//! cluster device), each wrapping an opaque [`backend::SequencerBackend`]
//! that encodes and commits hardware command sequences. A
//! [`voltage::VoltageCoordinator`] layers the cross-core hand-off protocol
//! on top of the registry so a voltage register is only ever written from
//! the execution context that owns it.

use snafu::Snafu;

pub mod backend;
pub mod device;
pub mod qchannel;
pub mod rail;
pub mod registry;
pub mod voltage;

/// Errors produced by sequencer management operations.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum Error {
    /// The device exists but has not finished sequence programming yet.
    /// Recoverable; retry once [`registry::Registry::probe_complete`] reports true.
    NotReady,
    /// No device is registered for the given name or core id.
    NoSuchDevice,
    /// A core id or configuration value is out of range.
    InvalidArgument,
    /// Memory for the mode table could not be allocated.
    ResourceExhausted,
    /// The register-sequence backend reported a failure.
    Backend {
        /// Underlying backend error.
        source: backend::BackendError,
    },
}

/// Result alias for sequencer management operations.
pub type Result<T> = core::result::Result<T, Error>;

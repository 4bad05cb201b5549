//! Core logic for per-core hardware power-state sequencers (SPM).
//!
//! Each processor core carries a small hardware state machine that executes a
//! programmed command sequence when the core enters a low-power mode. This
//! crate owns the orchestration above the raw register driver: programming
//! mode sequences into each device, arming a device for a requested mode,
//! and coordinating voltage changes across cores so that no core's state
//! machine is raced from a foreign execution context.
//!
//! Hardware mechanisms (the register-sequence backend, the Q-channel override
//! register, the supply-rail window) are expressed as traits so the logic is
//! testable on the host; the embedding kernel provides the MMIO
//! implementations.
#![no_std]
#![deny(missing_docs)]

extern crate alloc;

#[cfg(all(test, not(target_os = "none")))]
#[macro_use]
extern crate std;

pub mod platform;
pub mod power;

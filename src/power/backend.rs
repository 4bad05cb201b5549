//! Interface to the register-sequence backend.
//!
//! The backend owns the raw SAW register map and the byte format of hardware
//! command sequences. This crate never interprets command bytes; it hands
//! them to the backend and records the offsets the backend assigns.

use hashbrown::HashMap;

#[cfg(test)]
use mockall::automock;
use snafu::Snafu;

/// Errors reported by the register-sequence backend.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum BackendError {
    /// The sequence memory cannot hold the command bytes being written.
    SequenceOverflow,
    /// A voltage transition did not complete within the configured timeout.
    VoltageTimeout,
    /// The requested PMIC data port was not configured for this device.
    PortUnconfigured,
    /// The hardware version register did not match a supported revision.
    InvalidVersion,
}

/// Configuration registers the backend programs during initialization.
///
/// These name the sequencer's config, adaptive-voltage-scaling, delay and
/// PMIC data registers; the backend maps them onto its register layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigRegister {
    /// Sequencer configuration.
    Cfg,
    /// AVS control.
    AvsControl,
    /// AVS hysteresis.
    AvsHysteresis,
    /// AVS voltage limit.
    AvsLimit,
    /// AVS delay.
    AvsDelay,
    /// Sequencer delay.
    SequencerDelay,
    /// Sequencer control.
    SequencerControl,
    /// PMIC data register `0..=7`.
    PmicData(u8),
}

/// PMIC data ports a device may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmicPort {
    /// Voltage control.
    Voltage,
    /// Number of active regulator phases.
    Phase,
    /// Regulator frequency / low-power mode.
    Frequency,
}

/// Register-init values and timing handed to the backend at initialization.
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    /// Id of the hardware version register.
    pub version_register: u32,
    /// Timeout for voltage transitions, in microseconds.
    pub voltage_timeout_us: u32,
    /// Values to program into the listed configuration registers.
    pub register_init_values: HashMap<ConfigRegister, u32>,
    /// PMIC port assignment for voltage control, if present.
    pub vctl_port: Option<u8>,
    /// PMIC port assignment for phase control, if present.
    pub phase_port: Option<u8>,
    /// PMIC port assignment for frequency control, if present.
    pub frequency_port: Option<u8>,
}

/// Per-device register-sequence backend mechanism.
///
/// One instance per device; it carries the device's register state (base
/// address, enable flag, write offsets). All methods are synchronous and the
/// backend is responsible for the memory barriers that order its own
/// register writes.
#[cfg_attr(test, automock)]
pub trait SequencerBackend {
    /// Program the configuration registers and verify the hardware version.
    ///
    /// # Errors
    /// Returns an error if the version register does not match a supported
    /// revision.
    fn init(&mut self, config: &BackendConfig) -> Result<(), BackendError>;

    /// Encode `command` into sequence memory starting at `cursor`.
    ///
    /// Returns the advanced cursor, which is the start offset for the next
    /// sequence. The entry just written starts at the `cursor` passed in.
    ///
    /// # Errors
    /// Returns [`BackendError::SequenceOverflow`] if the sequence memory is
    /// exhausted.
    fn write_sequence(&mut self, command: &[u8], cursor: u32) -> Result<u32, BackendError>;

    /// Commit all pending sequence writes to hardware.
    fn flush(&mut self);

    /// Enable or disable the sequencer.
    ///
    /// # Errors
    /// Returns an error if the enable bit could not be committed.
    fn set_enable(&mut self, enable: bool) -> Result<(), BackendError>;

    /// Select the start offset the sequencer will execute from on the next
    /// low-power entry. `power_collapse` selects the deeper hardware
    /// handshake used by the power-collapse-class modes.
    ///
    /// # Errors
    /// Returns an error if the start address could not be committed.
    fn set_low_power_start(&mut self, offset: u32, power_collapse: bool)
        -> Result<(), BackendError>;

    /// Write an encoded voltage level to the voltage-control port.
    ///
    /// # Errors
    /// Returns [`BackendError::VoltageTimeout`] if the transition does not
    /// settle in time.
    fn set_voltage(&mut self, level: u32) -> Result<(), BackendError>;

    /// Write a raw value to one of the PMIC data ports.
    ///
    /// # Errors
    /// Returns [`BackendError::PortUnconfigured`] if the device has no such
    /// port.
    fn set_pmic_data(&mut self, port: PmicPort, value: u32) -> Result<(), BackendError>;

    /// Re-apply the register-init values after a full register-state loss.
    fn reinit(&mut self);
}

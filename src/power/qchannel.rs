//! Q-channel override control.
//!
//! Some sequencer devices carry a register that overrides the Q-channel
//! handshake between the core and its power controller. The override state
//! must track the most recently requested low-power mode even when the
//! sequencer itself failed to re-arm, so the controller writes it
//! unconditionally after every mode change.

use bitfield::bitfield;
use core::sync::atomic::{fence, Ordering};

#[cfg(test)]
use mockall::automock;

use super::device::LowPowerMode;

bitfield! {
    /// Value written to the Q-channel override register.
    ///
    /// Bit 0 is reserved by the hardware and always written as zero.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct QchannelControl(u8);
    impl Debug;
    /// Ignore the Q-channel handshake entirely.
    pub qchannel_ignore, set_qchannel_ignore: 1;
    /// Drive the power controller through the legacy (sequencer) interface.
    pub legacy_mode, set_legacy_mode: 2;
}

impl QchannelControl {
    /// The raw register value.
    #[must_use]
    pub fn raw(&self) -> u8 {
        self.0
    }
}

/// The fixed per-mode override policy.
///
/// Modes that leave the core clocked (disabled, clock gating) bypass the
/// handshake; retention keeps it; the power-collapse-class modes bypass it
/// and hand control to the legacy sequencer path.
#[must_use]
pub fn control_for_mode(mode: LowPowerMode) -> QchannelControl {
    let mut value = QchannelControl(0);
    match mode {
        LowPowerMode::Disabled | LowPowerMode::ClockGating => {
            value.set_qchannel_ignore(true);
        }
        LowPowerMode::Retention => {}
        LowPowerMode::Gdhs | LowPowerMode::PowerCollapse => {
            value.set_qchannel_ignore(true);
            value.set_legacy_mode(true);
        }
    }
    value
}

/// Write mechanism for a device's Q-channel override register.
///
/// Implementations must order the write before any subsequent hardware
/// transition (a full barrier after the store).
#[cfg_attr(test, automock)]
pub trait QchannelOverride {
    /// Commit a control value to the override register.
    fn write(&self, value: QchannelControl);
}

/// Memory-mapped Q-channel override register.
pub struct MmioQchannel {
    register: *mut u32,
}

// The register points at device memory, not shared heap state.
unsafe impl Send for MmioQchannel {}
unsafe impl Sync for MmioQchannel {}

impl MmioQchannel {
    /// Wrap a mapped override register.
    ///
    /// # Safety
    /// `register` must be a valid, mapped device register that remains
    /// mapped for the lifetime of this value.
    #[must_use]
    pub unsafe fn new(register: *mut u32) -> Self {
        Self { register }
    }
}

impl QchannelOverride for MmioQchannel {
    fn write(&self, value: QchannelControl) {
        // SAFETY: the constructor's contract guarantees a valid mapping.
        unsafe {
            self.register.write_volatile(u32::from(value.raw()));
        }
        fence(Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(LowPowerMode::Disabled, 0b010; "disabled bypasses handshake")]
    #[test_case(LowPowerMode::ClockGating, 0b010; "clock gating bypasses handshake")]
    #[test_case(LowPowerMode::Retention, 0b000; "retention keeps handshake")]
    #[test_case(LowPowerMode::Gdhs, 0b110; "gdhs is legacy and bypassed")]
    #[test_case(LowPowerMode::PowerCollapse, 0b110; "power collapse is legacy and bypassed")]
    fn policy_table(mode: LowPowerMode, expected: u8) {
        assert_eq!(control_for_mode(mode).raw(), expected);
    }

    #[test_case(LowPowerMode::Retention)]
    #[test_case(LowPowerMode::PowerCollapse)]
    fn policy_is_deterministic(mode: LowPowerMode) {
        let first = control_for_mode(mode);
        for _ in 0..8 {
            assert_eq!(control_for_mode(mode), first);
        }
    }
}

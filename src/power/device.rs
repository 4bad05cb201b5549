//! The per-core sequencer device: mode-table programming and the low-power
//! mode controller.

use alloc::{boxed::Box, string::String, vec::Vec};
use log::{debug, warn};
use snafu::{ensure, OptionExt, ResultExt};

use super::{
    backend::{BackendConfig, SequencerBackend},
    qchannel::{self, QchannelOverride},
    BackendSnafu, Error, NotReadySnafu, ResourceExhaustedSnafu, Result,
};

/// A low-power mode the sequencer can be armed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowPowerMode {
    /// Sequencer disabled; the core idles clocked.
    Disabled,
    /// Architectural clock gating only.
    ClockGating,
    /// Logic retention at reduced voltage.
    Retention,
    /// Gated head switch: rail gated, memory retained.
    Gdhs,
    /// Full power collapse of the core.
    PowerCollapse,
}

impl LowPowerMode {
    /// Whether this mode uses the deeper power-collapse hardware handshake.
    #[must_use]
    pub fn is_power_collapse(self) -> bool {
        matches!(self, Self::Gdhs | Self::PowerCollapse)
    }
}

/// One configured mode sequence, before programming.
///
/// Two entries may share a mode and differ only in `notify_rpm`; they are
/// programmed at distinct offsets.
#[derive(Debug, Clone)]
pub struct ModeEntry {
    /// The mode this sequence implements.
    pub mode: LowPowerMode,
    /// Whether entering this mode notifies the resource power manager.
    pub notify_rpm: bool,
    /// Opaque hardware command bytes for this mode.
    pub command: Vec<u8>,
}

/// Everything needed to initialize one device.
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    /// Register-init values for the backend.
    pub backend: BackendConfig,
    /// The mode sequences to program, in order.
    pub modes: Vec<ModeEntry>,
}

/// A programmed mode-table row: where a mode's sequence starts.
#[derive(Debug, Clone, Copy)]
struct ProgrammedMode {
    mode: LowPowerMode,
    notify_rpm: bool,
    start_offset: u32,
}

/// One power-state sequencer device.
///
/// Every possible core has one, and a system may additionally carry a shared
/// cluster device. The device owns its backend register state; mutation from
/// a foreign execution context must go through the voltage coordinator's
/// hand-off path.
pub struct SequencerDevice<B> {
    name: String,
    backend: B,
    modes: Vec<ProgrammedMode>,
    initialized: bool,
    voltage_level: u32,
    qchannel: Option<Box<dyn QchannelOverride + Send>>,
}

impl<B: SequencerBackend> SequencerDevice<B> {
    /// Create an uninitialized device.
    ///
    /// `qchannel` is the override register mechanism, absent on devices that
    /// do not support Q-channel override.
    pub fn new(
        name: impl Into<String>,
        backend: B,
        qchannel: Option<Box<dyn QchannelOverride + Send>>,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            modes: Vec::new(),
            initialized: false,
            voltage_level: 0,
            qchannel,
        }
    }

    /// The device's registry name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the mode table has been programmed and committed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The last voltage level committed for this device.
    #[must_use]
    pub fn voltage_level(&self) -> u32 {
        self.voltage_level
    }

    /// Program the mode table into sequence memory and mark the device ready.
    ///
    /// All-or-nothing: any encoding failure leaves the device uninitialized
    /// with no partial mode table, because a controller operation must never
    /// dispatch into a half-built sequence. On success all pending sequence
    /// writes are flushed as a single commit.
    ///
    /// # Errors
    /// Backend init and encode failures are passed through; mode-table
    /// allocation failure is [`Error::ResourceExhausted`].
    pub fn initialize(&mut self, config: &DeviceConfig) -> Result<()> {
        let mut table = Vec::new();
        table
            .try_reserve_exact(config.modes.len())
            .ok()
            .context(ResourceExhaustedSnafu)?;

        self.backend.init(&config.backend).context(BackendSnafu)?;

        let mut cursor = 0;
        for entry in &config.modes {
            // The entry starts wherever the previous sequence ended.
            let start_offset = cursor;
            cursor = self
                .backend
                .write_sequence(&entry.command, cursor)
                .context(BackendSnafu)?;
            table.push(ProgrammedMode {
                mode: entry.mode,
                notify_rpm: entry.notify_rpm,
                start_offset,
            });
        }

        self.backend.flush();
        self.modes = table;
        self.initialized = true;
        debug!(
            "sequencer {:?} initialized with {} mode(s)",
            self.name,
            self.modes.len()
        );
        Ok(())
    }

    /// Arm the device for `mode`.
    ///
    /// Disabling turns the sequencer off without touching the mode table.
    /// Any other mode enables the sequencer and selects the start offset of
    /// the first table entry matching `(mode, notify_rpm)`, falling back to
    /// offset 0 when no entry matches. The Q-channel override is written
    /// after either outcome, even when re-arming failed, so the override
    /// state always tracks the requested mode.
    ///
    /// # Errors
    /// [`Error::NotReady`] before initialization (no hardware access is
    /// attempted); backend failures otherwise.
    pub fn set_low_power_mode(&mut self, mode: LowPowerMode, notify_rpm: bool) -> Result<()> {
        ensure!(self.initialized, NotReadySnafu);

        let result = if mode == LowPowerMode::Disabled {
            self.backend.set_enable(false).context(BackendSnafu)
        } else {
            match self.backend.set_enable(true) {
                Ok(()) => {
                    let start_offset = self.start_offset_for(mode, notify_rpm);
                    self.backend
                        .set_low_power_start(start_offset, mode.is_power_collapse())
                        .context(BackendSnafu)
                }
                Err(source) => Err(Error::Backend { source }),
            }
        };

        if let Some(q2s) = &self.qchannel {
            q2s.write(qchannel::control_for_mode(mode));
        }

        result
    }

    fn start_offset_for(&self, mode: LowPowerMode, notify_rpm: bool) -> u32 {
        match self
            .modes
            .iter()
            .find(|m| m.mode == mode && m.notify_rpm == notify_rpm)
        {
            Some(m) => m.start_offset,
            None => {
                // Offset 0 is a reachable default sequence; an unmatched pair
                // is accepted but may indicate a misconfiguration.
                debug!(
                    "sequencer {:?}: no sequence for {mode:?} notify_rpm={notify_rpm}, using offset 0",
                    self.name
                );
                0
            }
        }
    }

    /// Commit a voltage level for this device.
    ///
    /// The cached level is published before the register write so concurrent
    /// readers see the intended level promptly; the register write is the
    /// authoritative commit.
    ///
    /// # Errors
    /// [`Error::NotReady`] before initialization; backend failures otherwise.
    pub fn set_voltage(&mut self, level: u32) -> Result<()> {
        ensure!(self.initialized, NotReadySnafu);
        self.voltage_level = level;
        self.backend.set_voltage(level).context(BackendSnafu)
    }

    /// Re-apply the backend register-init values after register-state loss.
    pub fn reinit_backend(&mut self) {
        if !self.initialized {
            warn!("sequencer {:?} reinit before initialization", self.name);
        }
        self.backend.reinit();
    }

    pub(super) fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::backend::{BackendError, MockSequencerBackend};
    use crate::power::qchannel::MockQchannelOverride;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use test_case::test_case;

    fn entry(mode: LowPowerMode, notify_rpm: bool, command: &[u8]) -> ModeEntry {
        ModeEntry {
            mode,
            notify_rpm,
            command: command.to_vec(),
        }
    }

    /// The three-mode table used throughout: retention at 0, power collapse
    /// without and with RPM notification at 64 and 96.
    fn three_mode_config() -> DeviceConfig {
        DeviceConfig {
            backend: BackendConfig::default(),
            modes: vec![
                entry(LowPowerMode::Retention, false, &[0x0b, 0x0f]),
                entry(LowPowerMode::PowerCollapse, false, &[0x32, 0x0f]),
                entry(LowPowerMode::PowerCollapse, true, &[0x32, 0xb0, 0x0f]),
            ],
        }
    }

    /// Expectations for a successful three-mode initialization: the cursor
    /// advances 0 -> 64 -> 96 -> 128, so the entries start at 0, 64, 96.
    fn expect_three_mode_init(backend: &mut MockSequencerBackend) {
        backend.expect_init().times(1).returning(|_| Ok(()));
        backend
            .expect_write_sequence()
            .withf(|command, cursor| command == [0x0b, 0x0f] && *cursor == 0)
            .times(1)
            .returning(|_, _| Ok(64));
        backend
            .expect_write_sequence()
            .withf(|command, cursor| command == [0x32, 0x0f] && *cursor == 64)
            .times(1)
            .returning(|_, _| Ok(96));
        backend
            .expect_write_sequence()
            .withf(|command, cursor| command == [0x32, 0xb0, 0x0f] && *cursor == 96)
            .times(1)
            .returning(|_, _| Ok(128));
        backend.expect_flush().times(1).return_const(());
    }

    fn initialized_device(backend: MockSequencerBackend) -> SequencerDevice<MockSequencerBackend> {
        let mut dev = SequencerDevice::new("cpu0-saw", backend, None);
        dev.initialize(&three_mode_config()).expect("initialize");
        dev
    }

    #[test]
    fn uninitialized_device_is_not_ready_and_touches_no_hardware() {
        // No expectations at all: any backend call would panic.
        let mut dev = SequencerDevice::new("cpu0-saw", MockSequencerBackend::new(), None);
        assert_eq!(
            dev.set_low_power_mode(LowPowerMode::Retention, false),
            Err(Error::NotReady)
        );
        assert_eq!(dev.set_voltage(0xa0), Err(Error::NotReady));
        assert!(!dev.is_initialized());
    }

    #[test]
    fn initialization_assigns_sequential_offsets() {
        let mut backend = MockSequencerBackend::new();
        expect_three_mode_init(&mut backend);
        backend
            .expect_set_enable()
            .with(eq(true))
            .returning(|_| Ok(()));
        backend
            .expect_set_low_power_start()
            .with(eq(96), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut dev = initialized_device(backend);
        assert!(dev.is_initialized());
        dev.set_low_power_mode(LowPowerMode::PowerCollapse, true)
            .expect("arm power collapse");
    }

    #[test]
    fn encode_failure_leaves_device_uninitialized() {
        let mut backend = MockSequencerBackend::new();
        backend.expect_init().returning(|_| Ok(()));
        backend
            .expect_write_sequence()
            .withf(|command, cursor| command == [0x0b, 0x0f] && *cursor == 0)
            .returning(|_, _| Ok(64));
        backend
            .expect_write_sequence()
            .withf(|command, cursor| command == [0x32, 0x0f] && *cursor == 64)
            .returning(|_, _| Err(BackendError::SequenceOverflow));
        // No flush: the commit barrier must not run on a failed build.

        let mut dev = SequencerDevice::new("cpu0-saw", backend, None);
        assert_eq!(
            dev.initialize(&three_mode_config()),
            Err(Error::Backend {
                source: BackendError::SequenceOverflow
            })
        );
        assert!(!dev.is_initialized());
        assert_eq!(
            dev.set_low_power_mode(LowPowerMode::Retention, false),
            Err(Error::NotReady)
        );
    }

    #[test]
    fn backend_init_failure_aborts() {
        let mut backend = MockSequencerBackend::new();
        backend
            .expect_init()
            .returning(|_| Err(BackendError::InvalidVersion));

        let mut dev = SequencerDevice::new("cpu0-saw", backend, None);
        assert_eq!(
            dev.initialize(&three_mode_config()),
            Err(Error::Backend {
                source: BackendError::InvalidVersion
            })
        );
        assert!(!dev.is_initialized());
    }

    #[test]
    fn disabled_mode_only_disables_the_sequencer() {
        let mut backend = MockSequencerBackend::new();
        expect_three_mode_init(&mut backend);
        // Only a disable is allowed; an offset lookup would call
        // set_low_power_start and panic the mock.
        backend
            .expect_set_enable()
            .with(eq(false))
            .times(1)
            .returning(|_| Ok(()));

        let mut dev = initialized_device(backend);
        dev.set_low_power_mode(LowPowerMode::Disabled, false)
            .expect("disable");
    }

    #[test_case(LowPowerMode::Retention, false, 0; "exact match at base")]
    #[test_case(LowPowerMode::PowerCollapse, false, 64; "exact match mid table")]
    #[test_case(LowPowerMode::PowerCollapse, true, 96; "notify flag selects distinct entry")]
    #[test_case(LowPowerMode::Gdhs, true, 0; "absent mode falls back to offset 0")]
    #[test_case(LowPowerMode::Retention, true, 0; "absent notify flag falls back to offset 0")]
    fn offset_selection(mode: LowPowerMode, notify_rpm: bool, expected_offset: u32) {
        let mut backend = MockSequencerBackend::new();
        expect_three_mode_init(&mut backend);
        backend
            .expect_set_enable()
            .with(eq(true))
            .times(1)
            .returning(|_| Ok(()));
        backend
            .expect_set_low_power_start()
            .with(eq(expected_offset), eq(mode.is_power_collapse()))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut dev = initialized_device(backend);
        dev.set_low_power_mode(mode, notify_rpm).expect("arm mode");
    }

    #[test]
    fn power_collapse_with_notify_writes_qchannel_value_six() {
        let mut backend = MockSequencerBackend::new();
        expect_three_mode_init(&mut backend);
        backend
            .expect_set_enable()
            .with(eq(true))
            .returning(|_| Ok(()));
        backend
            .expect_set_low_power_start()
            .with(eq(96), eq(true))
            .returning(|_, _| Ok(()));

        let mut q2s = MockQchannelOverride::new();
        q2s.expect_write()
            .withf(|value| value.raw() == 0b110)
            .times(1)
            .return_const(());

        let mut dev = SequencerDevice::new("cpu0-saw", backend, Some(Box::new(q2s)));
        dev.initialize(&three_mode_config()).expect("initialize");
        dev.set_low_power_mode(LowPowerMode::PowerCollapse, true)
            .expect("arm power collapse");
    }

    #[test]
    fn enable_failure_still_configures_qchannel() {
        let mut backend = MockSequencerBackend::new();
        expect_three_mode_init(&mut backend);
        backend
            .expect_set_enable()
            .with(eq(true))
            .returning(|_| Err(BackendError::VoltageTimeout));
        // set_low_power_start must not be called after a failed enable.

        let mut q2s = MockQchannelOverride::new();
        q2s.expect_write()
            .withf(|value| value.raw() == 0b000)
            .times(1)
            .return_const(());

        let mut dev = SequencerDevice::new("cpu0-saw", backend, Some(Box::new(q2s)));
        dev.initialize(&three_mode_config()).expect("initialize");
        assert_eq!(
            dev.set_low_power_mode(LowPowerMode::Retention, false),
            Err(Error::Backend {
                source: BackendError::VoltageTimeout
            })
        );
    }

    #[test]
    fn voltage_commit_updates_cached_level_first() {
        let mut backend = MockSequencerBackend::new();
        expect_three_mode_init(&mut backend);
        let mut seq = Sequence::new();
        backend
            .expect_set_voltage()
            .with(eq(0xa6))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        backend
            .expect_set_voltage()
            .with(eq(0xb2))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(BackendError::VoltageTimeout));

        let mut dev = initialized_device(backend);
        dev.set_voltage(0xa6).expect("set voltage");
        assert_eq!(dev.voltage_level(), 0xa6);

        // Even a failed commit publishes the intended level; the caller sees
        // the error and decides what to do.
        assert!(dev.set_voltage(0xb2).is_err());
        assert_eq!(dev.voltage_level(), 0xb2);
    }

    #[test]
    fn reinit_forwards_to_backend() {
        let mut backend = MockSequencerBackend::new();
        expect_three_mode_init(&mut backend);
        backend.expect_reinit().times(1).return_const(());
        let mut dev = initialized_device(backend);
        dev.reinit_backend();
    }
}

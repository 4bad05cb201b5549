//! The process-wide collection of sequencer devices.
//!
//! One device slot exists per possible core, fixed at construction so device
//! identity stays stable for the voltage hand-off path. A single optional
//! cluster slot holds the shared L2/cluster device when the platform has
//! one. Lookup by name goes through an owned index of handles rather than
//! references, so a detached device can never dangle.

use alloc::{boxed::Box, string::String, vec::Vec};
use core::sync::atomic::{AtomicBool, Ordering};

use hashbrown::HashMap;
use log::{debug, warn};
use snafu::{ensure, OptionExt, ResultExt};
use spin::{Mutex, Once};

use crate::platform::cpu;

use super::{
    backend::{PmicPort, SequencerBackend},
    device::{DeviceConfig, LowPowerMode, SequencerDevice},
    BackendSnafu, InvalidArgumentSnafu, NoSuchDeviceSnafu, NotReadySnafu, Result,
};

/// A stable reference to a device in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceHandle {
    /// The per-core device for the given core.
    Core(cpu::Id),
    /// The shared cluster device.
    Cluster,
}

/// Registry of all sequencer devices in the system.
pub struct Registry<B> {
    cores: Box<[Mutex<SequencerDevice<B>>]>,
    cluster: Once<Mutex<SequencerDevice<B>>>,
    cluster_is_voltage_master: AtomicBool,
    names: Mutex<HashMap<String, DeviceHandle>>,
}

impl<B: SequencerBackend> Registry<B> {
    /// Create the registry from one uninitialized device per possible core.
    ///
    /// Duplicate device names are a caller error; the name index keeps the
    /// most recent registration, which makes lookups for that name
    /// ambiguous.
    ///
    /// # Panics
    /// If more cores are given than [`cpu::OnlineSet`] can track.
    #[must_use]
    pub fn new(core_devices: Vec<SequencerDevice<B>>) -> Self {
        assert!(
            core_devices.len() <= usize::BITS as usize,
            "too many sequencer devices"
        );
        let mut names = HashMap::new();
        for (core, device) in core_devices.iter().enumerate() {
            if names
                .insert(String::from(device.name()), DeviceHandle::Core(core))
                .is_some()
            {
                warn!("duplicate sequencer device name {:?}", device.name());
            }
        }
        Self {
            cores: core_devices
                .into_iter()
                .map(Mutex::new)
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            cluster: Once::new(),
            cluster_is_voltage_master: AtomicBool::new(false),
            names: Mutex::new(names),
        }
    }

    /// Number of possible cores.
    #[must_use]
    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    /// Install the shared cluster device, discovered from platform
    /// configuration after construction.
    ///
    /// `is_voltage_master` designates the cluster device as the single
    /// target of all voltage-change operations.
    ///
    /// # Errors
    /// [`super::Error::InvalidArgument`] if a cluster device was already
    /// registered.
    pub fn register_cluster(
        &self,
        device: SequencerDevice<B>,
        is_voltage_master: bool,
    ) -> Result<()> {
        // The name lock also serializes registration, so the one-shot check
        // below cannot race another registration.
        let mut names = self.names.lock();
        ensure!(!self.cluster.is_completed(), InvalidArgumentSnafu);
        let name = String::from(device.name());
        self.cluster.call_once(|| Mutex::new(device));
        self.cluster_is_voltage_master
            .store(is_voltage_master, Ordering::Release);
        if names.insert(name, DeviceHandle::Cluster).is_some() {
            warn!("cluster sequencer name shadows an existing device");
        }
        Ok(())
    }

    /// Whether the cluster device is the designated voltage-coordination
    /// master.
    #[must_use]
    pub fn cluster_is_voltage_master(&self) -> bool {
        self.cluster_is_voltage_master.load(Ordering::Acquire)
    }

    /// Find a device by its configured name.
    ///
    /// # Errors
    /// [`super::Error::NoSuchDevice`] when no device has that name.
    pub fn lookup(&self, name: &str) -> Result<DeviceHandle> {
        self.names
            .lock()
            .get(name)
            .copied()
            .context(NoSuchDeviceSnafu)
    }

    /// Best-effort teardown on driver detach: drop the name-index entry.
    ///
    /// The device slot itself stays allocated; only lookups stop resolving.
    pub fn remove_name(&self, name: &str) -> bool {
        self.names.lock().remove(name).is_some()
    }

    /// True only once every per-core device is initialized and, when the
    /// cluster is the voltage master, the cluster device as well.
    ///
    /// A `false` result is a deferred-retry signal for dependents, not a
    /// fault. Devices are never de-initialized, so this can never flip back
    /// from `true` to `false`.
    #[must_use]
    pub fn probe_complete(&self) -> bool {
        if self.cluster_is_voltage_master()
            && !self
                .cluster
                .get()
                .is_some_and(|d| d.lock().is_initialized())
        {
            return false;
        }
        self.cores.iter().all(|d| d.lock().is_initialized())
    }

    /// Run the device initializer for one device.
    ///
    /// A failure aborts only this device's setup; other devices are
    /// unaffected and the failure is logged and returned.
    ///
    /// # Errors
    /// [`super::Error::NoSuchDevice`] for an unknown handle, otherwise
    /// whatever the initializer reports.
    pub fn initialize(&self, handle: DeviceHandle, config: &DeviceConfig) -> Result<()> {
        let mut device = self.device(handle)?.lock();
        device.initialize(config).inspect_err(|err| {
            warn!(
                "sequencer {:?} ({handle:?}) failed to initialize: {err}",
                device.name()
            );
        })
    }

    /// Arm the calling core's own device for `mode`.
    ///
    /// # Errors
    /// [`super::Error::NoSuchDevice`] if the calling core has no device
    /// slot; otherwise as [`SequencerDevice::set_low_power_mode`].
    pub fn set_low_power_mode<C: cpu::CpuIdReader>(
        &self,
        mode: LowPowerMode,
        notify_rpm: bool,
    ) -> Result<()> {
        self.configure_low_power_mode(DeviceHandle::Core(C::current_cpu()), mode, notify_rpm)
    }

    /// Arm an explicit device (e.g. the cluster device) for `mode`.
    ///
    /// # Errors
    /// As [`SequencerDevice::set_low_power_mode`].
    pub fn configure_low_power_mode(
        &self,
        handle: DeviceHandle,
        mode: LowPowerMode,
        notify_rpm: bool,
    ) -> Result<()> {
        self.device(handle)?.lock().set_low_power_mode(mode, notify_rpm)
    }

    /// Re-apply backend register-init values to every per-core device,
    /// after a full-system register-state loss.
    pub fn reinitialize_all(&self) {
        debug!("reinitializing {} sequencer device(s)", self.cores.len());
        for device in &self.cores {
            device.lock().reinit_backend();
        }
    }

    /// Set the number of active regulator phases on the cluster supply.
    ///
    /// # Errors
    /// [`super::Error::NotReady`] when there is no initialized cluster
    /// device.
    pub fn set_cluster_phase_count(&self, phase_count: u32) -> Result<()> {
        self.cluster_pmic_write(PmicPort::Phase, phase_count)
    }

    /// Configure the cluster supply regulator's low-power frequency mode,
    /// used while the cores sit in low-power modes.
    ///
    /// # Errors
    /// [`super::Error::NotReady`] when there is no initialized cluster
    /// device.
    pub fn set_cluster_frequency_mode(&self, mode: u32) -> Result<()> {
        self.cluster_pmic_write(PmicPort::Frequency, mode)
    }

    fn cluster_pmic_write(&self, port: PmicPort, value: u32) -> Result<()> {
        let mut device = self.cluster.get().context(NotReadySnafu)?.lock();
        ensure!(device.is_initialized(), NotReadySnafu);
        device
            .backend_mut()
            .set_pmic_data(port, value)
            .context(BackendSnafu)
    }

    pub(super) fn device(&self, handle: DeviceHandle) -> Result<&Mutex<SequencerDevice<B>>> {
        match handle {
            DeviceHandle::Core(core) => self.cores.get(core),
            DeviceHandle::Cluster => self.cluster.get(),
        }
        .context(NoSuchDeviceSnafu)
    }
}

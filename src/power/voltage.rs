//! Cross-core voltage coordination.
//!
//! A core's power-state machine may itself be changing that core's voltage
//! during an autonomous power-collapse sequence, so a voltage register must
//! only ever be written from the execution context that owns it. When the
//! caller is a different, currently-running core (and no cluster master
//! takes the write instead), the request is handed off over a per-core
//! queue and the caller blocks until the owning core has performed the
//! write.

use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, Ordering};

use crossbeam::queue::SegQueue;
use log::trace;
use snafu::OptionExt;
use spin::Mutex;

use crate::platform::cpu::{self, CpuIdReader, OnlineSet};

use super::{
    backend::SequencerBackend,
    registry::{DeviceHandle, Registry},
    Error, NoSuchDeviceSnafu, Result,
};

/// One in-flight voltage change, shared between the requesting and the
/// owning core. Exists only for the duration of the hand-off.
struct VoltageRequest {
    level: u32,
    done: AtomicBool,
    // Defaults to `NoSuchDevice` so an undelivered hand-off reports the
    // delivery failure rather than a stale success.
    result: Mutex<Result<()>>,
}

impl VoltageRequest {
    fn new(level: u32) -> Self {
        Self {
            level,
            done: AtomicBool::new(false),
            result: Mutex::new(Err(Error::NoSuchDevice)),
        }
    }

    fn complete(&self, result: Result<()>) {
        *self.result.lock() = result;
        self.done.store(true, Ordering::Release);
    }
}

/// Coordinates voltage-level changes across cores.
pub struct VoltageCoordinator<B> {
    registry: Arc<Registry<B>>,
    queues: Box<[SegQueue<Arc<VoltageRequest>>]>,
    online: OnlineSet,
}

impl<B: SequencerBackend> VoltageCoordinator<B> {
    /// Create a coordinator with one hand-off queue per possible core.
    /// All cores start offline.
    #[must_use]
    pub fn new(registry: Arc<Registry<B>>) -> Self {
        let queues = (0..registry.num_cores())
            .map(|_| SegQueue::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            registry,
            queues,
            online: OnlineSet::new(),
        }
    }

    /// The registry this coordinator operates on.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry<B>> {
        &self.registry
    }

    /// Record that a core has come online; foreign-context writes to it now
    /// require a hand-off.
    pub fn mark_core_online(&self, core: cpu::Id) {
        self.online.mark_online(core);
    }

    /// Record that a core has gone offline; its voltage may now be set
    /// directly from any context.
    ///
    /// Requests handed off while the core was still online are serviced
    /// here, in the caller's context, so no requester is left waiting on a
    /// core that will never run [`Self::process_requests`] again.
    pub fn mark_core_offline(&self, core: cpu::Id) {
        self.online.mark_offline(core);
        self.process_requests(core);
    }

    /// Whether a core is currently marked online.
    #[must_use]
    pub fn is_core_online(&self, core: cpu::Id) -> bool {
        self.online.is_online(core)
    }

    /// Set a core's voltage level.
    ///
    /// The write happens in the caller's context when the cluster device is
    /// the voltage master, when the caller *is* the target core, or when the
    /// target core is offline. Otherwise the request is executed on the
    /// target core via [`Self::process_requests`] and this call blocks until
    /// the remote write completes, returning its result.
    ///
    /// # Errors
    /// [`Error::NoSuchDevice`] for an out-of-range core or an undelivered
    /// hand-off; [`Error::NotReady`] before the device is initialized (no
    /// write is attempted, retry after probing completes); backend failures
    /// otherwise.
    pub fn set_voltage<C: CpuIdReader>(&self, core: cpu::Id, level: u32) -> Result<()> {
        let caller = C::current_cpu();
        if self.registry.cluster_is_voltage_master()
            || caller == core
            || !self.online.is_online(core)
        {
            return self.apply(core, level);
        }

        trace!("handing off voltage change for core {core} from core {caller}");
        let request = Arc::new(VoltageRequest::new(level));
        self.queues
            .get(core)
            .context(NoSuchDeviceSnafu)?
            .push(Arc::clone(&request));

        while !request.done.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
        let result = request.result.lock().clone();
        result
    }

    /// Service pending hand-off requests for `core`, in that core's own
    /// execution context. Returns the number of requests serviced.
    ///
    /// The embedding kernel calls this from the target core's scheduling or
    /// interrupt path.
    pub fn process_requests(&self, core: cpu::Id) -> usize {
        let Some(queue) = self.queues.get(core) else {
            return 0;
        };
        let mut serviced = 0;
        while let Some(request) = queue.pop() {
            request.complete(self.apply(core, request.level));
            serviced += 1;
        }
        serviced
    }

    /// The last committed voltage level for a core.
    ///
    /// Reads carry no synchronization beyond the commit ordering of
    /// [`Self::set_voltage`]; a stale-but-monotonic value is acceptable.
    ///
    /// # Errors
    /// [`Error::NoSuchDevice`] for an out-of-range core.
    pub fn voltage(&self, core: cpu::Id) -> Result<u32> {
        Ok(self.registry.device(self.target(core))?.lock().voltage_level())
    }

    fn apply(&self, core: cpu::Id, level: u32) -> Result<()> {
        self.registry
            .device(self.target(core))?
            .lock()
            .set_voltage(level)
    }

    /// With a cluster voltage master, every voltage operation targets the
    /// cluster device regardless of the requested core.
    fn target(&self, core: cpu::Id) -> DeviceHandle {
        if self.registry.cluster_is_voltage_master() {
            DeviceHandle::Cluster
        } else {
            DeviceHandle::Core(core)
        }
    }
}

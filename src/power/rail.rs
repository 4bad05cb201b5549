//! One-shot supply-rail bring-up for secondary cores.
//!
//! Independent of the sequencer state machine: before a non-boot core is
//! first brought online, its supply regulator is configured and enabled
//! directly through the core's supply-control register window. The settle
//! delays are bounded busy-waits; the next register write must not be
//! issued until the previous delay has fully elapsed.

use log::debug;
use snafu::ensure;

#[cfg(test)]
use mockall::automock;

use crate::platform::cpu;

use super::{InvalidArgumentSnafu, Result};

/// Spacing between per-core supply-control register windows.
pub const WINDOW_STRIDE: usize = 0x1_0000;

/// Offset of the supply control register within a core's window.
pub const CONTROL_OFFSET: usize = 0x1c;

/// Command selecting the regulator voltage target (1.15 V on an FTS2-type
/// supply already configured in its low-voltage range).
const VOLTAGE_TARGET_COMMAND: u32 = 0x0400_00E6;

/// Command enabling the core supply regulator.
const SUPPLY_ENABLE_COMMAND: u32 = 0x0203_0080;

/// Settle delay between supply-control writes, in microseconds.
const SETTLE_DELAY_US: u32 = 512;

/// Access mechanism for a core's supply-control register window.
///
/// Implementations map the window at `base + core * WINDOW_STRIDE`, issue
/// volatile writes to [`CONTROL_OFFSET`] followed by a full barrier, and
/// busy-wait for the requested delays.
#[cfg_attr(test, automock)]
pub trait RailAccess {
    /// Map the supply window for `core`.
    ///
    /// # Errors
    /// Reports the platform's mapping failure; the helper does not retry.
    fn map_window(&mut self, base: usize, core: cpu::Id) -> Result<()>;

    /// Write a command to the mapped supply control register, with a full
    /// barrier after the store.
    fn write_control(&mut self, value: u32);

    /// Busy-wait for `us` microseconds.
    fn delay_us(&self, us: u32);

    /// Unmap the window mapped by [`Self::map_window`].
    fn unmap_window(&mut self);
}

/// Power on a secondary core's supply rail.
///
/// Performed exactly once per core, before the core is first brought
/// online. Writes the voltage-target command, waits for the supply to
/// settle, then enables the regulator and waits again.
///
/// # Errors
/// [`super::Error::InvalidArgument`] for core 0 (the boot core's rail is
/// already up) or a core outside `0..num_cores`, with no register access;
/// mapping failures are reported immediately.
pub fn power_on_rail(
    access: &mut impl RailAccess,
    base: usize,
    core: cpu::Id,
    num_cores: usize,
) -> Result<()> {
    ensure!(core != 0 && core < num_cores, InvalidArgumentSnafu);

    access.map_window(base, core)?;

    debug!("powering on supply rail for core {core}");
    access.write_control(VOLTAGE_TARGET_COMMAND);
    access.delay_us(SETTLE_DELAY_US);
    access.write_control(SUPPLY_ENABLE_COMMAND);
    access.delay_us(SETTLE_DELAY_US);

    access.unmap_window();
    Ok(())
}

//! Platform definitions shared by the power-management logic.

pub mod cpu;

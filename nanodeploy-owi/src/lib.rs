#![no_std]
#![deny(missing_docs)]
//! # nanodeploy-owi
//! OWI host-interface layer for the nanodeploy flight computer.
//!
//! Builds the device's command set on top of the [`owi-slave`](owi_slave)
//! protocol engine: [`CommandLayer`] interprets decoded command bytes against
//! the fixed command table, drives the external collaborators (configuration
//! store, log storage, barometer) through the traits in [`traits`], and
//! resolves transfer completions through [`Continuation`] tags. [`WakeFlags`]
//! is the shared event channel between the interrupt glue and the foreground
//! loop, and [`Parameters`] decodes the 64-byte non-volatile configuration
//! segment.
//!
//! Everything here runs in foreground context; the only code that may touch
//! the engine from interrupt context is the application's ISR glue.

#[cfg(test)]
extern crate std;

mod commands;
mod params;
pub mod traits;
mod wake;

pub use commands::{
    CommandLayer, Continuation, MEAS_ALTITUDE_OFFSET, MEAS_PRESSURE_OFFSET,
    MEAS_TEMPERATURE_OFFSET, STANDARD_PRESSURE_PA,
};
pub use params::Parameters;
pub use wake::{WAKE_OWI_CMD, WAKE_OWI_XFER, WAKE_TICK, WakeFlags};

/// Command to stream the 64-byte scratch buffer to the host
pub const DEV_READ_DATA_CMD: u8 = 0xb0;

/// Command to fill the 64-byte scratch buffer from the host
pub const DEV_WRITE_DATA_CMD: u8 = 0xbf;

/// Command to copy the non-volatile configuration into the scratch buffer
pub const DEV_LOAD_CFG_CMD: u8 = 0x70;

/// Command to persist the scratch buffer as the new configuration
pub const DEV_SAVE_CFG_CMD: u8 = 0x80;

/// Command to sample the barometer into the scratch measurement record
pub const DEV_MEASURE_CMD: u8 = 0x7a;

/// Command to stream 64 bytes of log storage; the 2-byte address follows
pub const DEV_LOAD_DATA_CMD: u8 = 0x7f;

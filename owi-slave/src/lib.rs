#![no_std]
#![deny(missing_docs)]
//! # owi-slave
//! A no-std, slave-side protocol engine for single-wire (OWI) buses.
//!
//! The master defines all timing on an OWI bus; a slave decodes raw edge
//! transitions and timer expirations into bytes, commands and multi-byte
//! transfers under microsecond deadlines. [`OwiSlave`] is that engine: an
//! interrupt-driven state machine generic over an open-drain [`OwiLine`] and
//! a two-channel [`BitTimer`], with foreground transfer primitives
//! ([`select`](OwiSlave::select), [`search`](OwiSlave::search),
//! [`send`](OwiSlave::send), [`receive`](OwiSlave::receive)) that arm it and
//! return immediately.
//!
//! Interrupt entry points never block and never loop; they communicate with
//! the foreground exclusively through the [`OwiEvent`] values they return,
//! which the application maps onto its own wake flags. Transfer buffers cross
//! the interrupt boundary as non-owning [`XferBuf`] views.

#[cfg(test)]
extern crate std;

mod crc;
mod engine;
mod traits;
mod xfer;
pub use crc::OwiCrc;
pub use engine::{OwiEvent, OwiSlave, OwiState, Timings};
pub use traits::{BitTimer, OwiLine};
pub use xfer::XferBuf;

/// Command to run a search round for device discovery on the OWI bus
pub const OWI_SEARCH_CMD: u8 = 0xf0;

/// Command to skip identity matching and select this device unconditionally
pub const OWI_SKIP_CMD: u8 = 0xcc;

/// Command to read the 8-byte device identity
pub const OWI_READ_ID_CMD: u8 = 0x33;

/// Command to select the device whose identity follows in the next 8 bytes
pub const OWI_MATCH_ID_CMD: u8 = 0x55;

//! A cooperative-multitasking CPU/OS simulator.
//!
//! A single flat, word-addressable memory hosts both a tiny fixed
//! instruction set and a kernel program that schedules cooperative
//! "threads" over it. A protection unit enforces a two-level privilege
//! model: kernel code may touch any cell, user code may not touch the
//! kernel's reserved region.
//!
//! The crate is organized around the pieces of that machine:
//! [`cell`] and [`memory`] model storage, [`registers`] and [`mode`] model
//! the machine's visible state, [`opcode`] is the closed instruction set,
//! [`protection`] is the access-control rule, [`engine`] ties all of it
//! into a fetch/decode/execute loop, and [`loader`] turns a textual program
//! into the image the engine runs.

#![warn(missing_docs)]
#![warn(unused_must_use)]
#![warn(rust_2018_idioms)]

pub mod cell;
pub mod debug;
pub mod engine;
pub mod error;
pub mod loader;
pub mod memory;
pub mod mode;
pub mod opcode;
pub mod protection;
pub mod registers;

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
//! BNEP/PAN client core: the part of TinyPAN with the real engineering (see
//! the crate-level design notes in `DESIGN.md` at the workspace root).
//!
//! This crate only speaks to the outside world through the `tinypan-hal`
//! contracts (`Hal`, `Netif`); it never touches a concrete radio stack or
//! IP stack. `#[cfg(test)]` pulls in `std` so the unit and end-to-end
//! tests can use `Vec` for scratch buffers; the crate itself performs zero
//! heap allocation in non-test builds, matching the teacher's `net` crate.

#[cfg(test)]
extern crate std;

pub mod tick;
pub mod codec;
pub mod slip;
pub mod channel;
pub mod txqueue;
pub mod supervisor;
pub mod bridge;
pub mod facade;

pub use tinypan_hal as hal;

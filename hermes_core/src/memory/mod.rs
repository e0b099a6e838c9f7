//! Named shared-memory primitives for HERMES
//!
//! This module provides the raw cross-process memory building blocks:
//!
//! - [`ShmRegion`]: a named, fixed-size shared memory mapping that any
//!   process on the host can open by name
//! - [`UpdateSignal`]: a named change-notification cell built on a shared
//!   generation counter
//!
//! Both are deliberately policy-free: all locking and layout decisions live
//! in the `communication` layer on top.

pub(crate) mod shm_region;
pub(crate) mod update_signal;

pub use shm_region::ShmRegion;
pub use update_signal::UpdateSignal;

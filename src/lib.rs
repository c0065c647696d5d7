// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Samba share management for VMs on the hub bridge.
//!
//! VMs on the bridge get their addresses over DHCP, so the only durable
//! identity is the MAC address the hypervisor reports. This library:
//! - sweeps the bridge subnet to populate the neighbour table and joins it
//!   with the hypervisor's MAC map
//! - reads, edits and writes the per-VM share files
//! - removes share files whose VM is gone or has a different name now
//!
//! # Modules
//!
//! - [`resolver`] - Host discovery (probe sweep, neighbour table, MAC join)
//! - [`hypervisor`] - MAC to domain name map from libvirt
//! - [`share`] / [`conf`] - Share definitions and the share file format
//! - [`hub`] - One VM's share file: lookup, load, edit, save, delete
//! - [`clean`] - Removal of stale share files

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_errors_doc)]

pub mod clean;
pub mod conf;
pub mod erase;
pub mod error;
pub mod exec;
pub mod hub;
pub mod hypervisor;
pub mod reload;
pub mod resolver;
pub mod settings;
pub mod share;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

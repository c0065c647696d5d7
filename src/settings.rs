// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hub::Scope;

/// Default settings file location.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/hubshare/config.json";

/// Absolute paths of the external utilities.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ToolPaths {
    pub ping: PathBuf,
    pub arp: PathBuf,
    pub virsh: PathBuf,
    pub systemctl: PathBuf,
    pub sudo: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ping: PathBuf::from("/usr/bin/ping"),
            arp: PathBuf::from("/usr/sbin/arp"),
            virsh: PathBuf::from("/usr/bin/virsh"),
            systemctl: PathBuf::from("/usr/bin/systemctl"),
            sudo: PathBuf::from("/usr/bin/sudo"),
        }
    }
}

/// Runtime settings for discovery, storage and service control.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Bridge the VMs are attached to; the neighbour table is filtered to it.
    pub bridge: String,

    /// Network address of the managed /24 subnet.
    pub subnet: Ipv4Addr,

    /// First host number of the dynamic range (inclusive).
    pub first_host: u8,

    /// Last host number of the dynamic range (inclusive).
    pub last_host: u8,

    /// Per-probe timeout in milliseconds.
    pub probe_timeout_ms: u64,

    /// Upper bound on probes in flight at once.
    pub max_concurrent_probes: usize,

    /// Directory holding the `perm.conf.d` and `temp.conf.d` scopes.
    pub samba_dir: PathBuf,

    /// Systemd unit serving the shares.
    pub service: String,

    /// Libvirt connection URI; `None` uses the virsh default.
    pub hypervisor_uri: Option<String>,

    pub tools: ToolPaths,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bridge: "br-hub".to_string(),
            subnet: Ipv4Addr::new(172, 16, 10, 0),
            first_host: 50,
            last_host: 253,
            probe_timeout_ms: 350,
            max_concurrent_probes: 256,
            samba_dir: PathBuf::from("/etc/samba"),
            service: "smbd".to_string(),
            hypervisor_uri: None,
            tools: ToolPaths::default(),
        }
    }
}

impl Settings {
    /// Validate settings.
    /// Returns `Ok(())` if valid, or `Err(Vec<String>)` with error messages.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors: Vec<String> = Vec::new();

        if self.bridge.is_empty() {
            errors.push("Bridge name is empty".to_string());
        }
        if self.subnet.octets()[3] != 0 {
            errors.push(format!("Subnet {} is not a /24 network address", self.subnet));
        }
        if self.first_host == 0 || self.first_host > self.last_host || self.last_host == 255 {
            errors.push(format!(
                "Host range {}..={} is not a valid dynamic range",
                self.first_host, self.last_host
            ));
        }
        if self.probe_timeout_ms == 0 {
            errors.push("Probe timeout must be positive".to_string());
        }
        if self.max_concurrent_probes == 0 {
            errors.push("At least one concurrent probe is required".to_string());
        }
        if self.service.is_empty() {
            errors.push("Service name is empty".to_string());
        }

        let tools = [
            ("ping", &self.tools.ping),
            ("arp", &self.tools.arp),
            ("virsh", &self.tools.virsh),
            ("systemctl", &self.tools.systemctl),
            ("sudo", &self.tools.sudo),
        ];
        for (name, path) in tools {
            if !path.is_absolute() {
                errors.push(format!("Tool '{name}' path {} is not absolute", path.display()));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Load and validate settings from file.
    ///
    /// A missing file at the default location yields the built-in defaults;
    /// an explicitly given path must exist.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound && path == Path::new(DEFAULT_SETTINGS_PATH) => {
                debug!("No settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::Settings(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let settings: Self = serde_json::from_slice(&data)
            .map_err(|e| Error::Settings(format!("Failed to parse {}: {e}", path.display())))?;

        settings
            .validate()
            .map_err(|errors| Error::Settings(errors.join("; ")))?;

        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Candidate addresses of the dynamic range, in ascending order.
    pub fn candidate_addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        let [a, b, c, _] = self.subnet.octets();
        (self.first_host..=self.last_host).map(move |host| Ipv4Addr::new(a, b, c, host))
    }

    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Directory of one storage scope.
    pub fn scope_dir(&self, scope: Scope) -> PathBuf {
        self.samba_dir.join(format!("{scope}.conf.d"))
    }
}

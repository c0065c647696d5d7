// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! MAC address to domain name map from libvirt.
//!
//! The connection is read-only (`virsh -r`). Each domain's XML description is
//! searched for `<interface>` elements and the `address` attribute of their
//! `<mac>` child; nothing else in the description is interpreted.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use log::{debug, warn};
use regex::Regex;

use crate::error::{Error, Result};
use crate::exec::{CommandRunner, Invocation, checked_output};
use crate::settings::Settings;

/// Lowercase MAC address -> domain name.
pub type HardwareMap = HashMap<String, String>;

static INTERFACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<interface(?:\s[^>]*[^/>])?\s*>(.*?)</interface>").unwrap());

static MAC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<mac\b[^>]*\baddress\s*=\s*['"]([^'"]+)['"]"#).unwrap()
});

/// Read-only view of the hypervisor's domains.
pub struct Hypervisor<R> {
    runner: Arc<R>,
    virsh: std::path::PathBuf,
    uri: Option<String>,
}

impl<R: CommandRunner> Hypervisor<R> {
    pub fn new(runner: Arc<R>, settings: &Settings) -> Self {
        Self {
            runner,
            virsh: settings.tools.virsh.clone(),
            uri: settings.hypervisor_uri.clone(),
        }
    }

    fn virsh(&self) -> Invocation {
        let mut invocation = Invocation::new(&self.virsh).arg("-r");
        if let Some(uri) = &self.uri {
            invocation = invocation.arg("-c").arg(uri);
        }
        invocation
    }

    /// Names of all running and defined domains.
    pub async fn domains(&self) -> Result<Vec<String>> {
        let listing = checked_output(
            self.runner.as_ref(),
            self.virsh().arg("list").arg("--all").arg("--name"),
        )
        .await
        .map_err(|e| Error::Hypervisor(format!("Failed to open connection to the hypervisor: {e}")))?;

        Ok(listing
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Map every interface MAC of every domain to the domain's name.
    ///
    /// A domain whose description cannot be read is skipped with a warning;
    /// failing to list domains at all is an error.
    pub async fn hardware_map(&self) -> Result<HardwareMap> {
        let mut map = HardwareMap::new();

        for domain in self.domains().await? {
            let xml = match checked_output(
                self.runner.as_ref(),
                self.virsh().arg("dumpxml").arg(&domain),
            )
            .await
            {
                Ok(xml) => xml,
                Err(e) => {
                    warn!("Skipping domain '{domain}': {e}");
                    continue;
                }
            };

            for mac in interface_macs(&xml) {
                debug!("{mac} belongs to {domain}");
                map.insert(mac, domain.clone());
            }
        }

        Ok(map)
    }
}

/// Extract the lowercase MAC address of every interface in a domain description.
#[must_use]
pub fn interface_macs(xml: &str) -> Vec<String> {
    INTERFACE_RE
        .captures_iter(xml)
        .filter_map(|interface| {
            MAC_RE
                .captures(&interface[1])
                .map(|mac| mac[1].to_ascii_lowercase())
        })
        .collect()
}

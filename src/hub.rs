// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! One VM's share file.
//!
//! Share files live in one of two scope directories and are named after the
//! VM's current address (`<address>.conf`). The header records the VM name
//! and MAC, which is what lets an offline VM be found by name and lets
//! [`crate::clean`] detect files that no longer belong to anyone.

use std::fs;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::conf::{Header, ShareFile};
use crate::erase::secure_delete;
use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use crate::reload::ServiceReload;
use crate::resolver::{AddressMap, Resolver};
use crate::settings::Settings;
use crate::share::{SettingKey, SettingValue, ShareDefinition};
use crate::util::as_address;

/// Storage scope of a share file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Long-lived shares (`perm.conf.d`).
    Permanent,
    /// Shares meant to go away with the VM (`temp.conf.d`).
    Temporary,
}

impl Scope {
    /// Listing order: permanent first.
    pub const ALL: [Self; 2] = [Self::Permanent, Self::Temporary];

    #[must_use]
    pub const fn from_permanent(permanent: bool) -> Self {
        if permanent {
            Self::Permanent
        } else {
            Self::Temporary
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Permanent => write!(f, "perm"),
            Self::Temporary => write!(f, "temp"),
        }
    }
}

/// What [`HubConfiguration::save`] did on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    Written,
    /// No shares were left, the file was erased.
    Erased,
    /// No shares and no file; nothing to do.
    Absent,
}

/// Share file name for an address.
#[must_use]
pub fn file_name(address: Ipv4Addr) -> String {
    format!("{address}.conf")
}

/// Address encoded in a share file name, if the name is one.
#[must_use]
pub fn address_from_path(path: &Path) -> Option<Ipv4Addr> {
    if path.extension()? != "conf" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// Share files of a scope directory, sorted by path. A missing directory is empty.
pub fn scope_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Scope directory {} does not exist", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && address_from_path(path).is_some())
        .collect();
    files.sort();
    Ok(files)
}

/// Address of the share file whose header names `vm`, for VMs that are offline.
fn find_offline(dir: &Path, vm: &str) -> Result<Option<Ipv4Addr>> {
    for path in scope_files(dir)? {
        match Header::read(&path) {
            Ok(header) if header.vm.as_deref() == Some(vm) => {
                debug!("Found {vm} offline in {}", path.display());
                return Ok(address_from_path(&path));
            }
            Ok(_) => {}
            Err(e) => warn!("Skipping {}: {e}", path.display()),
        }
    }
    Ok(None)
}

/// Shares of one VM in one scope, backed by `<scope dir>/<address>.conf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfiguration {
    vm_name: String,
    address: Ipv4Addr,
    hardware_address: String,
    scope: Scope,
    path: PathBuf,
    shares: Vec<ShareDefinition>,
}

impl HubConfiguration {
    /// Configuration without shares. Nothing is written until [`Self::save`].
    pub fn new(
        vm_name: impl Into<String>,
        address: Ipv4Addr,
        hardware_address: impl Into<String>,
        scope: Scope,
        dir: &Path,
    ) -> Self {
        Self {
            vm_name: vm_name.into(),
            address,
            hardware_address: hardware_address.into(),
            scope,
            path: dir.join(file_name(address)),
            shares: Vec::new(),
        }
    }

    /// Read an existing share file. Both header lines are required.
    pub fn load(path: &Path, scope: Scope) -> Result<Self> {
        let address = address_from_path(path).ok_or_else(|| Error::FileName {
            path: path.to_path_buf(),
        })?;
        let file = ShareFile::parse(&fs::read_to_string(path)?)?;

        let vm_name = file
            .header
            .vm
            .ok_or_else(|| Error::parse(1, "missing '# VM:' header"))?;
        let hardware_address = file.header.mac.ok_or_else(|| Error::Unresolvable {
            identifier: vm_name.clone(),
        })?;

        Ok(Self {
            vm_name,
            address,
            hardware_address,
            scope,
            path: path.to_path_buf(),
            shares: file.shares,
        })
    }

    /// Every share file of a scope. Unreadable files are skipped with a warning.
    pub fn load_scope(dir: &Path, scope: Scope) -> Result<Vec<Self>> {
        let mut configurations = Vec::new();
        for path in scope_files(dir)? {
            match Self::load(&path, scope) {
                Ok(configuration) => configurations.push(configuration),
                Err(e) => warn!("Skipping {}: {e}", path.display()),
            }
        }
        Ok(configurations)
    }

    /// Locate the configuration of a VM given by name or address.
    ///
    /// A name is looked up among live hosts first, then among the headers of
    /// existing files (VM offline). An existing file is loaded; otherwise the
    /// VM must be live and known to the hypervisor.
    pub fn locate(identifier: &str, scope: Scope, dir: &Path, hosts: &AddressMap) -> Result<Self> {
        let address = match as_address(identifier) {
            Some(address) => address,
            None => match hosts.find(identifier) {
                Some(record) => record.address,
                None => find_offline(dir, identifier)?.ok_or_else(|| Error::InvalidVm {
                    identifier: identifier.to_string(),
                })?,
            },
        };

        let path = dir.join(file_name(address));
        if path.is_file() {
            return Self::load(&path, scope);
        }

        let record = hosts
            .get(address)
            .filter(|record| record.is_known())
            .ok_or_else(|| Error::Unresolvable {
                identifier: identifier.to_string(),
            })?;

        Ok(Self::new(
            record.name.clone(),
            address,
            record.hardware_address.clone(),
            scope,
            dir,
        ))
    }

    /// Run discovery and [`Self::locate`] the VM.
    pub async fn open<R: CommandRunner>(
        identifier: &str,
        scope: Scope,
        settings: &Settings,
        resolver: &Resolver<R>,
    ) -> Result<Self> {
        let hosts = resolver.discover_hosts().await?;
        Self::locate(identifier, scope, &settings.scope_dir(scope), &hosts)
    }

    #[must_use]
    pub fn vm_name(&self) -> &str {
        &self.vm_name
    }

    #[must_use]
    pub const fn address(&self) -> Ipv4Addr {
        self.address
    }

    #[must_use]
    pub fn hardware_address(&self) -> &str {
        &self.hardware_address
    }

    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn shares(&self) -> &[ShareDefinition] {
        &self.shares
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.shares.iter().any(|share| share.name == name)
    }

    /// Add a share with default settings overlaid by `settings`.
    ///
    /// The returned share can be adjusted further before saving.
    pub fn add_share<I, V>(&mut self, name: &str, settings: I) -> Result<&mut ShareDefinition>
    where
        I: IntoIterator<Item = (SettingKey, V)>,
        V: Into<SettingValue>,
    {
        if self.contains(name) {
            return Err(Error::DuplicateShare {
                name: name.to_string(),
            });
        }

        let mut share = ShareDefinition::new(name);
        for (key, value) in settings {
            share.set(key, value);
        }
        self.shares.push(share);

        let added = self.shares.len() - 1;
        Ok(&mut self.shares[added])
    }

    /// Remove a share by name. Returns whether one was removed.
    pub fn remove_share(&mut self, name: &str) -> bool {
        match self.shares.iter().position(|share| share.name == name) {
            Some(index) => {
                self.shares.remove(index);
                true
            }
            None => false,
        }
    }

    /// File content for this configuration.
    #[must_use]
    pub fn to_share_file(&self) -> ShareFile {
        ShareFile {
            header: Header {
                vm: Some(self.vm_name.clone()),
                mac: Some(self.hardware_address.clone()),
            },
            shares: self.shares.clone(),
        }
    }

    /// Write the file and reload the service. A configuration without
    /// shares is erased instead of written.
    pub async fn save<R: CommandRunner>(&self, reload: &ServiceReload<R>) -> Result<Persisted> {
        if self.shares.is_empty() {
            return Ok(if self.delete(reload).await? {
                Persisted::Erased
            } else {
                Persisted::Absent
            });
        }

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, self.to_share_file().to_string())?;
        info!(
            "Saved {} shares for {} to {}",
            self.shares.len(),
            self.vm_name,
            self.path.display()
        );

        reload.poke(true).await;
        Ok(Persisted::Written)
    }

    /// Erase the backing file. Returns `false` if there was none.
    pub async fn delete<R: CommandRunner>(&self, reload: &ServiceReload<R>) -> Result<bool> {
        let erased = secure_delete(&self.path)?;
        if erased {
            info!("Erased share file {}", self.path.display());
            reload.poke(false).await;
        }
        Ok(erased)
    }
}

// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Removal of share files that no longer belong to a VM.
//!
//! A file is stale when the MAC in its header is gone from the hypervisor, or
//! now belongs to a domain with a different name. Stale files are erased so
//! that a recycled address or MAC does not inherit someone else's shares.

use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::conf::Header;
use crate::erase::secure_delete;
use crate::error::Result;
use crate::exec::CommandRunner;
use crate::hub::{Scope, scope_files};
use crate::hypervisor::{HardwareMap, Hypervisor};
use crate::reload::ServiceReload;
use crate::settings::Settings;

/// Why a share file was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    MacGone,
    NameMismatch { current: String },
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MacGone => write!(f, "MAC is no longer present"),
            Self::NameMismatch { current } => {
                write!(f, "VM name does not match (MAC now belongs to {current})")
            }
        }
    }
}

/// A removed share file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub scope: Scope,
    pub path: PathBuf,
    pub reason: StaleReason,
}

impl std::fmt::Display for Removal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self
            .path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |n| n.to_string_lossy().into_owned());
        write!(f, "Removing {name} from {} because {}", self.scope, self.reason)
    }
}

/// Decide whether a file with this header is stale.
///
/// Returns `None` for valid files, and for files without a complete header,
/// which are not ours to judge.
#[must_use]
pub fn stale_reason(header: &Header, hardware: &HardwareMap) -> Option<StaleReason> {
    let (Some(vm), Some(mac)) = (&header.vm, &header.mac) else {
        return None;
    };

    match hardware.get(&mac.to_ascii_lowercase()) {
        None => Some(StaleReason::MacGone),
        Some(current) if current != vm => Some(StaleReason::NameMismatch {
            current: current.clone(),
        }),
        Some(_) => None,
    }
}

/// Outcome of a cleanup sweep.
#[derive(Debug, Default)]
pub struct Sweep {
    /// Stale files that were erased.
    pub removed: Vec<Removal>,
    /// Stale files that could not be erased.
    pub failed: Vec<(Removal, io::Error)>,
}

/// Check every share file of both scopes against `hardware` and erase stale ones.
pub fn sweep(settings: &Settings, hardware: &HardwareMap) -> Result<Sweep> {
    sweep_with(settings, hardware, secure_delete)
}

/// Like [`sweep`] with a custom erase step. A failed erase does not stop
/// the scan.
fn sweep_with<E>(settings: &Settings, hardware: &HardwareMap, mut erase: E) -> Result<Sweep>
where
    E: FnMut(&Path) -> io::Result<bool>,
{
    let mut outcome = Sweep::default();

    for scope in Scope::ALL {
        for path in scope_files(&settings.scope_dir(scope))? {
            let header = match Header::read(&path) {
                Ok(header) => header,
                Err(e) => {
                    warn!("Skipping {}: {e}", path.display());
                    continue;
                }
            };
            if header.mac.is_none() || header.vm.is_none() {
                warn!("Skipping {}: incomplete header", path.display());
                continue;
            }

            if let Some(reason) = stale_reason(&header, hardware) {
                let removal = Removal {
                    scope,
                    path,
                    reason,
                };
                match erase(&removal.path) {
                    Ok(_) => {
                        debug!("{removal}");
                        outcome.removed.push(removal);
                    }
                    Err(e) => {
                        warn!("Failed to erase {}: {e}", removal.path.display());
                        outcome.failed.push((removal, e));
                    }
                }
            }
        }
    }

    Ok(outcome)
}

/// Erase stale share files and reload the service if anything was removed.
///
/// Files that could not be erased are reported in [`Sweep::failed`].
///
/// Unlike discovery, cleaning needs a working hypervisor connection: with an
/// empty MAC map every file would look stale.
pub async fn clean<R: CommandRunner>(
    settings: &Settings,
    hypervisor: &Hypervisor<R>,
    reload: &ServiceReload<R>,
) -> Result<Sweep> {
    clean_with(settings, hypervisor, reload, secure_delete).await
}

async fn clean_with<R, E>(
    settings: &Settings,
    hypervisor: &Hypervisor<R>,
    reload: &ServiceReload<R>,
    erase: E,
) -> Result<Sweep>
where
    R: CommandRunner,
    E: FnMut(&Path) -> io::Result<bool>,
{
    let hardware = hypervisor.hardware_map().await?;
    let outcome = sweep_with(settings, &hardware, erase)?;

    if !outcome.removed.is_empty() {
        reload.poke(false).await;
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::exec::Output;
    use crate::testing::{FakeRunner, program_name};
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    fn settings(root: &Path) -> Settings {
        let settings = Settings {
            samba_dir: root.to_path_buf(),
            ..Settings::default()
        };
        for scope in Scope::ALL {
            fs::create_dir_all(settings.scope_dir(scope)).unwrap();
        }
        settings
    }

    fn write_share_file(settings: &Settings, scope: Scope, address: &str, vm: &str, mac: &str) -> PathBuf {
        let path = settings.scope_dir(scope).join(format!("{address}.conf"));
        fs::write(
            &path,
            format!("# VM: {vm}\n# MAC: {mac}\n[data]\n  path = /srv/data\n\n"),
        )
        .unwrap();
        path
    }

    fn vm1_map() -> HardwareMap {
        HardwareMap::from([("aa:bb".to_string(), "vm1".to_string())])
    }

    #[test]
    fn stale_reasons() {
        let header = |vm: &str, mac: &str| Header {
            vm: Some(vm.to_string()),
            mac: Some(mac.to_string()),
        };

        assert_eq!(stale_reason(&header("vm1", "aa:bb"), &vm1_map()), None);
        assert_eq!(stale_reason(&header("vm1", "AA:BB"), &vm1_map()), None);
        assert_eq!(
            stale_reason(&header("vm2", "aa:bb"), &vm1_map()),
            Some(StaleReason::NameMismatch {
                current: "vm1".to_string()
            })
        );
        assert_eq!(
            stale_reason(&header("vm1", "cc:dd"), &vm1_map()),
            Some(StaleReason::MacGone)
        );
        assert_eq!(stale_reason(&Header::default(), &vm1_map()), None);
    }

    #[test]
    fn sweep_removes_only_stale_files() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        let renamed = write_share_file(&settings, Scope::Permanent, "172.16.10.51", "vm2", "aa:bb");
        let gone = write_share_file(&settings, Scope::Temporary, "172.16.10.52", "vm3", "cc:dd");
        let valid = write_share_file(&settings, Scope::Temporary, "172.16.10.53", "vm1", "aa:bb");

        let removals = sweep(&settings, &vm1_map()).unwrap().removed;

        assert_eq!(removals.len(), 2);
        assert!(!renamed.exists());
        assert!(!gone.exists());
        assert!(valid.exists());
        assert_eq!(
            removals[0].to_string(),
            "Removing 172.16.10.51.conf from perm because VM name does not match (MAC now belongs to vm1)"
        );
        assert_eq!(
            removals[1].to_string(),
            "Removing 172.16.10.52.conf from temp because MAC is no longer present"
        );
    }

    #[test]
    fn sweep_keeps_files_without_header() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        let path = settings.scope_dir(Scope::Temporary).join("172.16.10.54.conf");
        fs::write(&path, "[data]\n  path = /srv/data\n\n").unwrap();

        let result = sweep(&settings, &vm1_map()).unwrap();
        assert!(result.removed.is_empty() && result.failed.is_empty());
        assert!(path.exists());
    }

    /// Hypervisor with a single domain `vm1` owning `aa:bb`; everything else succeeds.
    fn vm1_runner() -> Arc<FakeRunner> {
        Arc::new(FakeRunner::new(|invocation| {
            let args: Vec<&str> = invocation.args.iter().map(String::as_str).collect();
            match (program_name(invocation), args.as_slice()) {
                ("virsh", [.., "list", "--all", "--name"]) => Ok(Output::with_stdout(0, "vm1\n")),
                ("virsh", _) => Ok(Output::with_stdout(
                    0,
                    "<domain><interface type='bridge'><mac address='aa:bb'/></interface></domain>",
                )),
                _ => Ok(Output::exit(0)),
            }
        }))
    }

    fn refuse(path: &Path) -> io::Result<bool> {
        if path.ends_with("172.16.10.52.conf") {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "immutable"));
        }
        secure_delete(path)
    }

    #[test]
    fn sweep_continues_after_failed_erase() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        let first = write_share_file(&settings, Scope::Temporary, "172.16.10.51", "vm2", "aa:bb");
        let stuck = write_share_file(&settings, Scope::Temporary, "172.16.10.52", "vm3", "cc:dd");
        let last = write_share_file(&settings, Scope::Temporary, "172.16.10.53", "vm4", "ee:ff");

        let result = sweep_with(&settings, &vm1_map(), refuse).unwrap();

        assert!(!first.exists());
        assert!(stuck.exists());
        assert!(!last.exists());
        let removed: Vec<&Path> = result.removed.iter().map(|r| r.path.as_path()).collect();
        assert_eq!(removed, vec![first.as_path(), last.as_path()]);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].0.path, stuck);
        assert_eq!(result.failed[0].1.kind(), io::ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn clean_reloads_despite_failed_erase() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        write_share_file(&settings, Scope::Temporary, "172.16.10.51", "vm2", "aa:bb");
        write_share_file(&settings, Scope::Temporary, "172.16.10.52", "vm3", "cc:dd");

        let runner = vm1_runner();
        let hypervisor = Hypervisor::new(Arc::clone(&runner), &settings);
        let reload = ServiceReload::new(Arc::clone(&runner), &settings);

        let result = clean_with(&settings, &hypervisor, &reload, refuse).await.unwrap();

        assert_eq!(result.removed.len(), 1);
        assert_eq!(result.failed.len(), 1);
        assert!(
            runner
                .command_lines()
                .contains(&"/usr/bin/sudo -n /usr/bin/systemctl reload smbd".to_string())
        );
    }

    #[tokio::test]
    async fn clean_reloads_after_removal() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        write_share_file(&settings, Scope::Temporary, "172.16.10.52", "vm3", "cc:dd");

        let runner = vm1_runner();
        let hypervisor = Hypervisor::new(Arc::clone(&runner), &settings);
        let reload = ServiceReload::new(Arc::clone(&runner), &settings);

        let result = clean(&settings, &hypervisor, &reload).await.unwrap();

        assert_eq!(result.removed.len(), 1);
        assert!(
            runner
                .command_lines()
                .contains(&"/usr/bin/sudo -n /usr/bin/systemctl reload smbd".to_string())
        );
    }

    #[tokio::test]
    async fn clean_refuses_without_hypervisor() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        let valid = write_share_file(&settings, Scope::Temporary, "172.16.10.53", "vm1", "aa:bb");

        let runner = Arc::new(FakeRunner::new(|_| Ok(Output::exit(1))));
        let hypervisor = Hypervisor::new(Arc::clone(&runner), &settings);
        let reload = ServiceReload::new(Arc::clone(&runner), &settings);

        let result = clean(&settings, &hypervisor, &reload).await;

        assert_matches!(result, Err(Error::Hypervisor(_)));
        assert!(valid.exists());
    }
}

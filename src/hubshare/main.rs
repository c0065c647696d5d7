// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use hubshare::clean::clean;
use hubshare::exec::SystemRunner;
use hubshare::hub::{HubConfiguration, Persisted, Scope};
use hubshare::hypervisor::Hypervisor;
use hubshare::reload::ServiceReload;
use hubshare::resolver::Resolver;
use hubshare::settings::{DEFAULT_SETTINGS_PATH, Settings};
use hubshare::share::SettingKey;
use hubshare::util::init_logger;

#[derive(Parser)]
#[command(name = "hubshare")]
#[command(about = "Manage Samba shares for VMs on the hub bridge")]
struct Cli {
    #[command(subcommand)]
    action: Action,

    /// Set share to read-only
    #[arg(short, long, global = true)]
    readonly: bool,

    /// Allow guest access
    #[arg(short, long, global = true)]
    guest: bool,

    /// Make the share permanent
    #[arg(short, long, global = true)]
    permanent: bool,

    /// Timeout (in seconds) for wait action
    #[arg(short, long, global = true, default_value_t = 60)]
    timeout: u64,

    /// Settings file
    #[arg(short, long, global = true, default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Log to the systemd journal instead of stderr
    #[arg(long, global = true)]
    journal: bool,
}

#[derive(Parser)]
enum Action {
    /// Share a host directory with a VM
    Add {
        /// VM name or IP
        vm: String,
        /// Host path to share
        path: PathBuf,
        /// Name of the share (default: derived from path)
        name: Option<String>,
    },
    /// Stop sharing a host directory with a VM
    Remove {
        /// VM name or IP
        vm: String,
        /// Host path of the share
        path: PathBuf,
        /// Name of the share (default: derived from path)
        name: Option<String>,
    },
    /// List all shares
    List,
    /// Show VMs currently on the bridge
    Find,
    /// Wait until a VM appears on the bridge
    Wait {
        /// VM name or IP
        vm: String,
    },
    /// Erase all shares of a VM
    Delete {
        /// VM name or IP
        vm: String,
    },
    /// Erase share files of VMs that are gone or renamed
    Clean,
}

/// Share name derived from a path: `/srv/data` -> `srv-data`.
fn default_share_name(path: &str) -> String {
    let name = path.replace('/', "-");
    match name.strip_prefix('-') {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

/// Resolve the shared directory and the share name.
fn share_target(path: &Path, name: Option<String>) -> Result<(String, String)> {
    if !path.is_dir() {
        anyhow::bail!("Path {} does not exist", path.display());
    }
    let path = path
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", path.display()))?
        .display()
        .to_string();
    let name = name.unwrap_or_else(|| default_share_name(&path));
    Ok((path, name))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.debug, cli.journal)?;

    let settings = Settings::load(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;

    let runner = Arc::new(SystemRunner);
    let resolver = Resolver::new(Arc::clone(&runner), &settings);
    let reload = ServiceReload::new(Arc::clone(&runner), &settings);
    let scope = Scope::from_permanent(cli.permanent);

    match cli.action {
        Action::Add { vm, path, name } => {
            let (path, name) = share_target(&path, name)?;
            let mut conf = HubConfiguration::open(&vm, scope, &settings, &resolver).await?;

            let share = conf.add_share(&name, [(SettingKey::Path, path)])?;
            if cli.readonly {
                share.set(SettingKey::ReadOnly, true);
            }
            if cli.guest {
                share.set(SettingKey::GuestOk, true);
            }

            conf.save(&reload).await?;
            info!("Share '{name}' added for {}", conf.vm_name());
        }
        Action::Remove { vm, path, name } => {
            let (_, name) = share_target(&path, name)?;
            let mut conf = HubConfiguration::open(&vm, scope, &settings, &resolver).await?;

            if !conf.remove_share(&name) {
                info!("{} has no share '{name}'", conf.vm_name());
            }
            if conf.save(&reload).await? == Persisted::Erased {
                info!("Last share of {} removed", conf.vm_name());
            }
        }
        Action::List => {
            let mut configurations = Vec::new();
            for scope in Scope::ALL {
                configurations.extend(HubConfiguration::load_scope(
                    &settings.scope_dir(scope),
                    scope,
                )?);
            }
            print!("{}", output::render_shares(&configurations));
        }
        Action::Find => {
            let hosts = resolver.discover_hosts().await?;
            print!("{}", output::render_hosts(&hosts));
        }
        Action::Wait { vm } => {
            let record = resolver
                .wait_for_host(&vm, Duration::from_secs(cli.timeout))
                .await?;
            println!("{record}");
        }
        Action::Delete { vm } => {
            let conf = HubConfiguration::open(&vm, scope, &settings, &resolver).await?;
            if !conf.delete(&reload).await? {
                info!("{} has no {scope} shares", conf.vm_name());
            }
        }
        Action::Clean => {
            let hypervisor = Hypervisor::new(Arc::clone(&runner), &settings);
            let outcome = clean(&settings, &hypervisor, &reload).await?;
            for removal in &outcome.removed {
                println!("{removal}");
            }
            if !outcome.failed.is_empty() {
                let paths: Vec<String> = outcome
                    .failed
                    .iter()
                    .map(|(removal, e)| format!("{}: {e}", removal.path.display()))
                    .collect();
                anyhow::bail!("Failed to erase stale share files: {}", paths.join(", "));
            }
        }
    }

    Ok(())
}

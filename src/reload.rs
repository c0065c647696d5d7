// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, warn};

use crate::exec::{CommandRunner, Invocation};
use crate::settings::Settings;

/// What the share service should do after a change on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Reloaded,
    Started,
    /// Service is not running and the change did not require it.
    LeftStopped,
    /// Reload or start was attempted and failed; already logged.
    Failed,
}

/// Applies share file changes to the running Samba service.
///
/// Failures are logged as warnings and never returned: the files on disk are
/// already correct, only the running service lags behind.
pub struct ServiceReload<R> {
    runner: Arc<R>,
    systemctl: PathBuf,
    sudo: PathBuf,
    service: String,
}

impl<R: CommandRunner> ServiceReload<R> {
    pub fn new(runner: Arc<R>, settings: &Settings) -> Self {
        Self {
            runner,
            systemctl: settings.tools.systemctl.clone(),
            sudo: settings.tools.sudo.clone(),
            service: settings.service.clone(),
        }
    }

    async fn is_active(&self) -> bool {
        let status = Invocation::new(&self.systemctl)
            .arg("status")
            .arg(&self.service);
        match self.runner.run(status).await {
            Ok(output) => output.success(),
            Err(e) => {
                warn!("Failed to query {} status: {e}", self.service);
                false
            }
        }
    }

    async fn privileged(&self, verb: &str) -> bool {
        let invocation = Invocation::new(&self.sudo)
            .arg("-n")
            .arg(self.systemctl.display().to_string())
            .arg(verb)
            .arg(&self.service);

        match self.runner.run(invocation).await {
            Ok(output) if output.success() => {
                debug!("{verb} of {} done", self.service);
                true
            }
            Ok(output) => {
                let code = output
                    .code
                    .map_or_else(|| "none".to_string(), |c| c.to_string());
                warn!("{verb} of {} failed (exit code {code})", self.service);
                false
            }
            Err(e) => {
                warn!("{verb} of {} failed: {e}", self.service);
                false
            }
        }
    }

    /// Reload the service if it runs. Otherwise start it when
    /// `should_be_loaded` is set (there are shares to serve).
    pub async fn poke(&self, should_be_loaded: bool) -> ReloadOutcome {
        let (verb, outcome) = if self.is_active().await {
            ("reload", ReloadOutcome::Reloaded)
        } else if should_be_loaded {
            ("start", ReloadOutcome::Started)
        } else {
            return ReloadOutcome::LeftStopped;
        };

        if self.privileged(verb).await {
            outcome
        } else {
            ReloadOutcome::Failed
        }
    }
}

// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for hubshare operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by discovery and share file handling.
#[derive(Error, Debug)]
pub enum Error {
    /// Address is live but has no usable hypervisor identity.
    #[error("Failed to get MAC for VM {identifier}")]
    Unresolvable { identifier: String },

    /// Identifier matches neither a live host nor an existing share file.
    #[error("Invalid VM '{identifier}'")]
    InvalidVm { identifier: String },

    #[error("Share '{name}' already declared")]
    DuplicateShare { name: String },

    #[error("Timeout waiting for {identifier} after {seconds}s")]
    Timeout { identifier: String, seconds: u64 },

    /// Malformed share file content. `line` is 1-based.
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Share file name does not carry an address.
    #[error("{} is not named <address>.conf", path.display())]
    FileName { path: PathBuf },

    #[error("Hypervisor query failed: {0}")]
    Hypervisor(String),

    #[error("Command '{}' failed: {message}", program.display())]
    Command { program: PathBuf, message: String },

    #[error("Invalid settings: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }
}

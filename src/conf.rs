// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Share file format.
//!
//! ```text
//! # VM: builder
//! # MAC: 52:54:00:aa:bb:01
//! [srv-data]
//!   path = /srv/data
//!   read only = no
//!   guest ok = no
//!   browsable = yes
//!   printable = no
//!
//! ```
//!
//! The two header comments identify the VM. Each share is a `[name]` line
//! followed by `key = value` lines and ends at a blank line. Other comment
//! lines are ignored.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};
use crate::share::{SettingKey, SettingValue, ShareDefinition};

const VM_TAG: &str = "# VM:";
const MAC_TAG: &str = "# MAC:";

/// Identity comments at the top of a share file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub vm: Option<String>,
    pub mac: Option<String>,
}

impl Header {
    /// Take the header value from a comment line, if it is one. First one wins.
    fn absorb(&mut self, line: &str) {
        if let Some(vm) = line.strip_prefix(VM_TAG) {
            self.vm.get_or_insert_with(|| vm.trim().to_string());
        } else if let Some(mac) = line.strip_prefix(MAC_TAG) {
            self.mac.get_or_insert_with(|| mac.trim().to_string());
        }
    }

    /// Read only the header of a share file, stopping at the first share.
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let mut header = Self::default();
        for line in BufReader::new(File::open(path)?).lines() {
            let line = line?;
            let line = line.trim();
            if line.starts_with('[') {
                break;
            }
            if line.starts_with('#') {
                header.absorb(line);
            }
        }
        Ok(header)
    }
}

/// Parsed content of a share file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareFile {
    pub header: Header,
    pub shares: Vec<ShareDefinition>,
}

impl ShareFile {
    pub fn parse(text: &str) -> Result<Self> {
        let mut file = Self::default();
        let mut current: Option<ShareDefinition> = None;

        for (index, line) in text.lines().enumerate() {
            let number = index + 1;
            let line = line.trim();

            if line.is_empty() {
                file.close(current.take())?;
                continue;
            }

            if line.starts_with('#') {
                file.header.absorb(line);
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                file.close(current.take())?;
                current = Some(ShareDefinition::empty(name.trim()));
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::parse(
                    number,
                    format!("expected 'key = value', found '{line}'"),
                ));
            };
            if key.trim().is_empty() {
                return Err(Error::parse(number, "setting without a name"));
            }
            let Some(share) = current.as_mut() else {
                return Err(Error::parse(
                    number,
                    format!("setting '{}' outside of a [share] section", key.trim()),
                ));
            };

            let key = SettingKey::parse(key);
            let value = SettingValue::parse(key.kind(), value);
            share.set(key, value);
        }

        file.close(current)?;
        Ok(file)
    }

    fn close(&mut self, share: Option<ShareDefinition>) -> Result<()> {
        let Some(share) = share else {
            return Ok(());
        };
        if self.shares.iter().any(|s| s.name == share.name) {
            return Err(Error::DuplicateShare { name: share.name });
        }
        self.shares.push(share);
        Ok(())
    }
}

impl std::fmt::Display for ShareFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(vm) = &self.header.vm {
            writeln!(f, "{VM_TAG} {vm}")?;
        }
        if let Some(mac) = &self.header.mac {
            writeln!(f, "{MAC_TAG} {mac}")?;
        }
        for share in &self.shares {
            writeln!(f, "[{}]", share.name)?;
            for setting in share.settings() {
                writeln!(f, "  {setting}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

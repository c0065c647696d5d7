// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv4Addr;

use anyhow::Result;

/// Initialize logging.
///
/// Interactive runs log to stderr; `journal` routes records to the systemd
/// journal instead, for invocations from units and hooks.
///
/// # Errors
/// Returns an error if the journal logger fails to initialize.
pub fn init_logger(debug: bool, journal: bool) -> Result<()> {
    let log_level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    if journal {
        systemd_journal_logger::JournalLog::new()?.install()?;
        log::set_max_level(log_level);
    } else {
        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp(None)
            .format_target(false)
            .parse_default_env()
            .try_init()?;
    }
    Ok(())
}

/// Parse an identifier as a dotted-quad address, if it is one.
#[must_use]
pub fn as_address(identifier: &str) -> Option<Ipv4Addr> {
    identifier.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_identifiers() {
        assert_eq!(as_address("172.16.10.51"), Some(Ipv4Addr::new(172, 16, 10, 51)));
        assert_eq!(as_address("builder-vm"), None);
        assert_eq!(as_address("172.16.10"), None);
    }
}

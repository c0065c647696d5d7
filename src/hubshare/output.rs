// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Write;

use hubshare::hub::{HubConfiguration, Scope};
use hubshare::resolver::AddressMap;
use hubshare::share::SettingKey;

/// One line of the share listing.
struct ShareRow {
    scope: Scope,
    cells: [String; 6],
}

const SHARE_HEADINGS: [&str; 6] = ["VM", "IP", "Name", "Path", "Read Only", "Guest OK"];

fn flag_cell(flag: bool) -> String {
    let text = if flag { "True" } else { "False" };
    text.to_string()
}

fn share_rows(configurations: &[HubConfiguration]) -> Vec<ShareRow> {
    configurations
        .iter()
        .flat_map(|conf| {
            conf.shares().iter().map(|share| ShareRow {
                scope: conf.scope(),
                cells: [
                    conf.vm_name().to_string(),
                    conf.address().to_string(),
                    share.name.clone(),
                    share.path().to_string(),
                    flag_cell(share.flag(&SettingKey::ReadOnly)),
                    flag_cell(share.flag(&SettingKey::GuestOk)),
                ],
            })
        })
        .collect()
}

/// Share listing of both scopes, permanent first. Column widths fit the
/// widest cell over all rows so both sections line up.
pub fn render_shares(configurations: &[HubConfiguration]) -> String {
    let rows = share_rows(configurations);

    let mut widths = SHARE_HEADINGS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(&row.cells) {
            *width = (*width).max(cell.len());
        }
    }
    let rule = widths.iter().sum::<usize>() + (widths.len() - 1) * 3;

    let mut out = String::new();
    for scope in Scope::ALL {
        let title = match scope {
            Scope::Permanent => "Permanent",
            Scope::Temporary => "Temporary",
        };
        let _ = writeln!(out, "#### {title} Shares ####");
        push_line(&mut out, &SHARE_HEADINGS.map(str::to_string), &widths);
        let _ = writeln!(out, "{}", "-".repeat(rule));

        for row in rows.iter().filter(|row| row.scope == scope) {
            push_line(&mut out, &row.cells, &widths);
        }
        out.push('\n');
    }
    out
}

fn push_line(out: &mut String, cells: &[String], widths: &[usize]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join(" | ");
    let _ = writeln!(out, "{}", line.trim_end());
}

/// Discovered hosts as an `IP | MAC | VM` table.
pub fn render_hosts(hosts: &AddressMap) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<16}| {:<18}| VM", "IP", "MAC");
    let _ = writeln!(out, "{}", "-".repeat(45));
    for record in hosts.iter() {
        let _ = writeln!(
            out,
            "{:<16}| {:<18}| {}",
            record.address.to_string(),
            record.hardware_address,
            record.name
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubshare::resolver::AddressRecord;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;
    use std::path::Path;

    #[test]
    fn shares_are_listed_per_scope() {
        let mut perm = HubConfiguration::new(
            "builder",
            Ipv4Addr::new(172, 16, 10, 51),
            "52:54:00:aa:bb:01",
            Scope::Permanent,
            Path::new("/etc/samba/perm.conf.d"),
        );
        perm.add_share("srv-data", [(SettingKey::Path, "/srv/data")])
            .unwrap()
            .set(SettingKey::ReadOnly, true);

        let listing = render_shares(&[perm]);

        assert_eq!(
            listing,
            "#### Permanent Shares ####\n\
             VM      | IP           | Name     | Path      | Read Only | Guest OK\n\
             --------------------------------------------------------------------\n\
             builder | 172.16.10.51 | srv-data | /srv/data | True      | False\n\
             \n\
             #### Temporary Shares ####\n\
             VM      | IP           | Name     | Path      | Read Only | Guest OK\n\
             --------------------------------------------------------------------\n\
             \n"
        );
    }

    #[test]
    fn hosts_table() {
        let hosts: AddressMap = [AddressRecord {
            address: Ipv4Addr::new(172, 16, 10, 51),
            hardware_address: "52:54:00:aa:bb:01".to_string(),
            name: "builder".to_string(),
        }]
        .into_iter()
        .collect();

        let table = render_hosts(&hosts);

        assert_eq!(
            table.lines().nth(2),
            Some("172.16.10.51    | 52:54:00:aa:bb:01 | builder")
        );
    }
}

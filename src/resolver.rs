// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Host discovery on the hub bridge.
//!
//! Addresses on the bridge are dynamic, so a discovery cycle:
//! 1. asks the hypervisor for its MAC -> domain map
//! 2. pings every address of the dynamic range at once, only so that the
//!    kernel's neighbour table gets filled for hosts that answer
//! 3. reads the neighbour table for the bridge once all probes are done
//! 4. joins the two on MAC address
//!
//! Probe results are ignored. A host that misses a cycle shows up in the next one.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use log::{debug, error, warn};
use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::exec::{CommandRunner, Invocation, checked_output};
use crate::hypervisor::{HardwareMap, Hypervisor};
use crate::settings::Settings;
use crate::util::as_address;

/// Pause before retrying a discovery cycle that failed.
const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Name given to hosts whose MAC the hypervisor does not know.
pub const UNKNOWN_NAME: &str = "<<unknown:unknown-mac>>";

static NEIGHBOUR_ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([\d.]+)\)").unwrap());

static NEIGHBOUR_MAC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" at ([0-9a-fA-F:]+)").unwrap());

/// A live host found on the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
    pub address: Ipv4Addr,
    /// Lowercase MAC address.
    pub hardware_address: String,
    /// Domain name, or [`UNKNOWN_NAME`].
    pub name: String,
}

impl AddressRecord {
    /// Whether the hypervisor knows this host's MAC.
    #[must_use]
    pub fn is_known(&self) -> bool {
        self.name != UNKNOWN_NAME
    }

    fn matches(&self, identifier: &str) -> bool {
        as_address(identifier).map_or(self.name == identifier, |address| {
            self.address == address
        })
    }
}

impl std::fmt::Display for AddressRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is {} ({})", self.address, self.name, self.hardware_address)
    }
}

/// Result of one discovery cycle, ordered by address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressMap(BTreeMap<Ipv4Addr, AddressRecord>);

impl AddressMap {
    /// Join neighbour table entries with the hypervisor's MAC map.
    #[must_use]
    pub fn join(neighbours: &BTreeMap<Ipv4Addr, String>, hardware: &HardwareMap) -> Self {
        Self(
            neighbours
                .iter()
                .map(|(&address, mac)| {
                    let name = hardware
                        .get(mac)
                        .map_or_else(|| UNKNOWN_NAME.to_string(), Clone::clone);
                    let record = AddressRecord {
                        address,
                        hardware_address: mac.clone(),
                        name,
                    };
                    (address, record)
                })
                .collect(),
        )
    }

    #[must_use]
    pub fn get(&self, address: Ipv4Addr) -> Option<&AddressRecord> {
        self.0.get(&address)
    }

    /// Find a host by address (dotted quad) or by domain name.
    #[must_use]
    pub fn find(&self, identifier: &str) -> Option<&AddressRecord> {
        self.0.values().find(|record| record.matches(identifier))
    }

    pub fn iter(&self) -> impl Iterator<Item = &AddressRecord> {
        self.0.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<AddressRecord> for AddressMap {
    fn from_iter<T: IntoIterator<Item = AddressRecord>>(iter: T) -> Self {
        Self(iter.into_iter().map(|r| (r.address, r)).collect())
    }
}

/// Parse `arp -a` output into address -> lowercase MAC.
///
/// Lines look like `? (172.16.10.51) at 52:54:00:aa:bb:01 [ether] on br-hub`.
/// Incomplete entries (`at <incomplete>`) have no MAC and are skipped.
#[must_use]
pub fn parse_neighbours(output: &str) -> BTreeMap<Ipv4Addr, String> {
    output
        .lines()
        .filter_map(|line| {
            let address = NEIGHBOUR_ADDRESS_RE.captures(line)?[1].parse().ok()?;
            let mac = NEIGHBOUR_MAC_RE.captures(line)?[1].to_ascii_lowercase();
            Some((address, mac))
        })
        .collect()
}

/// Probe sweep outcome.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub launched: usize,
    pub answered: usize,
    pub abandoned: usize,
}

/// Discovers hosts on the bridge and resolves them to domains.
pub struct Resolver<R> {
    runner: Arc<R>,
    hypervisor: Hypervisor<R>,
    settings: Settings,
}

impl<R: CommandRunner> Resolver<R> {
    pub fn new(runner: Arc<R>, settings: &Settings) -> Self {
        Self {
            hypervisor: Hypervisor::new(Arc::clone(&runner), settings),
            runner,
            settings: settings.clone(),
        }
    }

    /// MAC -> domain name map. Hypervisor failures degrade to an empty map,
    /// which makes every host unknown.
    pub async fn hardware_map(&self) -> HardwareMap {
        match self.hypervisor.hardware_map().await {
            Ok(map) => map,
            Err(e) => {
                error!("{e}");
                HardwareMap::new()
            }
        }
    }

    /// Ping every candidate address concurrently.
    ///
    /// Returns only after every probe has finished or been abandoned at its timeout.
    pub async fn probe_sweep(&self) -> SweepStats {
        let limit = Arc::new(Semaphore::new(self.settings.max_concurrent_probes));
        let mut probes = JoinSet::new();
        let mut stats = SweepStats::default();

        for address in self.settings.candidate_addresses() {
            let runner = Arc::clone(&self.runner);
            let limit = Arc::clone(&limit);
            let invocation = Invocation::new(&self.settings.tools.ping)
                .arg("-c1")
                .arg(address.to_string())
                .timeout(self.settings.probe_timeout());

            probes.spawn(async move {
                let _permit = limit.acquire_owned().await.ok()?;
                match runner.run(invocation).await {
                    Ok(output) => Some(output),
                    Err(e) => {
                        debug!("Probe of {address} failed to start: {e}");
                        None
                    }
                }
            });
            stats.launched += 1;
        }

        while let Some(result) = probes.join_next().await {
            match result {
                Ok(Some(output)) if output.timed_out => stats.abandoned += 1,
                Ok(Some(output)) if output.success() => stats.answered += 1,
                Ok(_) => {}
                Err(e) => warn!("Probe task failed: {e}"),
            }
        }

        debug!(
            "Probe sweep done (launched={}, answered={}, abandoned={})",
            stats.launched, stats.answered, stats.abandoned
        );
        stats
    }

    /// Current neighbour table entries on the bridge.
    pub async fn neighbours(&self) -> Result<BTreeMap<Ipv4Addr, String>> {
        let table = checked_output(
            self.runner.as_ref(),
            Invocation::new(&self.settings.tools.arp)
                .arg("-a")
                .arg("-i")
                .arg(&self.settings.bridge),
        )
        .await?;
        Ok(parse_neighbours(&table))
    }

    /// Run one discovery cycle.
    pub async fn discover_hosts(&self) -> Result<AddressMap> {
        let hardware = self.hardware_map().await;
        self.probe_sweep().await;
        let neighbours = self.neighbours().await?;

        let hosts = AddressMap::join(&neighbours, &hardware);
        debug!(
            "Discovered {} hosts ({} known to the hypervisor)",
            hosts.len(),
            hosts.iter().filter(|r| r.is_known()).count()
        );
        Ok(hosts)
    }

    /// Repeat discovery until a host matching `identifier` (address or name)
    /// shows up, or `timeout` has elapsed. Failed cycles are retried.
    pub async fn wait_for_host(&self, identifier: &str, timeout: Duration) -> Result<AddressRecord> {
        let start = Instant::now();
        loop {
            match self.discover_hosts().await {
                Ok(hosts) => {
                    if let Some(record) = hosts.find(identifier) {
                        return Ok(record.clone());
                    }
                }
                Err(e) => {
                    warn!("Discovery failed, retrying: {e}");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }

            if start.elapsed() >= timeout {
                return Err(Error::Timeout {
                    identifier: identifier.to_string(),
                    seconds: timeout.as_secs(),
                });
            }
            debug!("{identifier} not on the bridge yet");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Output;
    use crate::testing::{FakeRunner, program_name};
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ARP_OUTPUT: &str = "\
? (172.16.10.51) at 52:54:00:AA:BB:01 [ether] on br-hub
? (172.16.10.60) at <incomplete> on br-hub
? (172.16.10.77) at 52:54:00:cc:dd:02 [ether] on br-hub
";

    const DOMAIN_XML: &str =
        "<domain><devices><interface type='bridge'><mac address='52:54:00:aa:bb:01'/></interface></devices></domain>";

    fn small_range() -> Settings {
        Settings {
            first_host: 50,
            last_host: 59,
            max_concurrent_probes: 4,
            ..Settings::default()
        }
    }

    fn hub_answer(invocation: &Invocation) -> std::io::Result<Output> {
        match program_name(invocation) {
            "virsh" if invocation.args.contains(&"list".to_string()) => {
                Ok(Output::with_stdout(0, "builder\n"))
            }
            "virsh" => Ok(Output::with_stdout(0, DOMAIN_XML)),
            "arp" => Ok(Output::with_stdout(0, ARP_OUTPUT)),
            _ => Ok(Output::exit(1)),
        }
    }

    #[test]
    fn parse_neighbours_skips_incomplete() {
        let neighbours = parse_neighbours(ARP_OUTPUT);

        assert_eq!(neighbours.len(), 2);
        assert_eq!(
            neighbours[&Ipv4Addr::new(172, 16, 10, 51)],
            "52:54:00:aa:bb:01"
        );
        assert_eq!(
            neighbours[&Ipv4Addr::new(172, 16, 10, 77)],
            "52:54:00:cc:dd:02"
        );
    }

    #[test]
    fn join_marks_unknown_macs() {
        let neighbours = parse_neighbours(ARP_OUTPUT);
        let hardware = HardwareMap::from([("52:54:00:aa:bb:01".to_string(), "builder".to_string())]);

        let hosts = AddressMap::join(&neighbours, &hardware);

        let known = hosts.get(Ipv4Addr::new(172, 16, 10, 51)).unwrap();
        assert_eq!(known.name, "builder");
        assert!(known.is_known());
        let unknown = hosts.get(Ipv4Addr::new(172, 16, 10, 77)).unwrap();
        assert_eq!(unknown.name, UNKNOWN_NAME);
        assert!(!unknown.is_known());
    }

    #[test]
    fn find_by_address_or_name() {
        let hosts: AddressMap = [AddressRecord {
            address: Ipv4Addr::new(172, 16, 10, 51),
            hardware_address: "52:54:00:aa:bb:01".to_string(),
            name: "builder".to_string(),
        }]
        .into_iter()
        .collect();

        assert!(hosts.find("builder").is_some());
        assert!(hosts.find("172.16.10.51").is_some());
        assert!(hosts.find("172.16.10.52").is_none());
        assert!(hosts.find("build").is_none());
    }

    #[tokio::test]
    async fn discover_hosts_resolves_names() {
        let runner = Arc::new(FakeRunner::new(hub_answer));
        let resolver = Resolver::new(runner, &small_range());

        let hosts = resolver.discover_hosts().await.unwrap();

        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts.find("builder").unwrap().address, Ipv4Addr::new(172, 16, 10, 51));
    }

    #[tokio::test]
    async fn neighbour_table_is_read_after_every_probe_finished() {
        let finished = Arc::new(AtomicUsize::new(0));
        let seen_at_table_read = Arc::new(Mutex::new(None));

        let runner = {
            let finished = Arc::clone(&finished);
            let seen = Arc::clone(&seen_at_table_read);
            FakeRunner::new(move |invocation| match program_name(invocation) {
                "ping" => {
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(Output::exit(0))
                }
                "arp" => {
                    *seen.lock().unwrap() = Some(finished.load(Ordering::SeqCst));
                    Ok(Output::with_stdout(0, ARP_OUTPUT))
                }
                _ => Ok(Output::exit(1)),
            })
            .with_delay("ping", Duration::from_millis(20))
        };
        let resolver = Resolver::new(Arc::new(runner), &small_range());

        resolver.discover_hosts().await.unwrap();

        assert_eq!(*seen_at_table_read.lock().unwrap(), Some(10));
    }

    #[tokio::test]
    async fn abandoned_probes_still_join_before_table_read() {
        let runner = Arc::new(
            FakeRunner::new(hub_answer).with_delay("ping", Duration::from_secs(5)),
        );
        let settings = Settings {
            probe_timeout_ms: 10,
            ..small_range()
        };
        let resolver = Resolver::new(Arc::clone(&runner), &settings);

        let stats = resolver.probe_sweep().await;
        assert_eq!(stats.launched, 10);
        assert_eq!(stats.abandoned, 10);

        resolver.neighbours().await.unwrap();
        let calls = runner.calls();
        assert_eq!(calls.iter().filter(|c| program_name(c) == "ping").count(), 10);
        assert_eq!(program_name(calls.last().unwrap()), "arp");
        let first = calls
            .iter()
            .find(|c| c.args.last().is_some_and(|a| a == "172.16.10.50"))
            .unwrap();
        assert_eq!(first.args, vec!["-c1", "172.16.10.50"]);
        assert_eq!(first.timeout, Some(Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn hypervisor_failure_degrades_to_unknown() {
        let runner = FakeRunner::new(|invocation| match program_name(invocation) {
            "arp" => Ok(Output::with_stdout(0, ARP_OUTPUT)),
            _ => Ok(Output::exit(1)),
        });
        let resolver = Resolver::new(Arc::new(runner), &small_range());

        let hosts = resolver.discover_hosts().await.unwrap();

        assert_eq!(hosts.len(), 2);
        assert!(hosts.iter().all(|r| !r.is_known()));
    }

    #[tokio::test]
    async fn wait_for_host_retries_until_seen() {
        let tables = Arc::new(AtomicUsize::new(0));
        let runner = {
            let tables = Arc::clone(&tables);
            FakeRunner::new(move |invocation| match program_name(invocation) {
                "arp" if tables.fetch_add(1, Ordering::SeqCst) < 2 => Ok(Output::with_stdout(0, "")),
                _ => hub_answer(invocation),
            })
        };
        let resolver = Resolver::new(Arc::new(runner), &small_range());

        let record = resolver
            .wait_for_host("builder", Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(tables.load(Ordering::SeqCst), 3);
        assert_eq!(
            record.to_string(),
            "172.16.10.51 is builder (52:54:00:aa:bb:01)"
        );
    }

    #[tokio::test]
    async fn wait_for_host_survives_failed_table_read() {
        let tables = Arc::new(AtomicUsize::new(0));
        let runner = {
            let tables = Arc::clone(&tables);
            FakeRunner::new(move |invocation| match program_name(invocation) {
                "arp" if tables.fetch_add(1, Ordering::SeqCst) == 0 => Ok(Output::exit(1)),
                _ => hub_answer(invocation),
            })
        };
        let resolver = Resolver::new(Arc::new(runner), &small_range());

        let record = resolver
            .wait_for_host("172.16.10.51", Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(tables.load(Ordering::SeqCst), 2);
        assert_eq!(record.name, "builder");
    }

    #[tokio::test]
    async fn wait_for_host_times_out_on_broken_table() {
        let runner = FakeRunner::new(|invocation| match program_name(invocation) {
            "arp" => Ok(Output::exit(1)),
            _ => hub_answer(invocation),
        });
        let resolver = Resolver::new(Arc::new(runner), &small_range());

        let result = resolver.wait_for_host("builder", Duration::ZERO).await;

        assert_matches!(result, Err(Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn wait_for_host_times_out() {
        let resolver = Resolver::new(Arc::new(FakeRunner::new(hub_answer)), &small_range());

        let result = resolver.wait_for_host("tester", Duration::ZERO).await;

        assert_matches!(result, Err(Error::Timeout { identifier, seconds: 0 }) if identifier == "tester");
    }
}

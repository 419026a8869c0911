use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, trace, warn};

use crate::client::dial;
use crate::config::ClientConfig;
use crate::netdetect::{candidate_hosts, parse_ipv4_network};

/// Blocks wider than this are scanned, with a warning.
const WIDE_PREFIX: u8 = 8;

/// Scan an IPv4 CIDR block for listening apcupsd endpoints.
///
/// Returns the `address:port` of every candidate that accepted a TCP
/// connection within `config.dial_timeout`, in completion order. Unparseable
/// and IPv6 networks yield an empty list.
pub async fn scan(network: &str, config: &ClientConfig) -> Vec<String> {
    let Some(net) = parse_ipv4_network(network) else {
        warn!("not an IPv4 CIDR network: {:?}", network);
        return Vec::new();
    };
    if net.prefix_len() < WIDE_PREFIX {
        warn!(
            "{} spans {} addresses; the scan will take a long time",
            net,
            1u64 << (32 - net.prefix_len())
        );
    }
    info!("scanning {} on port {}", net, config.port);
    scan_hosts(candidate_hosts(net), config).await
}

/// Dial each host with a plain TCP connect.
///
/// - Hosts are pulled one at a time; a permit from a `Semaphore` sized by
///   `config.concurrency_limit()` is taken before each task is spawned, so
///   at most that many tasks exist at once.
/// - A connected socket is closed immediately; no request is sent.
/// - Hits are sent to a single collector task, which owns the result list.
pub async fn scan_hosts<I>(hosts: I, config: &ClientConfig) -> Vec<String>
where
    I: IntoIterator<Item = Ipv4Addr>,
{
    let start = Instant::now();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let collector = tokio::spawn(async move {
        let mut found = Vec::new();
        while let Some(endpoint) = rx.recv().await {
            found.push(endpoint);
        }
        found
    });

    let sem = Arc::new(Semaphore::new(config.concurrency_limit()));
    let timeout = config.dial_timeout;
    let mut set = JoinSet::new();
    let mut dialed = 0usize;

    for ip in hosts {
        let permit = sem
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore in scope");
        // Reap finished tasks so the set stays as small as the permit count.
        while let Some(res) = set.try_join_next() {
            if let Err(e) = res {
                warn!("dial task failed: {}", e);
            }
        }
        dialed += 1;
        let addr = SocketAddr::new(IpAddr::V4(ip), config.port);
        let tx = tx.clone();
        set.spawn(async move {
            let _permit = permit;
            match dial(addr, timeout).await {
                Ok(stream) => {
                    drop(stream);
                    // Only fails if the collector is gone.
                    let _ = tx.send(addr.to_string());
                }
                Err(e) => trace!("{}: {}", addr, e),
            }
        });
    }
    // The collector finishes once the last worker's sender is dropped.
    drop(tx);

    while let Some(res) = set.join_next().await {
        if let Err(e) = res {
            warn!("dial task failed: {}", e);
        }
    }
    let found = match collector.await {
        Ok(found) => found,
        Err(e) => {
            warn!("scan collector failed: {}", e);
            Vec::new()
        }
    };
    info!(
        "dialed {} host(s) in {:?}, {} responsive",
        dialed,
        start.elapsed(),
        found.len()
    );
    found
}

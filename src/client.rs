use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, warn};

use crate::codec::STATUS_REQUEST;
use crate::config::ClientConfig;
use crate::error::QueryError;
use crate::status::read_status;
use crate::types::{QueryOutcome, UpsSummary};

/// Connect to `addr`, failing with `TimedOut` once `timeout` elapses.
pub async fn dial<A: ToSocketAddrs>(addr: A, timeout: Duration) -> io::Result<TcpStream> {
    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(res) => res,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no connection within {timeout:?}"),
        )),
    }
}

/// Query one apcupsd endpoint (`host:port`) for its status summary.
///
/// The connection is shut down before returning, whatever the outcome.
pub async fn query(addr: &str, config: &ClientConfig) -> Result<UpsSummary, QueryError> {
    let mut stream = dial(addr, config.dial_timeout)
        .await
        .map_err(|e| QueryError::connect_failed(addr, e))?;
    debug!("{}: connected", addr);

    let result = exchange(&mut stream, addr, config).await;
    if let Err(e) = stream.shutdown().await {
        debug!("{}: shutdown: {}", addr, e);
    }
    result
}

async fn exchange(
    stream: &mut TcpStream,
    addr: &str,
    config: &ClientConfig,
) -> Result<UpsSummary, QueryError> {
    let request_failed = |source| QueryError::Request {
        addr: addr.to_string(),
        source,
    };
    match time::timeout(config.dial_timeout, stream.write_all(&STATUS_REQUEST)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(request_failed(e)),
        Err(_) => {
            return Err(request_failed(io::Error::new(
                io::ErrorKind::TimedOut,
                "status request write timed out",
            )))
        }
    }

    read_status(stream, config).await.ok_or_else(|| {
        warn!("{}: response ended before END APC", addr);
        QueryError::incomplete(addr)
    })
}

/// Query every target concurrently, one outcome per target, sorted by target.
pub async fn query_all(targets: &[String], config: &ClientConfig) -> Vec<QueryOutcome> {
    let sem = Arc::new(Semaphore::new(config.concurrency_limit()));
    let config = Arc::new(config.clone());
    let mut set = JoinSet::new();

    for target in targets {
        let target = target.clone();
        let sem = sem.clone();
        let config = config.clone();
        set.spawn(async move {
            // The semaphore is never closed.
            let _permit = sem.acquire_owned().await.ok();
            let result = query(&target, &config).await;
            QueryOutcome { target, result }
        });
    }

    let mut outcomes = Vec::with_capacity(targets.len());
    while let Some(res) = set.join_next().await {
        match res {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => warn!("query task failed: {}", e),
        }
    }
    outcomes.sort_by(|a, b| a.target.cmp(&b.target));
    outcomes
}

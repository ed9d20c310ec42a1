use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, info};

/// Sends each row as one UDP datagram to `target`, pausing `interval`
/// between datagrams. Returns the number of datagrams sent.
pub async fn replay(rows: &[Vec<u8>], target: &str, interval: Duration) -> Result<u64> {
    let addr = lookup_host(target)
        .await
        .with_context(|| format!("Failed to resolve {}", target))?
        .next()
        .ok_or_else(|| anyhow!("{} resolved to no address", target))?;
    let local = if addr.is_ipv4() {
        SocketAddr::from(([0u8; 4], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(local).await.context("Failed to bind UDP socket")?;

    info!("Replaying {} rows to {}", rows.len(), addr);
    let mut sent = 0u64;
    for (i, row) in rows.iter().enumerate() {
        if i > 0 && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
        let n = socket
            .send_to(row, addr)
            .await
            .with_context(|| format!("Failed to send row {}", i + 1))?;
        debug!("row {}: {} bytes", i + 1, n);
        sent += 1;
    }
    Ok(sent)
}

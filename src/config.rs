//! Client configuration and replica address parsing.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{InitError, InitResult};

/// Lowest accepted `concurrency_max`.
pub const CONCURRENCY_MIN: u32 = 1;

/// Highest accepted `concurrency_max`.
pub const CONCURRENCY_MAX: u32 = 8192;

/// Maximum number of replica addresses a cluster may be configured with.
pub const REPLICAS_MAX: usize = 6;

/// Port assumed for address entries that omit one.
pub const DEFAULT_PORT: u16 = 3001;

/// Address assumed for entries that are a bare port number.
pub const DEFAULT_ADDRESS: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

/// Tuning knobs for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Size of the packet pool, which bounds the number of concurrently
    /// outstanding requests. Valid range `1..=8192`.
    pub concurrency_max: u32,

    /// How long the reactor thread sleeps between ticks when idle.
    /// Submissions wake it early through the signal.
    pub tick_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { concurrency_max: 256, tick_interval: Duration::from_millis(10) }
    }
}

impl ClientConfig {
    /// Validate the configured concurrency bound.
    pub(crate) fn validate(&self) -> InitResult<()> {
        if self.concurrency_max < CONCURRENCY_MIN || self.concurrency_max > CONCURRENCY_MAX {
            return Err(InitError::ConcurrencyMaxInvalid {
                requested: self.concurrency_max,
                min: CONCURRENCY_MIN,
                max: CONCURRENCY_MAX,
            });
        }
        Ok(())
    }
}

/// Parse a comma- or space-separated replica address list.
///
/// Each entry is one of `host:port`, `host`, or a bare `port` number; `host`
/// is an IP address. Omitted parts default to [`DEFAULT_ADDRESS`] and
/// [`DEFAULT_PORT`].
///
/// # Errors
///
/// [`InitError::AddressInvalid`] for an empty list or a malformed entry,
/// [`InitError::AddressLimitExceeded`] when the list names more than
/// [`REPLICAS_MAX`] replicas.
pub fn parse_addresses(addresses: &str) -> InitResult<Vec<SocketAddr>> {
    let mut replicas = Vec::new();
    for entry in addresses.split([',', ' ']).filter(|entry| !entry.is_empty()) {
        if replicas.len() == REPLICAS_MAX {
            return Err(InitError::AddressLimitExceeded { max: REPLICAS_MAX });
        }
        replicas.push(parse_entry(entry)?);
    }
    if replicas.is_empty() {
        return Err(InitError::AddressInvalid(addresses.to_owned()));
    }
    Ok(replicas)
}

fn parse_entry(entry: &str) -> InitResult<SocketAddr> {
    let invalid = || InitError::AddressInvalid(entry.to_owned());

    // Bare port number.
    if let Ok(port) = entry.parse::<u16>() {
        return Ok(SocketAddr::new(IpAddr::V4(DEFAULT_ADDRESS), port));
    }
    // Full host:port pair.
    if let Ok(addr) = entry.parse::<SocketAddr>() {
        return Ok(addr);
    }
    // Bare host.
    let ip: IpAddr = entry.parse().map_err(|_| invalid())?;
    Ok(SocketAddr::new(ip, DEFAULT_PORT))
}

//! Client address filtering with CIDR support.
//!
//! The client address is the leftmost `X-Forwarded-For` entry when present,
//! else the socket address. A deny match always rejects; otherwise a
//! non-empty allow list must contain the address.
use std::net::IpAddr;

use async_trait::async_trait;
use eyre::Result;
use http::StatusCode;
use serde::Deserialize;

use crate::plugins::{Plugin, ProxyResponse, RequestContext};

/// CIDR network representation. A bare address parses as /32 (or /128).
#[derive(Debug, Clone)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpNetwork {
    pub fn parse(s: &str) -> Result<Self> {
        let (addr, prefix_len) = match s.split_once('/') {
            Some((ip_str, prefix_str)) => {
                let addr: IpAddr = ip_str
                    .parse()
                    .map_err(|e| eyre::eyre!("invalid IP address '{ip_str}': {e}"))?;
                let prefix_len: u8 = prefix_str
                    .parse()
                    .map_err(|e| eyre::eyre!("invalid prefix length '{prefix_str}': {e}"))?;
                (addr, prefix_len)
            }
            None => {
                let addr: IpAddr = s
                    .parse()
                    .map_err(|e| eyre::eyre!("invalid IP address '{s}': {e}"))?;
                let prefix_len = match addr {
                    IpAddr::V4(_) => 32,
                    IpAddr::V6(_) => 128,
                };
                (addr, prefix_len)
            }
        };

        match addr {
            IpAddr::V4(_) if prefix_len > 32 => {
                eyre::bail!("IPv4 prefix length must be <= 32")
            }
            IpAddr::V6(_) if prefix_len > 128 => {
                eyre::bail!("IPv6 prefix length must be <= 128")
            }
            _ => {}
        }

        Ok(Self { addr, prefix_len })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    !0u32 << (32 - self.prefix_len)
                };
                (u32::from(net) & mask) == (u32::from(addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    !0u128 << (128 - self.prefix_len)
                };
                (u128::from(net) & mask) == (u128::from(addr) & mask)
            }
            _ => false,
        }
    }
}

fn default_status() -> u16 {
    403
}

fn default_message() -> String {
    "your IP address is not allowed".to_string()
}

#[derive(Debug, Deserialize)]
struct IpRestrictionOptions {
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    deny: Vec<String>,
    #[serde(default = "default_status")]
    status: u16,
    #[serde(default = "default_message")]
    message: String,
}

pub struct IpRestrictionPlugin {
    allow: Vec<IpNetwork>,
    deny: Vec<IpNetwork>,
    status: StatusCode,
    message: String,
}

impl IpRestrictionPlugin {
    pub fn from_options(options: &serde_json::Value) -> Result<Self> {
        let options: IpRestrictionOptions = serde_json::from_value(options.clone())?;
        Ok(Self {
            allow: options
                .allow
                .iter()
                .map(|s| IpNetwork::parse(s))
                .collect::<Result<_>>()?,
            deny: options
                .deny
                .iter()
                .map(|s| IpNetwork::parse(s))
                .collect::<Result<_>>()?,
            status: StatusCode::from_u16(options.status).unwrap_or(StatusCode::FORBIDDEN),
            message: options.message,
        })
    }

    fn reject(&self) -> ProxyResponse {
        ProxyResponse::error(self.status, &self.message)
    }
}

#[async_trait]
impl Plugin for IpRestrictionPlugin {
    fn name(&self) -> &'static str {
        "ip-restriction"
    }

    async fn access(&self, ctx: &mut RequestContext) -> Result<()> {
        let client_ip = ctx.forwarded_client_ip();

        // deny wins over allow
        if self.deny.iter().any(|net| net.contains(client_ip)) {
            ctx.set_short_circuit(self.reject());
            return Ok(());
        }

        if !self.allow.is_empty() && !self.allow.iter().any(|net| net.contains(client_ip)) {
            ctx.set_short_circuit(self.reject());
        }
        Ok(())
    }
}

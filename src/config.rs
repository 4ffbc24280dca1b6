use crate::error::{Error, Result};
use crate::live::DEFAULT_POLL_INTERVAL;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

/// Credentials checked by the edge gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub webhook_secret: String,
    /// `None` means no credentials are configured and the gate rejects
    /// every request.
    pub basic_auth: Option<BasicCredentials>,
    pub bind_addr: SocketAddr,
    /// Where the log table lives. In-memory when unset.
    pub data_dir: Option<PathBuf>,
    pub poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let webhook_secret = get("NOVU_WEBHOOK_SECRET")
            .ok_or_else(|| Error::Config("NOVU_WEBHOOK_SECRET must be set".into()))?;

        let basic_auth = match (get("BASIC_AUTH_USER"), get("BASIC_AUTH_PASS")) {
            (Some(user), Some(pass)) => Some(BasicCredentials { user, pass }),
            _ => None,
        };

        let bind_addr = get("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("invalid BIND_ADDR: {e}")))?;

        let poll_interval = match get("POLL_INTERVAL_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| Error::Config(format!("invalid POLL_INTERVAL_SECS: {raw}")))?,
            None => DEFAULT_POLL_INTERVAL,
        };

        Ok(Self {
            webhook_secret,
            basic_auth,
            bind_addr,
            data_dir: get("DATA_DIR").map(PathBuf::from),
            poll_interval,
        })
    }
}

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;

use tracing::{info, warn};

use crate::utils::error::GatewayError;

/// The source-address allow-list.
///
/// A peer whose address is not in the set is dropped at accept time, before
/// a session is created and before any bytes are exchanged.
pub struct AllowedIps {
    ips: HashSet<IpAddr>,
}

impl AllowedIps {
    /// Loads the allow-list file.
    ///
    /// The format is one IP literal per line; blank lines and lines
    /// starting with `#` are ignored, surrounding whitespace is trimmed.
    /// Unparsable lines are logged and skipped.
    ///
    /// # Errors
    /// Returns `GatewayError::ConfigurationError` when the file cannot be
    /// read — the gateway must not silently run with an empty list.
    pub fn load(path: &Path) -> Result<Self, GatewayError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::ConfigurationError(format!(
                "cannot read allow-list {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut ips = HashSet::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.parse::<IpAddr>() {
                Ok(ip) => {
                    ips.insert(ip);
                }
                Err(e) => {
                    warn!(line, error = %e, "skipping unparsable allow-list entry");
                }
            }
        }

        info!(path = %path.display(), entries = ips.len(), "allow-list loaded");
        Ok(Self { ips })
    }

    /// Builds an allow-list from addresses directly.
    pub fn from_ips(ips: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            ips: ips.into_iter().collect(),
        }
    }

    /// Whether connections from `ip` are accepted.
    pub fn is_allowed(&self, ip: &IpAddr) -> bool {
        self.ips.contains(ip)
    }

    /// Number of allowed addresses.
    pub fn len(&self) -> usize {
        self.ips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }
}

use std::fs;
use std::io;
use std::path::Path;

use super::{ProxyError, ProxyIdentity};

/// Ordered, immutable list of proxies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyPool {
    entries: Vec<ProxyIdentity>,
}

impl ProxyPool {
    pub fn new(entries: Vec<ProxyIdentity>) -> Self {
        Self { entries }
    }

    /// One entry per line; blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, ProxyError> {
        let entries = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(ProxyIdentity::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self, ProxyError> {
        let text = fs::read_to_string(path).map_err(|source| ProxyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Like [`load`](Self::load), but a missing file is an empty pool.
    pub fn load_or_empty(path: &Path) -> Result<Self, ProxyError> {
        match Self::load(path) {
            Err(ProxyError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn entries(&self) -> &[ProxyIdentity] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Known Coinjoin Transactions
//!
//! Outputs created by a completed coinjoin are shared funds: the participant
//! disrupting a round with one may not control the coins that went into it.
//! The prison consults a [`CoinJoinRegistry`] before punishing disruptions.

use anyhow::{Context, Result};
use dashmap::DashSet;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::types::Txid;

/// Answers whether a transaction is a coinjoin this coordinator completed
pub trait CoinJoinRegistry: Send + Sync {
    fn contains(&self, txid: &Txid) -> bool;
}

/// Registry that knows no coinjoins
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCoinJoins;

impl CoinJoinRegistry for NoCoinJoins {
    fn contains(&self, _txid: &Txid) -> bool {
        false
    }
}

/// In-memory set of coinjoin txids, optionally seeded from a text file
/// with one hex txid per line
#[derive(Debug, Default)]
pub struct CoinJoinIdStore {
    ids: DashSet<Txid>,
}

impl CoinJoinIdStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: impl IntoIterator<Item = Txid>) -> Self {
        let store = Self::new();
        for id in ids {
            store.add(id);
        }
        store
    }

    /// Returns `true` if the id was not known before
    pub fn add(&self, txid: Txid) -> bool {
        self.ids.insert(txid)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Parse store contents. Blank lines and `#` comments are skipped,
    /// malformed lines are logged and ignored. Returns how many ids were new.
    pub fn extend_from_str(&self, contents: &str) -> usize {
        let mut added = 0;

        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match line.parse::<Txid>() {
                Ok(txid) => {
                    if self.add(txid) {
                        added += 1;
                    }
                }
                Err(e) => {
                    warn!(line = line_no + 1, "Skipping malformed coinjoin id: {}", e);
                }
            }
        }

        added
    }

    /// Load ids from `path`. A missing file is not an error.
    pub async fn load_file(&self, path: &Path) -> Result<usize> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            debug!(path = %path.display(), "No coinjoin id store on disk");
            return Ok(0);
        }

        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read coinjoin id store {}", path.display()))?;

        let added = self.extend_from_str(&contents);
        info!(
            path = %path.display(),
            added = added,
            total = self.len(),
            "Loaded coinjoin id store"
        );

        Ok(added)
    }
}

impl CoinJoinRegistry for CoinJoinIdStore {
    fn contains(&self, txid: &Txid) -> bool {
        self.ids.contains(txid)
    }
}

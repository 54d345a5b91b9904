//! Shared Types for Coordinator Components
//!
//! Identifiers and amounts passed between the round engine and the prison.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 32-byte transaction identifier, displayed as lowercase hex
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Txid(pub [u8; 32]);

impl Txid {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Random id, used by tests and simulations
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({})", self)
    }
}

impl FromStr for Txid {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim()).with_context(|| format!("Invalid txid hex: {}", s))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| anyhow!("Txid must be 32 bytes, got {}", v.len()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Txid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Txid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Reference to a spendable transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Txid,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Txid, vout: u32) -> Self {
        Self { txid, vout }
    }

    pub fn random() -> Self {
        Self::new(Txid::random(), rand::random::<u32>() % 64)
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl FromStr for OutPoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (txid, vout) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("Outpoint must be formatted as txid:vout, got {}", s))?;
        let vout = vout
            .parse()
            .with_context(|| format!("Invalid outpoint index: {}", vout))?;
        Ok(Self::new(txid.parse()?, vout))
    }
}

/// Identifier of a single coinjoin round
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoundId(pub Txid);

impl RoundId {
    pub fn random() -> Self {
        Self(Txid::random())
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoundId({})", self.0)
    }
}

/// Amount in satoshis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    /// Satoshis per coin
    pub const COIN: u64 = 100_000_000;
    pub const ZERO: Amount = Amount(0);

    pub const fn from_sat(sats: u64) -> Self {
        Self(sats)
    }

    /// Decimal coins, rounded to the nearest satoshi. Negative input clamps to zero.
    pub fn from_btc(btc: f64) -> Self {
        Self((btc * Self::COIN as f64).round().max(0.0) as u64)
    }

    pub const fn to_sat(self) -> u64 {
        self.0
    }

    pub fn to_btc(self) -> f64 {
        self.0 as f64 / Self::COIN as f64
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08} BTC", self.0 / Self::COIN, self.0 % Self::COIN)
    }
}

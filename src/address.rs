use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Lifecycle stage of a realm. Closed vocabulary, spec section 6.6.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Horizon {
    Genesis,
    Emergence,
    Peak,
    Decay,
    Crystallization,
    Archived,
}

impl Horizon {
    const ALL: [Horizon; 6] = [
        Horizon::Genesis,
        Horizon::Emergence,
        Horizon::Peak,
        Horizon::Decay,
        Horizon::Crystallization,
        Horizon::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Horizon::Genesis => "genesis",
            Horizon::Emergence => "emergence",
            Horizon::Peak => "peak",
            Horizon::Decay => "decay",
            Horizon::Crystallization => "crystallization",
            Horizon::Archived => "archived",
        }
    }
}

impl FromStr for Horizon {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Horizon::ALL
            .into_iter()
            .find(|h| h.as_str() == s)
            .ok_or_else(|| AppError::InvalidInput(format!("unknown horizon '{s}'")))
    }
}

/// Seven-dimension realm coordinate (spec section 3.1).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmCoordinate {
    pub realm_id: String,
    pub realm_type: String,
    pub adjacency: String,
    pub resonance: String,
    pub density: u32,
    pub lineage: u32,
    pub horizon: Horizon,
}

impl RealmCoordinate {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.realm_id.is_empty() {
            return Err(AppError::InvalidInput("realm_id must not be empty".into()));
        }
        if self.realm_id.len() > 64 {
            return Err(AppError::InvalidInput("realm_id must be <= 64 bytes".into()));
        }
        if !self.realm_id.is_ascii() {
            return Err(AppError::InvalidInput("realm_id must be ASCII".into()));
        }
        Ok(())
    }

    /// Canonical serialization: lowercased keys in fixed ASCII order, compact JSON.
    /// `BTreeMap<&str, _>` already sorts lexicographically, which for this fixed
    /// key set is ASCII order.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut map: BTreeMap<&'static str, serde_json::Value> = BTreeMap::new();
        map.insert("adjacency", serde_json::Value::String(self.adjacency.clone()));
        map.insert("density", serde_json::Value::from(self.density));
        map.insert("horizon", serde_json::Value::String(self.horizon.as_str().to_string()));
        map.insert("lineage", serde_json::Value::from(self.lineage));
        map.insert("realm_id", serde_json::Value::String(self.realm_id.clone()));
        map.insert("realm_type", serde_json::Value::String(self.realm_type.clone()));
        map.insert("resonance", serde_json::Value::String(self.resonance.clone()));
        serde_json::to_vec(&map).expect("BTreeMap<&str, Value> always serializes")
    }
}

/// A STAT7 canonical address: SHA-256 of a realm coordinate's canonical bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const ZERO: Address = Address([0u8; 32]);

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for byte in self.0 {
            s.push_str(&format!("{byte:02x}"));
        }
        s
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Address {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(AppError::InvalidInput("address must be 64 hex chars".into()));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk).map_err(|_| AppError::InvalidInput("address must be ASCII hex".into()))?;
            bytes[i] = u8::from_str_radix(hex, 16).map_err(|_| AppError::InvalidInput("address must be hex".into()))?;
        }
        Ok(Address(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_str(&s).map_err(|e| D::Error::custom(e.message()))
    }
}

/// `Encode(rc) -> (address, canonical_bytes)`. Pure, deterministic; only fails on
/// field validation (spec section 4.1).
pub fn encode(rc: &RealmCoordinate) -> Result<(Address, Vec<u8>), AppError> {
    rc.validate()?;
    let bytes = rc.canonical_bytes();
    let digest = Sha256::digest(&bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok((Address(out), bytes))
}

pub fn addresses_equal(a: &Address, b: &Address) -> bool {
    a.0 == b.0
}

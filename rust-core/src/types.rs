use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Smallest-unit token quantity.
pub type Balance = u128;

/// Reported index value.
pub type IndexValue = u64;

/// Seconds, injected by the caller.
pub type Timestamp = u64;

/// Basis-point denominator (1 bps = 1/10000).
pub const BPS_DENOMINATOR: u64 = 10_000;

/// 32-byte ledger identity. All-zero is reserved and treated as malformed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId(pub [u8; 32]);

pub const ZERO_ACCOUNT: AccountId = AccountId([0u8; 32]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountIdError {
    #[error("identity must be 32 bytes of hex")]
    BadHex,
    #[error("all-zero identity is reserved")]
    Zero,
}

impl AccountId {
    /// Deterministic identity from a human label (sha256 of the label bytes).
    pub fn from_label(label: &str) -> Self {
        let mut h = Sha256::new();
        h.update(label.as_bytes());
        AccountId(h.finalize().into())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_ACCOUNT.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut out).map_err(|_| AccountIdError::BadHex)?;
        let id = AccountId(out);
        if id.is_zero() {
            return Err(AccountIdError::Zero);
        }
        Ok(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.short())
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// `part * bps / 10000`, floored.
pub fn bps_of(part: Balance, bps: u64) -> Option<Balance> {
    part.checked_mul(Balance::from(bps))
        .map(|v| v / Balance::from(BPS_DENOMINATOR))
}

/// True iff `|a - b| <= reference * bps / 10000`, evaluated without rounding.
pub fn within_bps(a: u128, b: u128, reference: u128, bps: u64) -> bool {
    let diff = a.abs_diff(b);
    match (
        diff.checked_mul(u128::from(BPS_DENOMINATOR)),
        reference.checked_mul(u128::from(bps)),
    ) {
        (Some(lhs), Some(rhs)) => lhs <= rhs,
        // Only reachable for absurd magnitudes; treat as out of band.
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip_and_zero_rejected() {
        let id = AccountId::from_label("alice");
        let parsed: AccountId = id.to_hex().parse().unwrap();
        assert_eq!(parsed, id);

        assert_eq!("zz".parse::<AccountId>(), Err(AccountIdError::BadHex));
        assert_eq!(
            hex::encode([0u8; 32]).parse::<AccountId>(),
            Err(AccountIdError::Zero)
        );
    }

    #[test]
    fn json_uses_hex_strings() {
        let id = AccountId::from_label("bob");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn bps_band_is_inclusive() {
        // 5% of 100 is exactly 5.
        assert!(within_bps(105, 100, 100, 500));
        assert!(!within_bps(106, 100, 100, 500));
        assert_eq!(bps_of(1_000_000, 500), Some(50_000));
    }
}

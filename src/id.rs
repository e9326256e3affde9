//! 20-byte identifiers: info-hashes and DHT node IDs.
//!
//! Both are opaque 20-byte values with the same wire shape (BEP 3 / BEP 5), so they
//! share one newtype macro the way the DHT-shaped reference crates in this space
//! (`rustydht-lib`'s `common::Id`, `krpc_protocol`'s `NodeID`) each define a single
//! hex-printable byte-array wrapper for this purpose.
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::ByteBuf;

macro_rules! byte20_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 20]);

        impl $name {
            #[must_use]
            pub fn random() -> Self {
                let mut bytes = [0u8; 20];
                rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
                Self(bytes)
            }

            #[must_use]
            pub fn as_bytes(&self) -> &[u8; 20] {
                &self.0
            }

            /// Builds an id sharing `prefix_len` leading bytes with `other`, the rest
            /// random. Used by the DHT neighbour-prefix attack (§4.1); callers in that
            /// module always pass a byte count, never a bit count, since BEP 5 node IDs
            /// are byte-aligned.
            #[must_use]
            pub fn with_shared_prefix(other: &Self, prefix_len: usize) -> Self {
                let prefix_len = prefix_len.min(20);
                let mut bytes = [0u8; 20];
                bytes[..prefix_len].copy_from_slice(&other.0[..prefix_len]);
                rand::Rng::fill(&mut rand::thread_rng(), &mut bytes[prefix_len..]);
                Self(bytes)
            }
        }

        impl From<[u8; 20]> for $name {
            fn from(bytes: [u8; 20]) -> Self {
                Self(bytes)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = InvalidLengthError;

            fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
                let array: [u8; 20] = bytes.try_into().map_err(|_| InvalidLengthError { got: bytes.len() })?;
                Ok(Self(array))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = ParseHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = hex::decode(s).map_err(|_| ParseHexError)?;
                Self::try_from(bytes.as_slice()).map_err(|_| ParseHexError)
            }
        }

        // Bencode (and BEP 5's wire format generally) has no array type, so these
        // 20 bytes are encoded as a single byte string, not a 20-element list.
        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serde_bytes::Bytes::new(&self.0).serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let bytes = ByteBuf::deserialize(deserializer)?;
                Self::try_from(bytes.as_slice()).map_err(|e| D::Error::custom(e.to_string()))
            }
        }
    };
}

byte20_id!(InfoHash);
byte20_id!(NodeId);

#[derive(thiserror::Error, Debug)]
#[error("expected 20 bytes, got {got}")]
pub struct InvalidLengthError {
    got: usize,
}

#[derive(thiserror::Error, Debug)]
#[error("not a valid 40-character hex-encoded id")]
pub struct ParseHexError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_hex() {
        let id = InfoHash::random();
        let parsed: InfoHash = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn shared_prefix_matches_requested_length() {
        let base = NodeId::random();
        let spoofed = NodeId::with_shared_prefix(&base, 15);
        assert_eq!(spoofed.0[..15], base.0[..15]);
    }

    #[test]
    fn rejects_wrong_length_hex() {
        assert!("abcd".parse::<InfoHash>().is_err());
    }
}

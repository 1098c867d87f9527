//! Canonical MAC address handling.
//!
//! Devices are keyed by MAC everywhere in the tracker and the store; the
//! canonical form is lowercase, colon-separated (`aa:bb:cc:dd:ee:01`).
//! Parsing accepts the forms DHCP servers and switches actually emit:
//! colon-, dash-, and dot-separated, plus bare hex.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A MAC address in canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr([u8; 6]);

/// Error returned when a MAC address cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid MAC address: {input}")]
pub struct MacParseError {
    /// The rejected input.
    pub input: String,
}

impl MacAddr {
    /// Construct from raw octets.
    #[must_use]
    pub fn from_octets(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// The raw octets.
    #[must_use]
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .collect();
        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MacParseError {
                input: s.to_owned(),
            });
        }
        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            let byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| {
                MacParseError {
                    input: s.to_owned(),
                }
            })?;
            *octet = byte;
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl Serialize for MacAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical() {
        let mac: MacAddr = "aa:bb:cc:dd:ee:01".parse().unwrap();
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:01");
    }

    #[test]
    fn test_parse_uppercase_normalizes() {
        let mac: MacAddr = "AA:BB:CC:DD:EE:01".parse().unwrap();
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:01");
    }

    #[test]
    fn test_parse_dash_and_dot_forms() {
        let dash: MacAddr = "aa-bb-cc-dd-ee-01".parse().unwrap();
        let dot: MacAddr = "aabb.ccdd.ee01".parse().unwrap();
        let bare: MacAddr = "aabbccddee01".parse().unwrap();
        assert_eq!(dash, dot);
        assert_eq!(dot, bare);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-a-mac".parse::<MacAddr>().is_err());
        assert!("aa:bb:cc:dd:ee".parse::<MacAddr>().is_err());
        assert!("aa:bb:cc:dd:ee:01:02".parse::<MacAddr>().is_err());
        assert!("gg:bb:cc:dd:ee:01".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let mac: MacAddr = "aa:bb:cc:dd:ee:01".parse().unwrap();
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"aa:bb:cc:dd:ee:01\"");
        let back: MacAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }
}

use crate::error::{Result, VigilError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const KIB: u64 = 1024;

/// A byte count parsed from either a plain integer or a suffixed string such as `500M`.
///
/// Suffixes are binary multiples: `K` = 1024, `M` = 1024², `G` = 1024³. A trailing
/// `B` is tolerated (`512MB`), and suffixes are case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VigilError::InvalidByteSize("empty value".to_string()));
        }

        let upper = trimmed.to_ascii_uppercase();
        let without_b = match upper.strip_suffix('B') {
            Some(rest) if !rest.is_empty() => rest,
            _ => upper.as_str(),
        };

        let (digits, multiplier) = match without_b.chars().last() {
            Some('K') => (&without_b[..without_b.len() - 1], KIB),
            Some('M') => (&without_b[..without_b.len() - 1], KIB * KIB),
            Some('G') => (&without_b[..without_b.len() - 1], KIB * KIB * KIB),
            _ => (without_b, 1),
        };

        let value: u64 = digits.trim().parse().map_err(|_| {
            VigilError::InvalidByteSize(format!("'{}' is not a byte size", input))
        })?;

        value
            .checked_mul(multiplier)
            .map(ByteSize)
            .ok_or_else(|| VigilError::InvalidByteSize(format!("'{}' overflows", input)))
    }
}

impl FromStr for ByteSize {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if bytes >= KIB * KIB * KIB && bytes % (KIB * KIB * KIB) == 0 {
            write!(f, "{}G", bytes / (KIB * KIB * KIB))
        } else if bytes >= KIB * KIB && bytes % (KIB * KIB) == 0 {
            write!(f, "{}M", bytes / (KIB * KIB))
        } else if bytes >= KIB && bytes % KIB == 0 {
            write!(f, "{}K", bytes / KIB)
        } else {
            write!(f, "{}", bytes)
        }
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(ByteSize(n)),
            Raw::Text(s) => ByteSize::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_bytes() {
        assert_eq!(ByteSize::parse("1024").unwrap(), ByteSize(1024));
    }

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(ByteSize::parse("512K").unwrap(), ByteSize(512 * 1024));
        assert_eq!(ByteSize::parse("500M").unwrap(), ByteSize(500 * 1024 * 1024));
        assert_eq!(ByteSize::parse("2G").unwrap(), ByteSize(2 * 1024 * 1024 * 1024));
        assert_eq!(ByteSize::parse("64mb").unwrap(), ByteSize(64 * 1024 * 1024));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ByteSize::parse("").is_err());
        assert!(ByteSize::parse("lots").is_err());
        assert!(ByteSize::parse("12T").is_err());
        assert!(ByteSize::parse("-5M").is_err());
    }

    #[test]
    fn test_display_picks_largest_exact_unit() {
        assert_eq!(ByteSize(500 * 1024 * 1024).to_string(), "500M");
        assert_eq!(ByteSize(1536).to_string(), "1536");
        assert_eq!(ByteSize(3 * 1024).to_string(), "3K");
    }

    #[test]
    fn test_deserialize_number_or_string() {
        let from_num: ByteSize = serde_json::from_str("2048").unwrap();
        let from_str: ByteSize = serde_json::from_str("\"2K\"").unwrap();
        assert_eq!(from_num, from_str);
    }
}

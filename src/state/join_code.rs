//! Six-digit PINs players type to find a session.

use std::{fmt::Display, str::FromStr};

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Smallest code handed out.
const MIN_VALUE: u32 = 100_000;
/// Largest code handed out.
const MAX_VALUE: u32 = 999_999;

/// A session PIN in `[100000, 999999]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JoinCode(u32);

/// Error returned for strings that are not a valid PIN.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("join code must be six digits between {MIN_VALUE} and {MAX_VALUE}")]
pub struct InvalidJoinCode;

impl JoinCode {
    /// Draw a random code. Uniqueness is checked by the caller against the store.
    pub fn random() -> Self {
        Self(rand::rng().random_range(MIN_VALUE..=MAX_VALUE))
    }
}

impl Display for JoinCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

impl FromStr for JoinCode {
    type Err = InvalidJoinCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() != 6 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidJoinCode);
        }
        let value: u32 = trimmed.parse().map_err(|_| InvalidJoinCode)?;
        if !(MIN_VALUE..=MAX_VALUE).contains(&value) {
            return Err(InvalidJoinCode);
        }
        Ok(Self(value))
    }
}

impl Serialize for JoinCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for JoinCode {
    fn deserialize<D>(deserializer: D) -> Result<JoinCode, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        JoinCode::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_codes_stay_in_range() {
        for _ in 0..1_000 {
            let code = JoinCode::random();
            assert!((MIN_VALUE..=MAX_VALUE).contains(&code.0));
            assert_eq!(code.to_string().len(), 6);
        }
    }

    #[test]
    fn parsing_rejects_malformed_codes() {
        assert_eq!("123456".parse::<JoinCode>().unwrap().to_string(), "123456");
        assert_eq!(" 654321 ".parse::<JoinCode>().unwrap().to_string(), "654321");
        assert!("012345".parse::<JoinCode>().is_err());
        assert!("12345".parse::<JoinCode>().is_err());
        assert!("12a456".parse::<JoinCode>().is_err());
        assert!("+12345".parse::<JoinCode>().is_err());
    }

    #[test]
    fn serde_uses_string_form() {
        let code: JoinCode = serde_json::from_str("\"424242\"").unwrap();
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"424242\"");
    }
}

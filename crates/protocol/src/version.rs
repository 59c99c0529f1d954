//! Server version parsing and protocol variant selection

use crate::error::{ProtocolError, Result};
use crate::variant::ProtocolVariant;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Server software version (major.minor.patch)
///
/// Ordering is lexicographic over (major, minor, patch), which is what the
/// selection table relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl ServerVersion {
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ServerVersion {
    type Err = ProtocolError;

    /// Parses bare versions ("1.2.3") as well as server build strings such as
    /// "a121-v1.2.3-rc4" or "v1.2". Anything after the numeric part is ignored.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ProtocolError::InvalidVersion(s.to_string());

        let start = s
            .char_indices()
            .rev()
            .find(|&(i, c)| {
                c == 'v' && s[i + 1..].chars().next().is_some_and(|n| n.is_ascii_digit())
            })
            .map(|(i, _)| i + 1)
            .or_else(|| s.chars().next().filter(char::is_ascii_digit).map(|_| 0))
            .ok_or_else(invalid)?;

        let numeric: &str = {
            let rest = &s[start..];
            let end = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(rest.len());
            rest[..end].trim_end_matches('.')
        };

        let mut parts = numeric.split('.').map(|p| p.parse::<u16>());
        let major = parts.next().and_then(|p| p.ok()).ok_or_else(invalid)?;
        let minor = parts.next().and_then(|p| p.ok()).ok_or_else(invalid)?;
        let patch = match parts.next() {
            Some(p) => p.map_err(|_| invalid())?,
            None => 0,
        };

        Ok(Self::new(major, minor, patch))
    }
}

/// Newest version that is still rejected outright; everything at or below
/// it fails selection
pub const OLDEST_UNSUPPORTED: ServerVersion = ServerVersion::new(0, 2, 0);

/// Ordered selection table: the first row whose bound is strictly greater
/// than the negotiated version wins. Servers at or above the last bound
/// speak the current protocol.
pub const PROTOCOL_TABLE: &[(ServerVersion, ProtocolVariant)] = &[
    (ServerVersion::new(0, 4, 3), ProtocolVariant::NoCalibrationReuse),
    (ServerVersion::new(1, 1, 0), ProtocolVariant::No5_2MhzPrf),
];

/// Pick the most restrictive protocol variant compatible with `version`
pub fn select_protocol(version: ServerVersion) -> Result<ProtocolVariant> {
    if version <= OLDEST_UNSUPPORTED {
        return Err(ProtocolError::UnsupportedServer {
            version,
            newest_unsupported: OLDEST_UNSUPPORTED,
        });
    }

    let variant = PROTOCOL_TABLE
        .iter()
        .find(|(bound, _)| version < *bound)
        .map(|(_, variant)| *variant)
        .unwrap_or(ProtocolVariant::Current);

    tracing::debug!("Server version {} uses protocol {:?}", version, variant);
    Ok(variant)
}

/// Parse a server version string and select its protocol variant
pub fn select_protocol_for(version: &str) -> Result<ProtocolVariant> {
    select_protocol(version.parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_version() {
        let v: ServerVersion = "1.2.3".parse().unwrap();
        assert_eq!(v, ServerVersion::new(1, 2, 3));
    }

    #[test]
    fn test_parse_build_string() {
        let v: ServerVersion = "a121-v1.5.0-rc4".parse().unwrap();
        assert_eq!(v, ServerVersion::new(1, 5, 0));

        let v: ServerVersion = "v0.4".parse().unwrap();
        assert_eq!(v, ServerVersion::new(0, 4, 0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("server".parse::<ServerVersion>().is_err());
        assert!("v".parse::<ServerVersion>().is_err());
        assert!("".parse::<ServerVersion>().is_err());
    }

    #[test]
    fn test_version_ordering() {
        assert!(ServerVersion::new(0, 4, 3) > ServerVersion::new(0, 4, 2));
        assert!(ServerVersion::new(1, 0, 0) > ServerVersion::new(0, 99, 99));
    }

    #[test]
    fn test_selection_table_is_ordered() {
        for pair in PROTOCOL_TABLE.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
        assert!(OLDEST_UNSUPPORTED < PROTOCOL_TABLE[0].0);
    }
}

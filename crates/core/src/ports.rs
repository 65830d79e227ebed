//! Public port specifications
//!
//! A port specification is a comma-separated list of single ports and
//! inclusive `start-end` ranges, e.g. `"80,443,8000-8010"`. The input text
//! is kept verbatim so stored rules stay human-readable; the parsed tokens are
//! used for conflict checks and for rendering nftables sets.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{CoreError, Result};

/// One comma-separated element of a port specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortToken {
    /// A single port
    Single(u16),
    /// An inclusive range, `start < end`
    Range { start: u16, end: u16 },
}

impl PortToken {
    /// Iterate over every port covered by this token
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        let (start, end) = match *self {
            Self::Single(port) => (port, port),
            Self::Range { start, end } => (start, end),
        };
        start..=end
    }
}

impl fmt::Display for PortToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(port) => write!(f, "{}", port),
            Self::Range { start, end } => write!(f, "{}-{}", start, end),
        }
    }
}

/// Parsed port specification, remembering the text it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortSpec {
    raw: String,
    tokens: Vec<PortToken>,
}

impl PortSpec {
    /// Parse a comma-separated specification.
    ///
    /// Fails when the input is empty, when a token is neither an integer nor a
    /// two-sided range, when a range has `start >= end`, or when any value is
    /// outside `1..=65535`.
    pub fn parse(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Err(CoreError::InvalidPortSpec(
                "empty port specification".to_string(),
            ));
        }

        let tokens = input
            .split(',')
            .map(parse_token)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw: input.to_string(),
            tokens,
        })
    }

    /// The specification exactly as supplied
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parsed tokens in input order
    pub fn tokens(&self) -> &[PortToken] {
        &self.tokens
    }

    /// Every individual port, ranges expanded
    pub fn expand(&self) -> BTreeSet<u16> {
        self.tokens.iter().flat_map(PortToken::ports).collect()
    }

    /// Ports present in both specifications, ascending
    pub fn overlap(&self, other: &PortSpec) -> Vec<u16> {
        let ours = self.expand();
        other
            .expand()
            .into_iter()
            .filter(|port| ours.contains(port))
            .collect()
    }

    /// Render as an nftables anonymous set, e.g. `{ 8000-8002, 9000 }`.
    ///
    /// Elements are the merged intervals of [`PortSpec::expand`], so repeated
    /// or overlapping tokens never produce overlapping set elements.
    pub fn to_nft_set(&self) -> String {
        let mut elements = Vec::new();
        let mut ports = self.expand().into_iter();
        if let Some(first) = ports.next() {
            let (mut start, mut end) = (first, first);
            for port in ports {
                if port == end + 1 {
                    end = port;
                } else {
                    elements.push(interval(start, end));
                    start = port;
                    end = port;
                }
            }
            elements.push(interval(start, end));
        }
        format!("{{ {} }}", elements.join(", "))
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for PortSpec {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PortSpec {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PortSpec> for String {
    fn from(spec: PortSpec) -> Self {
        spec.raw
    }
}

/// Parse a single port in `1..=65535`
pub fn parse_port(input: &str) -> Result<u16> {
    let trimmed = input.trim();
    let value: u32 = trimmed
        .parse()
        .map_err(|_| CoreError::InvalidPort(format!("'{}' is not a number", trimmed)))?;
    port_in_range(value).ok_or_else(|| {
        CoreError::InvalidPort(format!("{} is outside 1-65535", value))
    })
}

fn interval(start: u16, end: u16) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}-{}", start, end)
    }
}

fn port_in_range(value: u32) -> Option<u16> {
    u16::try_from(value).ok().filter(|port| *port != 0)
}

fn parse_token(token: &str) -> Result<PortToken> {
    let token = token.trim();
    let invalid = |reason: &str| CoreError::InvalidPortSpec(format!("'{}': {}", token, reason));

    if token.is_empty() {
        return Err(invalid("empty token"));
    }

    match token.split_once('-') {
        Some((start, end)) => {
            let start = parse_bound(start).ok_or_else(|| invalid("range bounds must be integers"))?;
            let end = parse_bound(end).ok_or_else(|| invalid("range bounds must be integers"))?;
            let (Some(start), Some(end)) = (port_in_range(start), port_in_range(end)) else {
                return Err(invalid("ports must be between 1 and 65535"));
            };
            if start >= end {
                return Err(invalid("range start must be below range end"));
            }
            Ok(PortToken::Range { start, end })
        }
        None => {
            let value = parse_bound(token).ok_or_else(|| invalid("not an integer"))?;
            port_in_range(value)
                .map(PortToken::Single)
                .ok_or_else(|| invalid("ports must be between 1 and 65535"))
        }
    }
}

fn parse_bound(text: &str) -> Option<u32> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_port() {
        let spec = PortSpec::parse("9000").unwrap();
        assert_eq!(spec.tokens(), &[PortToken::Single(9000)]);
        assert_eq!(spec.as_str(), "9000");
    }

    #[test]
    fn test_parse_mixed_spec_keeps_raw_text() {
        let spec = PortSpec::parse("80, 443,8000-8002").unwrap();
        assert_eq!(spec.as_str(), "80, 443,8000-8002");
        assert_eq!(
            spec.tokens(),
            &[
                PortToken::Single(80),
                PortToken::Single(443),
                PortToken::Range { start: 8000, end: 8002 },
            ]
        );
    }

    #[test]
    fn test_expand_ranges() {
        let spec = PortSpec::parse("8000-8002,9000,8001").unwrap();
        let ports: Vec<u16> = spec.expand().into_iter().collect();
        assert_eq!(ports, vec![8000, 8001, 8002, 9000]);
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(PortSpec::parse("").is_err());
        assert!(PortSpec::parse("   ").is_err());
        assert!(PortSpec::parse("80,,90").is_err());
        assert!(PortSpec::parse("80,").is_err());
    }

    #[test]
    fn test_parse_rejects_non_integers() {
        assert!(PortSpec::parse("http").is_err());
        assert!(PortSpec::parse("80a").is_err());
        assert!(PortSpec::parse("+80").is_err());
        assert!(PortSpec::parse("1.5").is_err());
    }

    #[test]
    fn test_parse_rejects_one_sided_ranges() {
        assert!(PortSpec::parse("-80").is_err());
        assert!(PortSpec::parse("80-").is_err());
        assert!(PortSpec::parse("80-90-100").is_err());
    }

    #[test]
    fn test_parse_rejects_inverted_or_degenerate_range() {
        assert!(PortSpec::parse("9000-8000").is_err());
        assert!(PortSpec::parse("8000-8000").is_err());
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        assert!(PortSpec::parse("0").is_err());
        assert!(PortSpec::parse("65536").is_err());
        assert!(PortSpec::parse("0-10").is_err());
        assert!(PortSpec::parse("65000-70000").is_err());
        assert!(PortSpec::parse("99999999999").is_err());
        assert!(PortSpec::parse("65535").is_ok());
    }

    #[test]
    fn test_overlap() {
        let a = PortSpec::parse("8000-8005").unwrap();
        let b = PortSpec::parse("8004,8010,8003").unwrap();
        assert_eq!(a.overlap(&b), vec![8003, 8004]);
        assert!(a.overlap(&PortSpec::parse("9000").unwrap()).is_empty());
    }

    #[test]
    fn test_nft_set_rendering() {
        let spec = PortSpec::parse("8000-8002, 9000").unwrap();
        assert_eq!(spec.to_nft_set(), "{ 8000-8002, 9000 }");
    }

    #[test]
    fn test_nft_set_merges_overlaps() {
        let render = |input: &str| PortSpec::parse(input).unwrap().to_nft_set();
        assert_eq!(render("8000-8002,8001"), "{ 8000-8002 }");
        assert_eq!(render("80,80"), "{ 80 }");
        assert_eq!(render("9000,80,81-83"), "{ 80-83, 9000 }");
        assert_eq!(render("65534-65535,1"), "{ 1, 65534-65535 }");
    }

    #[test]
    fn test_serde_as_string() {
        let spec = PortSpec::parse("80,8000-8002").unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, "\"80,8000-8002\"");

        let parsed: PortSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, spec);

        assert!(serde_json::from_str::<PortSpec>("\"80-\"").is_err());
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("9000").unwrap(), 9000);
        assert_eq!(parse_port(" 22 ").unwrap(), 22);
        assert!(parse_port("0").is_err());
        assert!(parse_port("70000").is_err());
        assert!(parse_port("ssh").is_err());
    }
}

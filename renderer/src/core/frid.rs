//! Functional requirement identifiers.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{Result, anyhow, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

static FRID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+(\.\d+)*$").unwrap());

/// Dotted position of a functional requirement in the specification outline.
///
/// Ordering is component-wise, which matches depth-first document order
/// (`2 < 2.1 < 2.1.3 < 3`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Frid(Vec<u32>);

impl Frid {
    pub fn from_parts(parts: Vec<u32>) -> Result<Self> {
        if parts.is_empty() || parts.contains(&0) {
            bail!("invalid FRID components {parts:?}");
        }
        Ok(Self(parts))
    }

    pub fn parts(&self) -> &[u32] {
        &self.0
    }
}

impl FromStr for Frid {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if !FRID_RE.is_match(trimmed) {
            bail!("invalid FRID '{s}': expected dotted positive integers like 1 or 2.1");
        }
        let parts = trimmed
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|err| anyhow!("invalid FRID '{s}': {err}"))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_parts(parts).map_err(|_| anyhow!("invalid FRID '{s}': components start at 1"))
    }
}

impl TryFrom<String> for Frid {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Frid> for String {
    fn from(value: Frid) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Frid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
            first = false;
        }
        Ok(())
    }
}

/// Inclusive range of FRIDs to render. An absent end renders to the last FRID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FridRange {
    pub start: Frid,
    pub end: Option<Frid>,
}

impl FridRange {
    /// Open-ended range used by `--render-from`.
    pub fn from_start(start: Frid) -> Self {
        Self { start, end: None }
    }

    pub fn contains_end(&self, frid: &Frid) -> bool {
        self.end.as_ref().is_none_or(|end| frid <= end)
    }
}

impl FromStr for FridRange {
    type Err = anyhow::Error;

    /// Parses `A` or `A,B`.
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(',') {
            Some((start, end)) => {
                let start: Frid = start.parse()?;
                let end: Frid = end.parse()?;
                if end < start {
                    bail!("invalid render range '{s}': end {end} precedes start {start}");
                }
                Ok(Self {
                    start,
                    end: Some(end),
                })
            }
            None => Ok(Self {
                start: s.parse()?,
                end: Some(s.parse()?),
            }),
        }
    }
}

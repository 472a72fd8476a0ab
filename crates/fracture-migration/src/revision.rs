//! Revision identifiers and revision arguments.
//!
//! Fractured tracking only understands timestamp-shaped revisions
//! (`YYYYMMDDHHMMSS`). Anything else is a legacy id that belongs to the old
//! single-chain history.

use chrono::{Datelike, NaiveDateTime, TimeDelta, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// `strftime` layout of a timestamp revision.
pub const REVISION_FORMAT: &str = "%Y%m%d%H%M%S";

const REVISION_LEN: usize = 14;

/// A timestamp-shaped revision id.
///
/// Ordering follows the integer value of the id, which is also the
/// chronological order of the embedded timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RevisionId(NaiveDateTime);

impl RevisionId {
    /// Parses a revision id, returning `None` for legacy ids.
    pub fn parse(revision: &str) -> Option<Self> {
        if revision.len() != REVISION_LEN || !revision.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        NaiveDateTime::parse_from_str(revision, REVISION_FORMAT)
            .ok()
            .map(Self)
    }

    /// Builds a revision id from a timestamp, dropping sub-second precision.
    pub fn from_datetime(datetime: NaiveDateTime) -> Self {
        Self(datetime.with_nanosecond(0).unwrap_or(datetime))
    }

    /// A fresh revision id for the current UTC time.
    pub fn generate() -> Self {
        Self::from_datetime(Utc::now().naive_utc())
    }

    /// The timestamp embedded in the id.
    pub fn datetime(&self) -> NaiveDateTime {
        self.0
    }

    /// Integer form, as stored in the ledger's `version_num` column.
    pub fn as_i64(&self) -> i64 {
        let dt = self.0;
        i64::from(dt.year()) * 10_000_000_000
            + i64::from(dt.month()) * 100_000_000
            + i64::from(dt.day()) * 1_000_000
            + i64::from(dt.hour()) * 10_000
            + i64::from(dt.minute()) * 100
            + i64::from(dt.second())
    }

    /// The revision `days` days earlier, or `None` on calendar overflow.
    pub fn days_before(&self, days: i64) -> Option<Self> {
        let delta = TimeDelta::try_days(days)?;
        self.0.checked_sub_signed(delta).map(Self)
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(REVISION_FORMAT))
    }
}

/// Returns `true` if `revision` is a timestamp-shaped id.
pub fn is_timestamp(revision: &str) -> bool {
    RevisionId::parse(revision).is_some()
}

/// Integer value of a revision id, if it has one.
///
/// Legacy ids made only of digits (e.g. `0001`) also have an integer value.
pub fn version_num(revision: &str) -> Option<i64> {
    revision.parse().ok()
}

/// `true` when `a` sorts after `b`, numerically when both are integers.
pub(crate) fn revision_gt(a: &str, b: &str) -> bool {
    match (version_num(a), version_num(b)) {
        (Some(a), Some(b)) => a > b,
        _ => a > b,
    }
}

/// Destination of an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeTarget {
    /// Everything that is missing.
    Head,
    /// Nothing newer than this revision.
    Revision(i64),
}

impl FromStr for UpgradeTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "head" {
            return Ok(Self::Head);
        }

        s.parse()
            .map(Self::Revision)
            .map_err(|_| Error::InvalidRevisionArgument(s.to_string()))
    }
}

impl fmt::Display for UpgradeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Head => f.write_str("head"),
            Self::Revision(rev) => write!(f, "{rev}"),
        }
    }
}

/// Destination of a downgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DowngradeTarget {
    /// `-N`: the N most recent ledger entries.
    Steps(u32),
    /// Every ledger entry newer than this revision.
    Revision(i64),
    /// Every ledger entry.
    Base,
}

impl FromStr for DowngradeTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "base" {
            return Ok(Self::Base);
        }

        let invalid = || Error::InvalidRevisionArgument(s.to_string());

        if let Some(steps) = s.strip_prefix('-') {
            return steps.parse().map(Self::Steps).map_err(|_| invalid());
        }

        s.parse().map(Self::Revision).map_err(|_| invalid())
    }
}

impl fmt::Display for DowngradeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Steps(n) => write!(f, "-{n}"),
            Self::Revision(rev) => write!(f, "{rev}"),
            Self::Base => f.write_str("base"),
        }
    }
}

/// A revision argument, optionally carrying a `start:` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRange {
    pub start: Option<String>,
    pub destination: String,
}

impl RevisionRange {
    /// Splits `start:dest`. Ranges are only accepted when rendering SQL.
    pub fn parse(arg: &str, as_sql: bool) -> Result<Self> {
        match arg.split_once(':') {
            Some((start, destination)) => {
                if !as_sql {
                    return Err(Error::RangeNotAllowed);
                }
                Ok(Self {
                    start: Some(start.to_string()).filter(|s| !s.is_empty()),
                    destination: destination.to_string(),
                })
            }
            None => Ok(Self {
                start: None,
                destination: arg.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("20240101000000" => true; "midnight")]
    #[test_case("20241231235959" => true; "end of year")]
    #[test_case("abc123" => false; "legacy hex")]
    #[test_case("0001" => false; "numbered legacy")]
    #[test_case("20241301000000" => false; "month 13")]
    #[test_case("2024010100000" => false; "thirteen digits")]
    #[test_case("202401010000000" => false; "fifteen digits")]
    #[test_case("+2024010100000" => false; "sign prefix")]
    fn timestamp_shape(revision: &str) -> bool {
        is_timestamp(revision)
    }

    #[test]
    fn test_revision_integer_value() {
        let rev = RevisionId::parse("20240810131949").unwrap();
        assert_eq!(rev.as_i64(), 20_240_810_131_949);
        assert_eq!(rev.to_string(), "20240810131949");
    }

    #[test]
    fn test_ordering_matches_integer_value() {
        let a = RevisionId::parse("20240101000000").unwrap();
        let b = RevisionId::parse("20240102000000").unwrap();
        assert!(a < b);
        assert!(a.as_i64() < b.as_i64());
    }

    #[test]
    fn test_days_before() {
        let rev = RevisionId::parse("20240301120000").unwrap();
        let cutoff = rev.days_before(30).unwrap();
        assert_eq!(cutoff.to_string(), "20240131120000");
    }

    #[test]
    fn test_generate_is_timestamp_shaped() {
        let rev = RevisionId::generate();
        assert!(is_timestamp(&rev.to_string()));
    }

    #[test]
    fn test_upgrade_target_parsing() {
        assert_eq!("head".parse::<UpgradeTarget>().unwrap(), UpgradeTarget::Head);
        assert_eq!(
            "20240101000000".parse::<UpgradeTarget>().unwrap(),
            UpgradeTarget::Revision(20_240_101_000_000)
        );
        assert!(matches!(
            "abc123".parse::<UpgradeTarget>(),
            Err(Error::InvalidRevisionArgument(_))
        ));
    }

    #[test]
    fn test_downgrade_target_parsing() {
        assert_eq!("-1".parse::<DowngradeTarget>().unwrap(), DowngradeTarget::Steps(1));
        assert_eq!("base".parse::<DowngradeTarget>().unwrap(), DowngradeTarget::Base);
        assert_eq!(
            "20240101000000".parse::<DowngradeTarget>().unwrap(),
            DowngradeTarget::Revision(20_240_101_000_000)
        );
        assert!("-x".parse::<DowngradeTarget>().is_err());
    }

    #[test]
    fn test_range_requires_sql() {
        assert!(matches!(
            RevisionRange::parse("20240101000000:head", false),
            Err(Error::RangeNotAllowed)
        ));

        let range = RevisionRange::parse("20240101000000:head", true).unwrap();
        assert_eq!(range.start.as_deref(), Some("20240101000000"));
        assert_eq!(range.destination, "head");

        let plain = RevisionRange::parse("head", false).unwrap();
        assert_eq!(plain.start, None);
    }

    #[test]
    fn test_revision_gt_numeric() {
        assert!(revision_gt("20240102000000", "20240101000000"));
        assert!(!revision_gt("9", "10"));
        assert!(revision_gt("10", "9"));
        assert!(revision_gt("def456", "abc123"));
    }
}

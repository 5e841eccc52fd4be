//! Version-check cadence and dotted-numeric comparison.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Result of comparing a remote version against the installed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrdering {
    Newer,
    SameOrOlder,
}

/// A version string that is not dotted-numeric.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed version string '{0}'")]
pub struct MalformedVersion(pub String);

/// Parse `"1.2.0"` into `[1, 2, 0]`. A leading `v` is accepted.
pub fn parse_version(raw: &str) -> Result<Vec<u64>, MalformedVersion> {
    let trimmed = raw.trim();
    let body = trimmed.strip_prefix('v').unwrap_or(trimmed);
    if body.is_empty() {
        return Err(MalformedVersion(raw.to_string()));
    }
    body.split('.')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(MalformedVersion(raw.to_string()));
            }
            part.parse::<u64>()
                .map_err(|_| MalformedVersion(raw.to_string()))
        })
        .collect()
}

fn cmp_parts(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        // Missing components count as zero, so 1.2 == 1.2.0.
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Decides when the remote version is consulted.
#[derive(Debug, Clone, Copy)]
pub struct VersionPoller {
    interval: Duration,
}

impl VersionPoller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Whether a check is due. A check that was never made is always due; a
    /// last check in the future is not.
    pub fn should_check(&self, last_check: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(last) = last_check else {
            return true;
        };
        match (now - last).to_std() {
            Ok(elapsed) => elapsed >= self.interval,
            Err(_) => false,
        }
    }

    /// Compare `remote` against `installed`. Malformed input on either side
    /// is never newer.
    pub fn compare(remote: &str, installed: &str) -> VersionOrdering {
        let (remote, installed) = match (parse_version(remote), parse_version(installed)) {
            (Ok(r), Ok(i)) => (r, i),
            (Err(e), _) | (_, Err(e)) => {
                tracing::debug!(error = %e, "Treating malformed version as not newer");
                return VersionOrdering::SameOrOlder;
            }
        };
        if cmp_parts(&remote, &installed) == Ordering::Greater {
            VersionOrdering::Newer
        } else {
            VersionOrdering::SameOrOlder
        }
    }

    /// Whether `remote` is the same as or newer than `installed`. Malformed
    /// input on either side never qualifies.
    pub fn at_least(remote: &str, installed: &str) -> bool {
        match (parse_version(remote), parse_version(installed)) {
            (Ok(r), Ok(i)) => cmp_parts(&r, &i) != Ordering::Less,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_compare_dotted_numeric() {
        assert_eq!(
            VersionPoller::compare("1.2.0", "1.1.9"),
            VersionOrdering::Newer
        );
        assert_eq!(
            VersionPoller::compare("1.10.0", "1.9.9"),
            VersionOrdering::Newer
        );
        assert_eq!(
            VersionPoller::compare("1.0.0", "1.0.1"),
            VersionOrdering::SameOrOlder
        );
        assert_eq!(
            VersionPoller::compare("1.0.1", "1.0.1"),
            VersionOrdering::SameOrOlder
        );
    }

    #[test]
    fn test_compare_pads_missing_parts() {
        assert_eq!(
            VersionPoller::compare("1.2", "1.2.0"),
            VersionOrdering::SameOrOlder
        );
        assert_eq!(
            VersionPoller::compare("1.2.0.1", "1.2"),
            VersionOrdering::Newer
        );
        assert_eq!(VersionPoller::compare("v2", "1.9"), VersionOrdering::Newer);
    }

    #[test]
    fn test_malformed_is_never_newer() {
        assert_eq!(
            VersionPoller::compare("banana", "1.0.0"),
            VersionOrdering::SameOrOlder
        );
        assert_eq!(
            VersionPoller::compare("2.0.0", "1.x"),
            VersionOrdering::SameOrOlder
        );
        assert_eq!(
            VersionPoller::compare("2..0", "1.0"),
            VersionOrdering::SameOrOlder
        );
        assert!(parse_version("").is_err());
        assert!(parse_version("1.-2").is_err());
    }

    #[test]
    fn test_at_least_accepts_equal_versions() {
        assert!(VersionPoller::at_least("1.0.0", "1.0.0"));
        assert!(VersionPoller::at_least("1.0", "1.0.0"));
        assert!(VersionPoller::at_least("1.1.0", "1.0.0"));
        assert!(!VersionPoller::at_least("0.9.9", "1.0.0"));
        assert!(!VersionPoller::at_least("banana", "1.0.0"));
    }

    #[test]
    fn test_should_check_gating() {
        let poller = VersionPoller::new(Duration::from_secs(24 * 3600));
        let now = at(1_700_100_000);

        assert!(poller.should_check(None, now));
        assert!(!poller.should_check(Some(now - chrono::Duration::hours(10)), now));
        assert!(poller.should_check(Some(now - chrono::Duration::hours(24)), now));
        assert!(poller.should_check(Some(now - chrono::Duration::days(3)), now));
    }

    #[test]
    fn test_future_last_check_is_not_due() {
        let poller = VersionPoller::new(Duration::from_secs(24 * 3600));
        let now = at(1_700_000_000);
        assert!(!poller.should_check(Some(now + chrono::Duration::hours(1)), now));
    }
}

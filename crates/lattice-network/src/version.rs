//! Release version comparison
//!
//! Release versions are semantic versions that frequently carry
//! date-stamped pre-release suffixes (`4.14.0-0.nightly-2023-06-07-040000`).
//! Parsing is tolerant: a leading `v` is ignored, `major.minor` is read as
//! `major.minor.0`, and malformed suffixes are sanitized instead of
//! rejecting the whole version. Build metadata never affects ordering.

use std::cmp::Ordering;

use semver::{BuildMetadata, Prerelease, Version};
use thiserror::Error;
use tracing::warn;

/// Error returned when a version string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version {input:?}: {reason}")]
pub struct VersionError {
    /// The rejected input
    pub input: String,
    /// Why it was rejected
    pub reason: String,
}

impl VersionError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Direction of a version transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionChange {
    /// Both sides denote the same version
    Same,
    /// `to` is newer than `from`
    Upgrade,
    /// `to` is older than `from`
    Downgrade,
    /// At least one side could not be parsed
    Unknown,
}

impl VersionChange {
    /// The classification of the reverse transition
    pub fn inverse(self) -> Self {
        match self {
            Self::Upgrade => Self::Downgrade,
            Self::Downgrade => Self::Upgrade,
            other => other,
        }
    }
}

/// Parse a release version tolerantly
pub fn parse_version(input: &str) -> Result<Version, VersionError> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

    if let Ok(mut version) = Version::parse(trimmed) {
        version.build = BuildMetadata::EMPTY;
        return Ok(version);
    }

    let without_build = trimmed.split_once('+').map_or(trimmed, |(v, _)| v);
    let (core, suffix) = match without_build.split_once('-') {
        Some((core, suffix)) => (core, Some(suffix)),
        None => (without_build, None),
    };

    let numbers = core
        .split('.')
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| VersionError::new(input, format!("{part:?} is not a number")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (major, minor, patch) = match numbers.as_slice() {
        [major, minor] => (*major, *minor, 0),
        [major, minor, patch] => (*major, *minor, *patch),
        _ => {
            return Err(VersionError::new(
                input,
                "expected major.minor or major.minor.patch",
            ))
        }
    };

    let mut version = Version::new(major, minor, patch);
    if let Some(suffix) = suffix {
        version.pre = Prerelease::new(suffix)
            .or_else(|_| Prerelease::new(&sanitize_prerelease(suffix)))
            .map_err(|e| VersionError::new(input, e.to_string()))?;
    }
    Ok(version)
}

/// Rewrite pre-release identifiers that strict semver rejects
/// (leading zeros on numeric identifiers, empty identifiers, stray characters)
fn sanitize_prerelease(suffix: &str) -> String {
    suffix
        .split('.')
        .map(|ident| {
            let cleaned: String = ident
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
                .collect();
            if cleaned.is_empty() {
                "0".to_string()
            } else if cleaned.len() > 1
                && cleaned.starts_with('0')
                && cleaned.chars().all(|c| c.is_ascii_digit())
            {
                format!("n{cleaned}")
            } else {
                cleaned
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch)
        .cmp(&(b.major, b.minor, b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

/// Classify the transition from one version string to another.
///
/// Identical strings are `Same` without parsing; a parse failure on either
/// side is `Unknown`, never an error.
pub fn compare(from: &str, to: &str) -> VersionChange {
    if from == to {
        return VersionChange::Same;
    }

    let (Ok(from_version), Ok(to_version)) = (parse_version(from), parse_version(to)) else {
        return VersionChange::Unknown;
    };

    match precedence(&from_version, &to_version) {
        Ordering::Less => VersionChange::Upgrade,
        Ordering::Greater => VersionChange::Downgrade,
        Ordering::Equal => VersionChange::Same,
    }
}

/// Whether `version`'s major.minor is at or above `major.minor`
pub fn check_at_least(version: &str, major: u64, minor: u64) -> Result<bool, VersionError> {
    let parsed = parse_version(version)?;
    Ok((parsed.major, parsed.minor) >= (major, minor))
}

/// Whether `version`'s major.minor is at or below `major.minor`
pub fn check_at_most(version: &str, major: u64, minor: u64) -> Result<bool, VersionError> {
    let parsed = parse_version(version)?;
    Ok((parsed.major, parsed.minor) <= (major, minor))
}

/// Fail-closed floor check: an unparseable version is logged and reported as `false`
pub fn at_least(version: &str, major: u64, minor: u64) -> bool {
    check_at_least(version, major, minor).unwrap_or_else(|e| {
        warn!(error = %e, threshold = %format!("{major}.{minor}"), "unparseable version, treating as below floor");
        false
    })
}

/// Fail-closed ceiling check: an unparseable version is logged and reported as `false`
pub fn at_most(version: &str, major: u64, minor: u64) -> bool {
    check_at_most(version, major, minor).unwrap_or_else(|e| {
        warn!(error = %e, threshold = %format!("{major}.{minor}"), "unparseable version, treating as above ceiling");
        false
    })
}

/// Order in which controller and node components roll to a new release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutOrder {
    /// Upgrade: node agents must understand new controller output before it is produced
    NodesFirst,
    /// Downgrade: controllers step back before node agents lose features
    ControllersFirst,
    /// No ordering constraint (fresh install, same version, or unknown direction)
    Simultaneous,
}

impl RolloutOrder {
    /// Derive the rollout order from the running and target release versions
    pub fn for_versions(running: Option<&str>, target: &str) -> Self {
        let Some(running) = running else {
            return Self::Simultaneous;
        };
        match compare(running, target) {
            VersionChange::Upgrade => Self::NodesFirst,
            VersionChange::Downgrade => Self::ControllersFirst,
            VersionChange::Same | VersionChange::Unknown => Self::Simultaneous,
        }
    }
}

//! Version representation for sources.
//!
//! A version is either symbolic (a branch or tag name that a VCS resolves to
//! a revision), a semantic version derived from a tag, an immutable revision
//! hash, or a pairing of a symbolic version with the revision it resolved to
//! at interrogation time.

use std::fmt;

use semver::Version as SemVersion;
use serde::{Deserialize, Serialize};

/// An immutable VCS revision hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Create a revision from a hash string.
    pub fn new(hash: impl Into<String>) -> Self {
        Revision(hash.into())
    }

    /// The revision hash as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Revision {
    fn from(s: &str) -> Self {
        Revision::new(s)
    }
}

/// A version published by a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Version {
    /// A branch name. Resolves to whatever revision the branch points at.
    Branch(String),
    /// A tag that does not parse as a semantic version.
    Tag(String),
    /// A tag that parses as a semantic version.
    SemVer(SemVersion),
    /// An immutable revision.
    Revision(Revision),
    /// A symbolic version together with the revision it resolved to.
    Paired(Box<Version>, Revision),
}

impl Version {
    /// Interpret a tag name, producing `SemVer` when the name (with an
    /// optional leading `v`) parses as a semantic version and `Tag`
    /// otherwise.
    pub fn for_tag(name: &str) -> Version {
        let trimmed = name.strip_prefix('v').unwrap_or(name);
        match trimmed.parse::<SemVersion>() {
            Ok(sv) => Version::SemVer(sv),
            Err(_) => Version::Tag(name.to_string()),
        }
    }

    /// Pair a symbolic version with the revision it resolved to.
    ///
    /// Pairing a `Revision` is a no-op; re-pairing replaces the memoized
    /// revision while keeping the symbolic part.
    pub fn pair(self, rev: Revision) -> Version {
        match self {
            Version::Revision(r) => Version::Revision(r),
            Version::Paired(v, _) => Version::Paired(v, rev),
            symbolic => Version::Paired(Box::new(symbolic), rev),
        }
    }

    /// The symbolic part of this version, with any pairing stripped.
    pub fn unpaired(&self) -> &Version {
        match self {
            Version::Paired(v, _) => v,
            v => v,
        }
    }

    /// The revision this version is known to resolve to, if any.
    pub fn underlying_revision(&self) -> Option<&Revision> {
        match self {
            Version::Revision(r) => Some(r),
            Version::Paired(_, r) => Some(r),
            _ => None,
        }
    }

    /// Whether this version needs a VCS to resolve it to a revision.
    pub fn is_symbolic(&self) -> bool {
        matches!(
            self,
            Version::Branch(_) | Version::Tag(_) | Version::SemVer(_)
        )
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Branch(b) => write!(f, "branch {}", b),
            Version::Tag(t) => write!(f, "{}", t),
            Version::SemVer(sv) => write!(f, "{}", sv),
            Version::Revision(r) => write!(f, "{}", r),
            Version::Paired(v, r) => {
                let hash = r.as_str();
                write!(f, "{} ({})", v, &hash[..8.min(hash.len())])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_tag_semver() {
        assert_eq!(
            Version::for_tag("v1.2.3"),
            Version::SemVer(SemVersion::new(1, 2, 3))
        );
        assert_eq!(
            Version::for_tag("2.0.0"),
            Version::SemVer(SemVersion::new(2, 0, 0))
        );
    }

    #[test]
    fn test_for_tag_plain() {
        assert_eq!(
            Version::for_tag("release-candidate"),
            Version::Tag("release-candidate".to_string())
        );
    }

    #[test]
    fn test_pairing() {
        let v = Version::Branch("main".to_string()).pair(Revision::from("abcd1234"));
        assert!(matches!(v, Version::Paired(_, _)));
        assert_eq!(v.underlying_revision(), Some(&Revision::from("abcd1234")));
        assert_eq!(v.unpaired(), &Version::Branch("main".to_string()));
    }

    #[test]
    fn test_pairing_revision_is_noop() {
        let v = Version::Revision(Revision::from("abcd")).pair(Revision::from("ffff"));
        assert_eq!(v, Version::Revision(Revision::from("abcd")));
    }

    #[test]
    fn test_repairing_replaces_revision() {
        let v = Version::Tag("v1".to_string())
            .pair(Revision::from("aaaa"))
            .pair(Revision::from("bbbb"));
        assert_eq!(v.underlying_revision(), Some(&Revision::from("bbbb")));
        assert_eq!(v.unpaired(), &Version::Tag("v1".to_string()));
    }

    #[test]
    fn test_symbolic() {
        assert!(Version::Branch("main".into()).is_symbolic());
        assert!(!Version::Revision(Revision::from("abcd")).is_symbolic());
        assert!(!Version::Tag("v1".to_string()).pair(Revision::from("aa")).is_symbolic());
    }
}

//! Remote metadata probing.
//!
//! Import paths not covered by a static hosting rule are resolved by fetching
//! the path root over HTTPS and reading the `go-import` meta tags the host
//! serves, each announcing an `(import prefix, vcs, remote URL)` tuple.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::error::{Result, SourceError};
use crate::util::CancelToken;

/// One tuple announced by a metadata page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MetaImport {
    pub prefix: String,
    pub vcs: String,
    pub remote: Url,
}

static META_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+name="go-import"\s+content="([^"]+)"\s*/?>"#).unwrap()
});

/// Fetch and parse the metadata page for `path`, returning the announced
/// tuple whose prefix is the longest prefix of `path`.
pub(crate) fn probe_import_path(token: &CancelToken, path: &str) -> Result<MetaImport> {
    token.check()?;

    let url = format!("https://{}?go-get=1", path);
    tracing::debug!("probing metadata at {}", url);

    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("moorage/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SourceError::UnreachableMetadata(format!("{}: {}", path, e)))?;

    let response = client
        .get(&url)
        .send()
        .map_err(|e| SourceError::UnreachableMetadata(format!("{}: {}", path, e)))?;

    if !response.status().is_success() {
        return Err(SourceError::UnreachableMetadata(format!(
            "{}: HTTP {}",
            path,
            response.status()
        )));
    }

    let body = response
        .text()
        .map_err(|e| SourceError::UnreachableMetadata(format!("{}: {}", path, e)))?;

    token.check()?;
    select_meta_import(&body, path)
}

/// Parse a metadata page body and select the announced tuple with the longest
/// prefix covering `path`.
pub(crate) fn select_meta_import(body: &str, path: &str) -> Result<MetaImport> {
    let mut best: Option<MetaImport> = None;

    for cap in META_TAG.captures_iter(body) {
        let content = &cap[1];
        let mut fields = content.split_whitespace();
        let (prefix, vcs, remote) = match (fields.next(), fields.next(), fields.next()) {
            (Some(p), Some(v), Some(r)) if fields.next().is_none() => (p, v, r),
            _ => {
                return Err(SourceError::MalformedMetadata(format!(
                    "{}: tag content {:?} is not a (prefix, vcs, url) tuple",
                    path, content
                )))
            }
        };

        if path != prefix && !path.starts_with(&format!("{}/", prefix)) {
            continue;
        }

        let remote = Url::parse(remote).map_err(|e| {
            SourceError::MalformedMetadata(format!("{}: remote {:?}: {}", path, remote, e))
        })?;

        let candidate = MetaImport {
            prefix: prefix.to_string(),
            vcs: vcs.to_string(),
            remote,
        };
        match &best {
            Some(existing) if existing.prefix.len() >= candidate.prefix.len() => {}
            _ => best = Some(candidate),
        }
    }

    best.ok_or_else(|| SourceError::NoMatch(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<html><head>
<meta name="go-import" content="example.com/alpha git https://git.example.com/alpha">
<meta name="go-import" content="example.com/alpha/nested git https://git.example.com/nested">
<meta name="go-import" content="example.com/other hg https://hg.example.com/other">
</head></html>"#;

    #[test]
    fn test_selects_longest_matching_prefix() {
        let found = select_meta_import(PAGE, "example.com/alpha/nested/pkg").unwrap();
        assert_eq!(found.prefix, "example.com/alpha/nested");
        assert_eq!(found.remote.as_str(), "https://git.example.com/nested");
    }

    #[test]
    fn test_shorter_prefix_still_matches() {
        let found = select_meta_import(PAGE, "example.com/alpha/util").unwrap();
        assert_eq!(found.prefix, "example.com/alpha");
    }

    #[test]
    fn test_prefix_match_is_segment_aligned() {
        // "example.com/alphabet" must not match the "example.com/alpha" tag.
        let err = select_meta_import(PAGE, "example.com/alphabet").unwrap_err();
        assert!(matches!(err, SourceError::NoMatch(_)));
    }

    #[test]
    fn test_no_matching_tag_is_no_match() {
        let err = select_meta_import(PAGE, "elsewhere.org/pkg").unwrap_err();
        assert!(matches!(err, SourceError::NoMatch(_)));
    }

    #[test]
    fn test_malformed_tuple() {
        let body = r#"<meta name="go-import" content="example.com/x git">"#;
        let err = select_meta_import(body, "example.com/x").unwrap_err();
        assert!(matches!(err, SourceError::MalformedMetadata(_)));
    }

    #[test]
    fn test_malformed_remote_url() {
        let body = r#"<meta name="go-import" content="example.com/x git relative/path">"#;
        let err = select_meta_import(body, "example.com/x").unwrap_err();
        assert!(matches!(err, SourceError::MalformedMetadata(_)));
    }
}

//! The source coordinator.
//!
//! Maps project identifiers to source gateways, creating gateways lazily.
//! Identifiers are canonicalized by deducing their effective network name, so
//! however many aliases resolve to one underlying repository, exactly one
//! gateway exists for it and every alias shares it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use url::Url;

use crate::core::identifier::normalize_import_path;
use crate::core::ProjectIdentifier;
use crate::deduce::DeductionCoordinator;
use crate::error::{Result, SourceError};
use crate::manager::calls::CallManager;
use crate::sources::gateway::SourceGateway;
use crate::sources::vcs::GitAdapter;
use crate::util::{CancelToken, FlightGroup};

/// Registry of gateways, one per underlying source.
pub struct SourceCoordinator {
    calls: Arc<CallManager>,
    deducer: Arc<DeductionCoordinator>,
    sources_dir: PathBuf,
    state: Mutex<CoordState>,
    creations: FlightGroup<String, Arc<SourceGateway>>,
}

#[derive(Default)]
struct CoordState {
    /// Gateways keyed by canonical remote URL.
    gateways: HashMap<String, Arc<SourceGateway>>,
    /// Alias network names mapped to the canonical key they resolved to.
    aliases: HashMap<String, String>,
}

impl SourceCoordinator {
    pub(crate) fn new(
        calls: Arc<CallManager>,
        deducer: Arc<DeductionCoordinator>,
        cachedir: PathBuf,
    ) -> Self {
        SourceCoordinator {
            calls,
            deducer,
            sources_dir: cachedir.join("sources"),
            state: Mutex::new(CoordState::default()),
            creations: FlightGroup::new(),
        }
    }

    /// The gateway serving `id`'s underlying source, created on first use.
    pub fn gateway_for(
        &self,
        token: &CancelToken,
        id: &ProjectIdentifier,
    ) -> Result<Arc<SourceGateway>> {
        let name = normalize_import_path(id.effective_network_name());

        // A name that already mapped to a canonical source skips deduction
        // entirely.
        if let Some(gateway) = self.lookup_alias(&name) {
            return Ok(gateway);
        }

        let remote = self.canonical_remote(token, &name)?;
        let canonical = canonical_key(&remote);

        let created = self
            .creations
            .run(canonical.clone(), || self.get_or_create(&remote, &canonical));

        // Register the alias after the fact so the next lookup under this
        // name is a map hit.
        let mut state = self.state.lock().unwrap();
        state.aliases.insert(name, canonical);
        Ok(created)
    }

    /// How many distinct gateways currently exist.
    #[cfg(test)]
    pub(crate) fn gateway_count(&self) -> usize {
        self.state.lock().unwrap().gateways.len()
    }

    fn lookup_alias(&self, name: &str) -> Option<Arc<SourceGateway>> {
        let state = self.state.lock().unwrap();
        let canonical = state.aliases.get(name)?;
        state.gateways.get(canonical).cloned()
    }

    /// Resolve a network name to the remote it is fetched from. Names that
    /// are already URLs are taken as-is; import paths go through deduction.
    fn canonical_remote(&self, token: &CancelToken, name: &str) -> Result<Url> {
        if name.contains("://") {
            return Url::parse(name)
                .map_err(|e| SourceError::BadInput(format!("network name {:?}: {}", name, e)));
        }
        let deduced = self.deducer.deduce_root_path(token, name)?;
        Ok(deduced.recipe.primary_remote().clone())
    }

    fn get_or_create(&self, remote: &Url, canonical: &str) -> Arc<SourceGateway> {
        {
            let state = self.state.lock().unwrap();
            if let Some(existing) = state.gateways.get(canonical) {
                return Arc::clone(existing);
            }
        }

        let local_dir = self.sources_dir.join(sanitize_source_name(canonical));
        tracing::debug!("creating gateway for {} at {}", canonical, local_dir.display());
        let gateway = Arc::new(SourceGateway::new(
            remote.clone(),
            local_dir,
            Box::new(GitAdapter),
            Arc::clone(&self.calls),
        ));

        let mut state = self.state.lock().unwrap();
        let entry = state
            .gateways
            .entry(canonical.to_string())
            .or_insert(gateway);
        Arc::clone(entry)
    }
}

/// The canonical map key for a remote.
fn canonical_key(remote: &Url) -> String {
    remote.as_str().trim_end_matches('/').to_string()
}

/// Turn a source name into a filesystem directory name.
///
/// Each `-` doubles and each of `:` `/` `+` becomes `-`, so distinct names
/// never collide on disk.
pub(crate) fn sanitize_source_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '-' => out.push_str("--"),
            ':' | '/' | '+' => out.push('-'),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ProjectIdentifier;
    use crate::core::ProjectRoot;

    fn coordinator(cachedir: &std::path::Path) -> SourceCoordinator {
        let calls = Arc::new(CallManager::new());
        let deducer = Arc::new(DeductionCoordinator::new(Arc::clone(&calls)));
        SourceCoordinator::new(calls, deducer, cachedir.to_path_buf())
    }

    #[test]
    fn test_aliases_collapse_to_one_gateway() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sc = coordinator(tmp.path());
        let token = CancelToken::new();

        // Three spellings of the same underlying source: a deducible import
        // path, the URL it deduces to, and that URL with a trailing slash.
        let ids = [
            ProjectIdentifier::from("github.com/user/repo"),
            ProjectIdentifier::with_network_name(
                ProjectRoot::new("example.com/alias"),
                "https://github.com/user/repo",
            ),
            ProjectIdentifier::with_network_name(
                ProjectRoot::new("example.com/other"),
                "https://github.com/user/repo/",
            ),
        ];

        let gateways: Vec<_> = ids
            .iter()
            .map(|id| sc.gateway_for(&token, id).unwrap())
            .collect();

        assert_eq!(sc.gateway_count(), 1);
        assert!(Arc::ptr_eq(&gateways[0], &gateways[1]));
        assert!(Arc::ptr_eq(&gateways[1], &gateways[2]));
    }

    #[test]
    fn test_distinct_sources_get_distinct_gateways() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sc = coordinator(tmp.path());
        let token = CancelToken::new();

        sc.gateway_for(&token, &ProjectIdentifier::from("github.com/user/one"))
            .unwrap();
        sc.gateway_for(&token, &ProjectIdentifier::from("github.com/user/two"))
            .unwrap();
        assert_eq!(sc.gateway_count(), 2);
    }

    #[test]
    fn test_repeat_lookup_hits_alias_map() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sc = coordinator(tmp.path());
        let token = CancelToken::new();
        let id = ProjectIdentifier::from("github.com/user/repo");

        let first = sc.gateway_for(&token, &id).unwrap();
        let second = sc.gateway_for(&token, &id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(sc.gateway_count(), 1);
    }

    #[test]
    fn test_sanitize_mapping() {
        assert_eq!(
            sanitize_source_name("https://github.com/user/repo"),
            "https---github.com-user-repo"
        );
        assert_eq!(sanitize_source_name("git+ssh://host"), "git-ssh---host");
        assert_eq!(sanitize_source_name("my-repo"), "my--repo");
    }

    #[test]
    fn test_sanitize_is_injective_on_lookalikes() {
        // A literal dash and a sanitized slash must not collide.
        assert_ne!(sanitize_source_name("a-b"), sanitize_source_name("a/b"));
        assert_ne!(sanitize_source_name("a:b"), sanitize_source_name("a-b"));
        assert_ne!(sanitize_source_name("a--b"), sanitize_source_name("a-/b"));
    }

    #[test]
    fn test_canonical_key_strips_trailing_slash() {
        let url = Url::parse("https://github.com/user/repo/").unwrap();
        assert_eq!(canonical_key(&url), "https://github.com/user/repo");
    }
}

//! `.swarmignore`: user-authored git-style ignore patterns, layered over
//! [`swarm_watch::IgnorePolicy`]'s small built-in default-ignore set.
//! Parsed with the `ignore` crate's gitignore matcher so patterns can use
//! the full gitignore grammar.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;
use swarm_watch::IgnorePolicy;
use tracing::warn;

const SWARMIGNORE_FILE: &str = ".swarmignore";

pub struct IgnoreRules {
    structural: IgnorePolicy,
    user_patterns: Option<Gitignore>,
}

impl IgnoreRules {
    /// Load `.swarmignore` from `sync_root` if present, combined with the
    /// structural policy built from `excluded_subtrees`.
    #[must_use]
    pub fn load(sync_root: &Path, excluded_subtrees: Vec<String>) -> Self {
        let structural = IgnorePolicy { excluded_prefixes: excluded_subtrees, ..IgnorePolicy::default() };

        let swarmignore_path = sync_root.join(SWARMIGNORE_FILE);
        let user_patterns = if swarmignore_path.exists() {
            let mut builder = GitignoreBuilder::new(sync_root);
            if let Some(err) = builder.add(&swarmignore_path) {
                warn!(%err, "failed to parse .swarmignore, ignoring its patterns");
                None
            } else {
                builder.build().ok()
            }
        } else {
            None
        };

        Self { structural, user_patterns }
    }

    /// Whether `relative_path` (relative to the sync root) should be
    /// excluded from the tracked-file set.
    #[must_use]
    pub fn is_ignored(&self, sync_root: &Path, relative_path: &Path, is_dir: bool) -> bool {
        if self.structural.is_ignored(relative_path) {
            return true;
        }
        match &self.user_patterns {
            Some(gi) => gi.matched(sync_root.join(relative_path), is_dir).is_ignore(),
            None => false,
        }
    }
}

//! Structural ignore policy applied to raw watch events, independent of the
//! sync engine's user-configured `.swarmignore` glob rules.

use std::path::Path;

/// Names and subtrees the watcher never reports changes for.
#[derive(Debug, Clone)]
pub struct IgnorePolicy {
    /// Directory name holding archived revisions, e.g. `.swarm-versions`.
    pub versions_dir_name: String,
    /// File names holding daemon state, relative to the sync root.
    pub state_file_names: Vec<String>,
    /// User-configured excluded subtrees, as relative-path prefixes.
    pub excluded_prefixes: Vec<String>,
}

impl Default for IgnorePolicy {
    fn default() -> Self {
        Self {
            versions_dir_name: ".swarm-versions".to_string(),
            state_file_names: vec![".swarm-state.json".to_string()],
            excluded_prefixes: Vec::new(),
        }
    }
}

impl IgnorePolicy {
    /// Whether `relative_path` (relative to the sync root) should be
    /// dropped before reaching the sync engine.
    #[must_use]
    pub fn is_ignored(&self, relative_path: &Path) -> bool {
        if relative_path
            .components()
            .any(|c| Self::component_is_hidden(&c.as_os_str().to_string_lossy()))
        {
            return true;
        }

        if relative_path
            .components()
            .next()
            .is_some_and(|c| c.as_os_str() == self.versions_dir_name.as_str())
        {
            return true;
        }

        let rel_str = relative_path.to_string_lossy();
        if self.state_file_names.iter().any(|name| rel_str == *name) {
            return true;
        }

        self.excluded_prefixes
            .iter()
            .any(|prefix| rel_str.starts_with(prefix.as_str()))
    }

    fn component_is_hidden(component: &str) -> bool {
        component.starts_with('.') || component.starts_with('~')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn hidden_names_are_ignored_at_any_depth() {
        let policy = IgnorePolicy::default();
        assert!(policy.is_ignored(&PathBuf::from(".git/config")));
        assert!(policy.is_ignored(&PathBuf::from("docs/.DS_Store")));
        assert!(policy.is_ignored(&PathBuf::from("notes/~backup.txt")));
    }

    #[test]
    fn versions_directory_is_ignored() {
        let policy = IgnorePolicy::default();
        assert!(policy.is_ignored(&PathBuf::from(".swarm-versions/docs/a.txt/12345")));
    }

    #[test]
    fn ordinary_paths_are_not_ignored() {
        let policy = IgnorePolicy::default();
        assert!(!policy.is_ignored(&PathBuf::from("docs/readme.md")));
    }

    #[test]
    fn excluded_prefix_is_honored() {
        let mut policy = IgnorePolicy::default();
        policy.excluded_prefixes.push("build/".to_string());
        assert!(policy.is_ignored(&PathBuf::from("build/output.bin")));
        assert!(!policy.is_ignored(&PathBuf::from("src/output.bin")));
    }
}

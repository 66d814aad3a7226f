use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

/// Ordered set of file extensions whose changes may trigger a restart.
///
/// Extensions are stored without a leading dot and compared case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFilter {
    extensions: Vec<String>,
}

impl ExtensionFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for ext in extensions {
            let ext = ext.as_ref().trim().trim_start_matches('.');
            if !ext.is_empty() && !out.iter().any(|e| e == ext) {
                out.push(ext.to_string());
            }
        }
        Self { extensions: out }
    }

    pub fn contains(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e == ext)
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.extensions
    }
}

/// Returns true iff the final extension of `path` is in `allowed`.
///
/// Paths without an extension are never relevant.
pub fn is_relevant(path: &Path, allowed: &ExtensionFilter) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| allowed.contains(ext))
}

/// Paths under the watched root that must never trigger a restart.
///
/// Always excludes any path with a component starting with `.`, plus the
/// configured top-level directories.
pub struct IgnoreRules {
    root: PathBuf,
    matcher: Gitignore,
}

impl IgnoreRules {
    pub fn new(root: &Path, ignore_dirs: &[String]) -> Result<Self, ignore::Error> {
        let mut builder = GitignoreBuilder::new(root);
        builder.add_line(None, ".*")?;
        for dir in ignore_dirs {
            let dir = dir.trim_matches('/');
            if dir.is_empty() {
                continue;
            }
            // Leading slash anchors the rule to the root.
            builder.add_line(None, &format!("/{dir}"))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            matcher: builder.build()?,
        })
    }

    /// Returns true if `path` (absolute or relative to the root) is excluded.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let relative = if path.is_absolute() {
            match path.strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => return false,
            }
        } else {
            path
        };

        if relative.as_os_str().is_empty() {
            return false;
        }

        self.matcher
            .matched_path_or_any_parents(relative, false)
            .is_ignore()
    }
}

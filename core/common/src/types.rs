//! Common types used throughout syncwarden.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Remote identifier understood by the sync backend (e.g. `onedrive:` or
/// `onedrive:Backup`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteSpec(String);

impl RemoteSpec {
    /// Create a new RemoteSpec from a string.
    ///
    /// # Errors
    /// - Returns error if the identifier is empty
    pub fn new(spec: impl Into<String>) -> crate::Result<Self> {
        let spec = spec.into();
        if spec.trim().is_empty() {
            return Err(crate::Error::Config(
                "Remote identifier cannot be empty".to_string(),
            ));
        }
        Ok(Self(spec))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address a file under this remote.
    ///
    /// A bare remote root (`onedrive:`) is joined without a separator,
    /// anything else gets exactly one `/` between base and file.
    pub fn join(&self, path: &RelPath) -> String {
        let base = self.0.trim_end_matches('/');
        if base.ends_with(':') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }
}

impl fmt::Display for RemoteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A path relative to the replica root, identical on both sides.
///
/// Always uses `/` as separator. Never absolute, never escapes the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelPath {
    components: Vec<String>,
}

impl RelPath {
    /// Create a path from string components.
    ///
    /// # Errors
    /// - Returns error if there are no components
    /// - Returns error if any component is empty, `.`, `..` or contains a separator
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        if components.is_empty() {
            return Err(crate::Error::Parse("Relative path cannot be empty".to_string()));
        }
        for comp in &components {
            if comp.is_empty() || comp == "." || comp == ".." {
                return Err(crate::Error::Parse(format!(
                    "Invalid path component: {:?}",
                    comp
                )));
            }
            if comp.contains('/') || comp.contains('\\') {
                return Err(crate::Error::Parse(
                    "Path component cannot contain separators".to_string(),
                ));
            }
        }
        Ok(Self { components })
    }

    /// Parse a path string as it appears in backend logs.
    ///
    /// Leading and trailing `/` are ignored.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let trimmed = path.trim().trim_matches('/');
        let components: Vec<String> = trimmed
            .split('/')
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect();
        Self::from_components(components)
    }

    /// Express a file below `root` as a relative path.
    ///
    /// # Errors
    /// - Returns error if `path` is not under `root`
    pub fn from_local(root: &Path, path: &Path) -> crate::Result<Self> {
        let relative = path.strip_prefix(root).map_err(|_| {
            crate::Error::Parse(format!(
                "{} is not under {}",
                path.display(),
                root.display()
            ))
        })?;

        let mut components = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => components.push(part.to_string_lossy().into_owned()),
                other => {
                    return Err(crate::Error::Parse(format!(
                        "Unexpected path component {:?} in {}",
                        other,
                        path.display()
                    )))
                }
            }
        }
        Self::from_components(components)
    }

    /// Resolve this path below a local replica root.
    pub fn to_local(&self, root: &Path) -> PathBuf {
        let mut local = root.to_path_buf();
        for component in &self.components {
            local.push(component);
        }
        local
    }

    /// Get the file name (last component).
    pub fn name(&self) -> &str {
        self.components.last().map(|s| s.as_str()).unwrap_or_default()
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_spec_empty_fails() {
        assert!(RemoteSpec::new("").is_err());
        assert!(RemoteSpec::new("   ").is_err());
    }

    #[test]
    fn test_remote_join_bare_root() {
        let remote = RemoteSpec::new("onedrive:").unwrap();
        let path = RelPath::parse("Documents/report.pdf").unwrap();
        assert_eq!(remote.join(&path), "onedrive:Documents/report.pdf");
    }

    #[test]
    fn test_remote_join_subfolder() {
        let remote = RemoteSpec::new("onedrive:Backup/").unwrap();
        let path = RelPath::parse("/a/b.txt").unwrap();
        assert_eq!(remote.join(&path), "onedrive:Backup/a/b.txt");
    }

    #[test]
    fn test_rel_path_parse() {
        let path = RelPath::parse("/foo/bar/baz.txt").unwrap();
        assert_eq!(path.components(), &["foo", "bar", "baz.txt"]);
        assert_eq!(path.to_string(), "foo/bar/baz.txt");
        assert_eq!(path.name(), "baz.txt");
    }

    #[test]
    fn test_rel_path_rejects_traversal() {
        assert!(RelPath::parse("../etc/passwd").is_err());
        assert!(RelPath::parse("a/./b").is_err());
        assert!(RelPath::parse("").is_err());
        assert!(RelPath::parse("/").is_err());
    }

    #[test]
    fn test_rel_path_local_mapping() {
        let root = Path::new("/data/onedrive");
        let file = root.join("Music").join("song.mp3");

        let rel = RelPath::from_local(root, &file).unwrap();
        assert_eq!(rel.to_string(), "Music/song.mp3");
        assert_eq!(rel.to_local(root), file);

        assert!(RelPath::from_local(root, Path::new("/elsewhere/x")).is_err());
    }
}

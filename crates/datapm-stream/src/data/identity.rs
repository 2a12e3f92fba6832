use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Identifies one cached artifact.
///
/// A missing catalog slug places the artifact in the reserved local
/// namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamIdentity {
    catalog_slug: Option<String>,
    package_slug: String,
}

impl StreamIdentity {
    pub fn new(catalog_slug: Option<String>, package_slug: impl Into<String>) -> Self {
        Self {
            catalog_slug,
            package_slug: package_slug.into(),
        }
    }

    /// An identity published in `catalog_slug`.
    pub fn in_catalog(catalog_slug: impl Into<String>, package_slug: impl Into<String>) -> Self {
        Self {
            catalog_slug: Some(catalog_slug.into()),
            package_slug: package_slug.into(),
        }
    }

    /// An identity in the local namespace.
    pub fn local(package_slug: impl Into<String>) -> Self {
        Self {
            catalog_slug: None,
            package_slug: package_slug.into(),
        }
    }

    pub fn catalog_slug(&self) -> Option<&str> { self.catalog_slug.as_deref() }

    pub fn package_slug(&self) -> &str { &self.package_slug }

    /// The cache location of this identity under `root`.
    pub fn cache_path(&self, root: &CacheRoot) -> PathBuf {
        crate::core::resolve(root, self.catalog_slug(), self.package_slug())
    }
}

/// The user-data root that cache paths are resolved under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRoot(PathBuf);

impl CacheRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self(path.into()) }

    /// The current user's home directory.
    pub fn from_home() -> Result<Self> {
        home::home_dir()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Self)
            .ok_or(Error::NoHomeDirectory)
    }

    pub fn path(&self) -> &Path { &self.0 }
}

impl From<PathBuf> for CacheRoot {
    fn from(path: PathBuf) -> Self { Self(path) }
}

impl From<&Path> for CacheRoot {
    fn from(path: &Path) -> Self { Self(path.to_path_buf()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_agree() {
        assert_eq!(
            StreamIdentity::new(Some("cat".to_string()), "pkg"),
            StreamIdentity::in_catalog("cat", "pkg")
        );
        assert_eq!(StreamIdentity::new(None, "pkg"), StreamIdentity::local("pkg"));
        assert_eq!(StreamIdentity::local("pkg").catalog_slug(), None);
    }

    #[test]
    fn test_cache_path_uses_root() {
        let root = CacheRoot::from(Path::new("/data"));
        assert_eq!(
            StreamIdentity::in_catalog("cat", "pkg").cache_path(&root),
            PathBuf::from("/data/datapm/data/cat/pkg")
        );
    }

    #[test]
    fn test_home_root_is_never_empty() {
        if let Ok(root) = CacheRoot::from_home() {
            assert!(!root.path().as_os_str().is_empty());
        }
    }
}

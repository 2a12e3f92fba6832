use std::path::PathBuf;

use crate::data::CacheRoot;

/// Namespace used for identities without a catalog.
pub const LOCAL_NAMESPACE: &str = "_local";

/// Canonical cache location for a catalog/package pair.
///
/// `<root>/datapm/data/<catalog | "_local">/<package>`. Other tools read
/// this layout directly, so it must not change.
pub fn resolve(root: &CacheRoot, catalog_slug: Option<&str>, package_slug: &str) -> PathBuf {
    root.path()
        .join("datapm")
        .join("data")
        .join(catalog_slug.unwrap_or(LOCAL_NAMESPACE))
        .join(package_slug)
}

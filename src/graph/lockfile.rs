//! `package-lock.json` (lockfileVersion 3) parsing.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use super::manifest::PackageManifest;
use super::GraphError;
use crate::model::{DependencyGraph, Package, PackageNode, CANONICAL_REGISTRY};

const NESTING_SEPARATOR: &str = "node_modules/";

/// The subset of a v3 lock-file this crate consumes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lockfile {
    #[serde(default)]
    pub name: Option<String>,
    pub lockfile_version: u64,
    /// Namespaced install path (`node_modules/a/node_modules/b`) -> entry.
    /// The root package lives under the empty path.
    #[serde(default)]
    pub packages: BTreeMap<String, LockfileEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockfileEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub resolved: Option<String>,
    #[serde(default)]
    pub integrity: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev: bool,
    #[serde(default)]
    pub link: bool,
}

impl Lockfile {
    /// Parses and version-checks a lock-file document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, GraphError> {
        let lockfile: Lockfile = serde_json::from_slice(bytes)?;
        if lockfile.lockfile_version != 3 {
            return Err(GraphError::UnsupportedLockfileVersion(
                lockfile.lockfile_version,
            ));
        }
        Ok(lockfile)
    }

    pub fn from_path(path: &Path) -> Result<Self, GraphError> {
        let bytes = std::fs::read(path).map_err(|source| GraphError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_slice(&bytes)
    }

    fn root_entry(&self) -> Option<&LockfileEntry> {
        self.packages.get("")
    }
}

/// Reads a lock-file from disk and builds its dependency graph.
pub fn parse_lockfile(path: &Path, root: &Package) -> Result<DependencyGraph, GraphError> {
    let lockfile = Lockfile::from_path(path)?;
    build_graph(&lockfile, root)
}

/// Derives the root identity from the lock-file's `""` entry.
pub fn root_package(lockfile: &Lockfile) -> Result<Package, GraphError> {
    let entry = lockfile.root_entry().ok_or(GraphError::MissingRoot)?;
    let name = entry
        .name
        .clone()
        .or_else(|| lockfile.name.clone())
        .unwrap_or_else(|| "root".to_string());
    Ok(Package::new(name, entry.version.clone().unwrap_or_default()))
}

/// Builds the dependency DAG for `root` from a parsed lock-file.
///
/// The root's edges come from the lock-file's `""` entry; a lock-file
/// without one fails with [`GraphError::MissingRoot`] rather than yielding a
/// graph with no direct dependencies.
///
/// Fails with [`GraphError::NonReproducibleDependency`] when any node
/// declares, or resolves to, a source outside the canonical registry.
pub fn build_graph(lockfile: &Lockfile, root: &Package) -> Result<DependencyGraph, GraphError> {
    let entry = lockfile.root_entry().ok_or(GraphError::MissingRoot)?;
    let mut declared = entry.dependencies.clone();
    declared.extend(entry.dev_dependencies.clone());
    assemble(lockfile, root, declared)
}

/// Builds the graph for a `package.json`: identity and root edges come from
/// the manifest, everything else from its lock-file.
pub fn build_graph_for_manifest(
    lockfile: &Lockfile,
    manifest: &PackageManifest,
) -> Result<DependencyGraph, GraphError> {
    manifest.validate()?;
    assemble(lockfile, &manifest.to_package(), manifest.all_dependencies())
}

fn assemble(
    lockfile: &Lockfile,
    root: &Package,
    root_dependencies: BTreeMap<String, String>,
) -> Result<DependencyGraph, GraphError> {
    let mut nodes = BTreeMap::new();
    let mut hoisted = BTreeMap::new();
    let mut locations = BTreeMap::new();

    for (path, entry) in &lockfile.packages {
        if path.is_empty() {
            continue;
        }
        let Some(name) = extract_package_name(path) else {
            debug!(path = %path, "Skipping entry outside node_modules");
            continue;
        };
        let version = match entry.version.as_deref() {
            Some(v) if !v.is_empty() && !entry.link => v,
            _ => {
                debug!(path = %path, "Skipping linked or unversioned entry");
                continue;
            }
        };

        let package = Package::new(name, version);
        if let Some(resolved) = entry.resolved.as_deref() {
            if is_unfetchable_location(resolved) {
                return Err(GraphError::NonReproducibleDependency {
                    package: package.id(),
                    dependency: name.to_string(),
                    location: resolved.to_string(),
                });
            }
        }
        check_declared(&package, &entry.dependencies)?;

        let id = package.id();
        if path.as_str() == format!("{}{}", NESTING_SEPARATOR, name) {
            hoisted.insert(name.to_string(), id.clone());
        }
        locations.insert(path.clone(), id.clone());
        nodes.entry(id).or_insert_with(|| PackageNode {
            package,
            resolved: entry.resolved.clone(),
            integrity: entry.integrity.clone(),
            dependencies: entry.dependencies.clone(),
        });
    }

    check_declared(root, &root_dependencies)?;
    locations.insert(String::new(), root.id());
    nodes.insert(
        root.id(),
        PackageNode {
            package: root.clone(),
            resolved: None,
            integrity: None,
            dependencies: root_dependencies,
        },
    );

    let graph = DependencyGraph {
        root: root.clone(),
        nodes,
        hoisted,
        locations,
    };
    info!(
        root = %root,
        packages = graph.len(),
        direct = graph.direct_dependencies().len(),
        "Dependency graph built"
    );
    Ok(graph)
}

fn check_declared(package: &Package, deps: &BTreeMap<String, String>) -> Result<(), GraphError> {
    match deps.iter().find(|(_, spec)| is_non_reproducible(spec)) {
        Some((dep, spec)) => Err(GraphError::NonReproducibleDependency {
            package: package.id(),
            dependency: dep.clone(),
            location: spec.clone(),
        }),
        None => Ok(()),
    }
}

/// Package name at the end of a nested install path.
///
/// `node_modules/a/node_modules/@scope/b` -> `@scope/b`.
pub(crate) fn extract_package_name(path: &str) -> Option<&str> {
    path.rsplit_once(NESTING_SEPARATOR)
        .map(|(_, name)| name.trim_end_matches('/'))
        .filter(|name| !name.is_empty())
}

/// A `resolved` tarball location the mirror cannot fetch from the canonical
/// registry: anything [`is_non_reproducible`] rejects, plus local files.
pub(crate) fn is_unfetchable_location(resolved: &str) -> bool {
    const LOCAL_SCHEMES: [&str; 3] = ["file:", "link:", "workspace:"];
    LOCAL_SCHEMES.iter().any(|p| resolved.starts_with(p)) || is_non_reproducible(resolved)
}

/// True for version-control and raw-URL sources that bypass the registry.
pub(crate) fn is_non_reproducible(spec: &str) -> bool {
    const VCS_PREFIXES: [&str; 7] = [
        "git+", "git:", "git://", "github:", "gitlab:", "bitbucket:", "gist:",
    ];
    if VCS_PREFIXES.iter().any(|p| spec.starts_with(p)) {
        return true;
    }
    if spec.starts_with("http://") || spec.starts_with("https://") {
        return !spec.starts_with(&format!("{}/", CANONICAL_REGISTRY));
    }
    // `user/repo` is GitHub shorthand; semver ranges never contain '/'.
    const LOCAL_PREFIXES: [&str; 4] = ["npm:", "file:", "link:", "workspace:"];
    spec.contains('/')
        && !spec.starts_with('@')
        && !LOCAL_PREFIXES.iter().any(|p| spec.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lockfile(value: serde_json::Value) -> Lockfile {
        Lockfile::from_slice(value.to_string().as_bytes()).unwrap()
    }

    fn simple_lockfile() -> serde_json::Value {
        json!({
            "name": "app",
            "lockfileVersion": 3,
            "packages": {
                "": {
                    "name": "app",
                    "version": "0.0.1",
                    "dependencies": { "a": "^1.0.0" }
                },
                "node_modules/a": {
                    "version": "1.0.0",
                    "resolved": "https://registry.npmjs.org/a/-/a-1.0.0.tgz",
                    "integrity": "sha512-aaa",
                    "dependencies": { "b": "^2.0.0" }
                },
                "node_modules/b": {
                    "version": "2.0.0",
                    "resolved": "https://registry.npmjs.org/b/-/b-2.0.0.tgz",
                    "integrity": "sha512-bbb"
                }
            }
        })
    }

    #[test]
    fn test_build_graph_three_nodes() {
        let lock = lockfile(simple_lockfile());
        let root = Package::new("app", "0.0.1");
        let graph = build_graph(&lock, &root).unwrap();

        let ids: Vec<_> = graph.nodes.keys().cloned().collect();
        assert_eq!(ids, vec!["a@1.0.0", "app@0.0.1", "b@2.0.0"]);
        for (id, node) in &graph.nodes {
            assert_eq!(id, &format!("{}@{}", node.package.name, node.package.version));
        }

        let direct: Vec<_> = graph.direct_dependencies().iter().map(|n| n.id()).collect();
        assert_eq!(direct, vec!["a@1.0.0"]);
        assert_eq!(graph.non_root_nodes().count(), 2);
        assert!(graph.transitive_closure("a@1.0.0").contains("b@2.0.0"));
    }

    #[test]
    fn test_root_merges_dev_dependencies() {
        let mut doc = simple_lockfile();
        doc["packages"][""]["devDependencies"] = json!({ "b": "^2.0.0" });
        let graph = build_graph(&lockfile(doc), &Package::new("app", "0.0.1")).unwrap();

        let root = graph.root_node().unwrap();
        assert_eq!(root.dependencies.len(), 2);
        assert_eq!(graph.direct_dependencies().len(), 2);
    }

    #[test]
    fn test_shared_dependency_collapses() {
        let mut doc = simple_lockfile();
        doc["packages"]["node_modules/c"] = json!({
            "version": "1.0.0",
            "dependencies": { "b": "^2.0.0" }
        });
        doc["packages"]["node_modules/c/node_modules/b"] = json!({ "version": "2.0.0" });
        let graph = build_graph(&lockfile(doc), &Package::new("app", "0.0.1")).unwrap();

        assert_eq!(graph.nodes.keys().filter(|id| id.starts_with("b@")).count(), 1);
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn test_nested_private_copy_is_distinct_node() {
        let mut doc = simple_lockfile();
        doc["packages"]["node_modules/a/node_modules/b"] = json!({ "version": "3.0.0" });
        let graph = build_graph(&lockfile(doc), &Package::new("app", "0.0.1")).unwrap();

        assert!(graph.get("b@3.0.0").is_some());
        assert_eq!(graph.resolve_name("b").unwrap().id(), "b@2.0.0");
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut doc = simple_lockfile();
        doc["lockfileVersion"] = json!(2);
        let err = Lockfile::from_slice(doc.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, GraphError::UnsupportedLockfileVersion(2)));
    }

    #[test]
    fn test_malformed_lockfile_rejected() {
        let err = Lockfile::from_slice(b"{ not json").unwrap_err();
        assert!(matches!(err, GraphError::Json(_)));
    }

    #[test]
    fn test_vcs_dependency_rejected() {
        let mut doc = simple_lockfile();
        doc["packages"]["node_modules/a"]["dependencies"]["evil"] =
            json!("git+https://github.com/x/evil.git");
        let err = build_graph(&lockfile(doc), &Package::new("app", "0.0.1")).unwrap_err();
        match err {
            GraphError::NonReproducibleDependency {
                package, dependency, ..
            } => {
                assert_eq!(package, "a@1.0.0");
                assert_eq!(dependency, "evil");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_raw_http_resolved_rejected() {
        let mut doc = simple_lockfile();
        doc["packages"]["node_modules/b"]["resolved"] = json!("https://example.com/b.tgz");
        let err = build_graph(&lockfile(doc), &Package::new("app", "0.0.1")).unwrap_err();
        assert!(matches!(err, GraphError::NonReproducibleDependency { .. }));
    }

    #[test]
    fn test_root_package_from_lockfile() {
        let lock = lockfile(simple_lockfile());
        assert_eq!(root_package(&lock).unwrap(), Package::new("app", "0.0.1"));

        let mut doc = simple_lockfile();
        doc["packages"].as_object_mut().unwrap().remove("");
        assert!(matches!(
            root_package(&lockfile(doc)),
            Err(GraphError::MissingRoot)
        ));
    }

    #[test]
    fn test_extract_package_name() {
        let cases = [
            ("node_modules/lodash", Some("lodash")),
            ("node_modules/@sveltejs/kit", Some("@sveltejs/kit")),
            ("node_modules/foo/node_modules/bar", Some("bar")),
            ("node_modules/lodash/node_modules/@types/node", Some("@types/node")),
            ("node_modules/@scope/pkg/node_modules/dep", Some("dep")),
            ("node_modules/@scope/pkg/node_modules/@other/dep", Some("@other/dep")),
            ("packages/workspace-a", None),
        ];
        for (path, expected) in cases {
            assert_eq!(extract_package_name(path), expected, "path: {path}");
        }
    }

    #[test]
    fn test_is_non_reproducible() {
        assert!(!is_non_reproducible("^4.17.21"));
        assert!(!is_non_reproducible(
            "https://registry.npmjs.org/lodash/-/lodash-4.17.21.tgz"
        ));
        assert!(!is_non_reproducible("npm:string-width@^4.2.0"));
        assert!(is_non_reproducible("git+https://github.com/user/repo.git"));
        assert!(is_non_reproducible("github:user/repo"));
        assert!(is_non_reproducible("user/repo"));
        assert!(is_non_reproducible("https://example.com/lib.tgz"));
        assert!(is_non_reproducible("http://internal.com/package.tgz"));
    }

    #[test]
    fn test_missing_root_entry_is_an_error() {
        let mut doc = simple_lockfile();
        doc["packages"].as_object_mut().unwrap().remove("");
        let err = build_graph(&lockfile(doc), &Package::new("app", "0.0.1")).unwrap_err();
        assert!(matches!(err, GraphError::MissingRoot));
    }

    #[test]
    fn test_manifest_supplies_root_edges() {
        let mut doc = simple_lockfile();
        doc["packages"].as_object_mut().unwrap().remove("");
        let manifest = PackageManifest::from_slice(
            br#"{ "name": "app", "version": "0.0.1", "devDependencies": { "b": "^2.0.0" } }"#,
        )
        .unwrap();

        let graph = build_graph_for_manifest(&lockfile(doc), &manifest).unwrap();
        assert_eq!(graph.root, Package::new("app", "0.0.1"));
        let direct: Vec<_> = graph.direct_dependencies().iter().map(|n| n.id()).collect();
        assert_eq!(direct, vec!["b@2.0.0"]);

        let unnamed = PackageManifest::from_slice(br#"{ "version": "1.0.0" }"#).unwrap();
        assert!(matches!(
            build_graph_for_manifest(&lockfile(simple_lockfile()), &unnamed),
            Err(GraphError::MissingField("name"))
        ));
    }

    #[test]
    fn test_file_resolved_rejected() {
        let mut doc = simple_lockfile();
        doc["packages"]["node_modules/b"]["resolved"] = json!("file:../vendor/b-2.0.0.tgz");
        let err = build_graph(&lockfile(doc), &Package::new("app", "0.0.1")).unwrap_err();
        match err {
            GraphError::NonReproducibleDependency { package, location, .. } => {
                assert_eq!(package, "b@2.0.0");
                assert_eq!(location, "file:../vendor/b-2.0.0.tgz");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(is_unfetchable_location("link:../b"));
        assert!(!is_unfetchable_location(
            "https://registry.npmjs.org/b/-/b-2.0.0.tgz"
        ));
    }

    #[test]
    fn test_closure_follows_nested_copies() {
        // a carries a private b@3; the hoisted b@2 belongs to the root and c.
        let mut doc = simple_lockfile();
        doc["packages"][""]["dependencies"]["c"] = json!("^1.0.0");
        doc["packages"]["node_modules/a"]["dependencies"] = json!({ "b": "^3.0.0" });
        doc["packages"]["node_modules/a/node_modules/b"] = json!({
            "version": "3.0.0",
            "dependencies": { "d": "^1.0.0" }
        });
        doc["packages"]["node_modules/a/node_modules/d"] = json!({ "version": "1.0.0" });
        doc["packages"]["node_modules/c"] = json!({
            "version": "1.0.0",
            "dependencies": { "b": "^2.0.0" }
        });
        let graph = build_graph(&lockfile(doc), &Package::new("app", "0.0.1")).unwrap();

        let closure: Vec<_> = graph.transitive_closure("a@1.0.0").into_iter().collect();
        assert_eq!(closure, vec!["b@3.0.0", "d@1.0.0"]);
        let closure: Vec<_> = graph.transitive_closure("c@1.0.0").into_iter().collect();
        assert_eq!(closure, vec!["b@2.0.0"]);
        assert_eq!(
            graph.resolve_from("node_modules/a/node_modules/b", "d"),
            Some("node_modules/a/node_modules/d".to_string())
        );
    }
}

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// Canonical public registry host; tarballs outside it are not reproducible.
pub const CANONICAL_REGISTRY: &str = "https://registry.npmjs.org";

/// Package identity. `id()` is `name@version` and is unique within a graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
}

impl Package {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Name without its `@scope/` prefix, used in tarball file names.
    pub fn unscoped_name(&self) -> &str {
        unscoped(&self.name)
    }

    /// Filesystem-safe directory name: `@scope/name@1.0.0` -> `scope__name@1.0.0`.
    pub fn slug(&self) -> String {
        let name = match self.name.strip_prefix('@').and_then(|s| s.split_once('/')) {
            Some((scope, rest)) => format!("{}__{}", scope, rest),
            None => self.name.clone(),
        };
        format!("{}@{}", name, self.version)
    }

    /// Registry URL path segment: `@scope/name` -> `@scope%2fname`.
    pub fn registry_path(&self) -> String {
        match self.name.split_once('/') {
            Some((scope, rest)) if self.name.starts_with('@') => format!("{}%2f{}", scope, rest),
            _ => self.name.clone(),
        }
    }

    /// Canonical tarball location on the public registry.
    pub fn canonical_tarball_url(&self) -> String {
        format!(
            "{}/{}/-/{}-{}.tgz",
            CANONICAL_REGISTRY,
            self.name,
            self.unscoped_name(),
            self.version
        )
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

pub(crate) fn unscoped(name: &str) -> &str {
    if name.starts_with('@') {
        if let Some((_, rest)) = name.split_once('/') {
            return rest;
        }
    }
    name
}

/// A resolved package in the dependency graph.
///
/// `dependencies` maps dependency name to the version range as declared,
/// not the version it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageNode {
    #[serde(flatten)]
    pub package: Package,
    /// Tarball download URL from the lock-file (`resolved`).
    pub resolved: Option<String>,
    /// Subresource-integrity digest from the lock-file.
    pub integrity: Option<String>,
    pub dependencies: BTreeMap<String, String>,
}

impl PackageNode {
    pub fn id(&self) -> String {
        self.package.id()
    }

    pub fn tarball_url(&self) -> String {
        match &self.resolved {
            Some(url) if !url.is_empty() => url.clone(),
            _ => self.package.canonical_tarball_url(),
        }
    }
}

/// Immutable dependency DAG for one analysis run.
///
/// Shared sub-dependencies collapse to a single node keyed by `name@version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub root: Package,
    pub nodes: BTreeMap<String, PackageNode>,
    /// Hoisted (top-level `node_modules/<name>`) copy of each name.
    #[serde(default)]
    pub hoisted: BTreeMap<String, String>,
    /// Install path (`node_modules/a/node_modules/b`) -> node id. The root
    /// sits at `""`.
    #[serde(default)]
    pub locations: BTreeMap<String, String>,
}

impl DependencyGraph {
    pub fn root_node(&self) -> Option<&PackageNode> {
        self.nodes.get(&self.root.id())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&PackageNode> {
        self.nodes.get(id)
    }

    /// Every node except the root, in id order.
    pub fn non_root_nodes(&self) -> impl Iterator<Item = &PackageNode> {
        let root_id = self.root.id();
        self.nodes.values().filter(move |n| n.id() != root_id)
    }

    /// Resolves a dependency name to a node: the hoisted copy if there is one,
    /// otherwise the first node of that name in id order.
    pub fn resolve_name(&self, name: &str) -> Option<&PackageNode> {
        let root_id = self.root.id();
        if let Some(node) = self.hoisted.get(name).and_then(|id| self.nodes.get(id)) {
            return Some(node);
        }
        self.nodes
            .values()
            .find(|n| n.package.name == name && n.id() != root_id)
    }

    /// The root's declared dependencies resolved to nodes.
    pub fn direct_dependencies(&self) -> Vec<&PackageNode> {
        let Some(root) = self.root_node() else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        root.dependencies
            .keys()
            .filter_map(|name| self.resolve_name(name))
            .filter(|node| seen.insert(node.id()))
            .collect()
    }

    /// Install path that `name` resolves to when required from the package
    /// installed at `path`: the nearest `node_modules/<name>` walking up
    /// from `path` to the project root.
    pub fn resolve_from(&self, path: &str, name: &str) -> Option<String> {
        let mut base = path;
        loop {
            let candidate = if base.is_empty() {
                format!("node_modules/{}", name)
            } else {
                format!("{}/node_modules/{}", base, name)
            };
            if self.locations.contains_key(&candidate) {
                return Some(candidate);
            }
            if base.is_empty() {
                return None;
            }
            base = base.rfind("/node_modules/").map_or("", |i| &base[..i]);
        }
    }

    /// Ids of every node reachable from `id`, excluding `id` itself.
    ///
    /// Follows install-path nesting when the graph carries locations, so a
    /// private nested copy is reported instead of the hoisted one.
    pub fn transitive_closure(&self, id: &str) -> BTreeSet<String> {
        if self.locations.is_empty() {
            return self.closure_by_name(id);
        }
        let mut visited: BTreeSet<&str> = self
            .locations
            .iter()
            .filter(|(_, node_id)| node_id.as_str() == id)
            .map(|(path, _)| path.as_str())
            .collect();
        let mut queue: VecDeque<String> = visited.iter().map(|p| p.to_string()).collect();
        let mut reached = BTreeSet::new();

        while let Some(path) = queue.pop_front() {
            let Some(node) = self.locations.get(&path).and_then(|i| self.nodes.get(i)) else {
                continue;
            };
            for name in node.dependencies.keys() {
                let Some(dep_path) = self.resolve_from(&path, name) else {
                    continue;
                };
                let Some((stored, dep_id)) = self.locations.get_key_value(&dep_path) else {
                    continue;
                };
                if visited.insert(stored.as_str()) {
                    if dep_id != id {
                        reached.insert(dep_id.clone());
                    }
                    queue.push_back(dep_path);
                }
            }
        }
        reached
    }

    fn closure_by_name(&self, id: &str) -> BTreeSet<String> {
        let mut reached = BTreeSet::new();
        let mut queue: VecDeque<&PackageNode> = self.nodes.get(id).into_iter().collect();
        while let Some(node) = queue.pop_front() {
            for name in node.dependencies.keys() {
                if let Some(dep) = self.resolve_name(name) {
                    let dep_id = dep.id();
                    if dep_id != id && reached.insert(dep_id) {
                        queue.push_back(dep);
                    }
                }
            }
        }
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_identity_and_paths() {
        let pkg = Package::new("@types/node", "20.1.0");
        assert_eq!(pkg.id(), "@types/node@20.1.0");
        assert_eq!(pkg.unscoped_name(), "node");
        assert_eq!(pkg.slug(), "types__node@20.1.0");
        assert_eq!(pkg.registry_path(), "@types%2fnode");
        assert_eq!(
            pkg.canonical_tarball_url(),
            "https://registry.npmjs.org/@types/node/-/node-20.1.0.tgz"
        );

        let plain = Package::new("lodash", "4.17.21");
        assert_eq!(plain.slug(), "lodash@4.17.21");
        assert_eq!(plain.registry_path(), "lodash");
    }

    #[test]
    fn test_tarball_url_falls_back_to_canonical() {
        let node = PackageNode {
            package: Package::new("left-pad", "1.3.0"),
            resolved: None,
            integrity: None,
            dependencies: BTreeMap::new(),
        };
        assert_eq!(
            node.tarball_url(),
            "https://registry.npmjs.org/left-pad/-/left-pad-1.3.0.tgz"
        );
    }
}

//! Graph construction and validation.
//!
//! [`Graph::build`] derives every edge with the dependency extractor,
//! resolves provider references, and rejects cycles before anything runs.
//! The resulting graph is immutable and shared read-only during a walk.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt::Write;
use tracing::debug;

use crate::error::{Result, StructuralError};

use super::node::{Node, NodeKind};
use super::reference;

/// A validated dependency graph for one planning cycle.
#[derive(Debug, Clone)]
pub struct Graph {
    /// Nodes sorted by stable name.
    nodes: Vec<Node>,
    /// Stable name to position in `nodes`.
    index: HashMap<String, usize>,
    /// Dependencies of each node, sorted.
    dependencies: Vec<Vec<usize>>,
    /// Direct dependents of each node, sorted.
    dependents: Vec<Vec<usize>>,
    /// Resolved provider node for resources and data sources.
    providers: HashMap<usize, usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl Graph {
    /// Builds and validates a graph from a node set.
    ///
    /// # Errors
    ///
    /// Returns a structural error on duplicate names, unresolved references,
    /// unresolved providers or cycles, and a configuration error on
    /// malformed references.
    pub fn build(nodes: impl IntoIterator<Item = Node>) -> Result<Self> {
        let mut nodes: Vec<Node> = nodes.into_iter().collect();
        nodes.sort_by(|a, b| a.name().cmp(b.name()));

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.name().to_string(), i).is_some() {
                return Err(StructuralError::DuplicateNode {
                    name: node.name().to_string(),
                }
                .into());
            }
        }

        let exists = |name: &str| index.contains_key(name);
        let mut dependencies: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
        let mut providers = HashMap::new();

        for (i, node) in nodes.iter().enumerate() {
            for dep in reference::dependencies(node, exists)? {
                if let Some(&j) = index.get(&dep) {
                    dependencies[i].insert(j);
                }
            }

            if let Some(key) = node.provider_ref() {
                let provider = resolve_provider(node, key, &index)?;
                providers.insert(i, provider);
                dependencies[i].insert(provider);
            }
        }

        let dependencies: Vec<Vec<usize>> = dependencies
            .into_iter()
            .map(|deps| deps.into_iter().collect())
            .collect();

        let mut dependents = vec![Vec::new(); nodes.len()];
        for (i, deps) in dependencies.iter().enumerate() {
            for &d in deps {
                dependents[d].push(i);
            }
        }

        let graph = Self {
            nodes,
            index,
            dependencies,
            dependents,
            providers,
        };

        if let Some(path) = graph.find_cycle() {
            return Err(StructuralError::Cycle { path }.into());
        }

        debug!(
            "Built graph with {} nodes and {} edges",
            graph.len(),
            graph.edge_count()
        );
        Ok(graph)
    }

    /// Depth-first white/gray/black coloring; returns the first cycle found.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut colors = vec![Color::White; self.nodes.len()];
        let mut stack: Vec<usize> = Vec::new();

        for start in 0..self.nodes.len() {
            if colors[start] == Color::White {
                if let Some(cycle) = self.visit_for_cycle(start, &mut colors, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit_for_cycle(
        &self,
        node: usize,
        colors: &mut [Color],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        colors[node] = Color::Gray;
        stack.push(node);

        for &dep in &self.dependencies[node] {
            match colors[dep] {
                Color::Gray => {
                    let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut path: Vec<String> = stack[start..]
                        .iter()
                        .map(|&n| self.nodes[n].name().to_string())
                        .collect();
                    path.push(self.nodes[dep].name().to_string());
                    return Some(path);
                }
                Color::White => {
                    if let Some(cycle) = self.visit_for_cycle(dep, colors, stack) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }

        stack.pop();
        colors[node] = Color::Black;
        None
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.dependencies.iter().map(Vec::len).sum()
    }

    /// Returns all nodes sorted by name.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Looks up a node by stable name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Returns true if the graph contains `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Returns the direct dependencies of a node.
    #[must_use]
    pub fn dependencies(&self, name: &str) -> Vec<&Node> {
        self.index
            .get(name)
            .map(|&i| self.dependencies[i].iter().map(|&d| &self.nodes[d]).collect())
            .unwrap_or_default()
    }

    /// Returns the direct dependents of a node.
    #[must_use]
    pub fn dependents(&self, name: &str) -> Vec<&Node> {
        self.index
            .get(name)
            .map(|&i| self.dependents[i].iter().map(|&d| &self.nodes[d]).collect())
            .unwrap_or_default()
    }

    /// Returns every node `name` transitively depends on.
    #[must_use]
    pub fn ancestors(&self, name: &str) -> BTreeSet<String> {
        self.closure(name, &self.dependencies)
    }

    /// Returns every node that transitively depends on `name`.
    #[must_use]
    pub fn descendants(&self, name: &str) -> BTreeSet<String> {
        self.closure(name, &self.dependents)
    }

    fn closure(&self, name: &str, adjacency: &[Vec<usize>]) -> BTreeSet<String> {
        let Some(&start) = self.index.get(name) else {
            return BTreeSet::new();
        };
        self.closure_indices(start, adjacency)
            .into_iter()
            .map(|i| self.nodes[i].name().to_string())
            .collect()
    }

    fn closure_indices(&self, start: usize, adjacency: &[Vec<usize>]) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = adjacency[start].iter().copied().collect();
        while let Some(n) = queue.pop_front() {
            if seen.insert(n) {
                queue.extend(adjacency[n].iter().copied());
            }
        }
        seen
    }

    /// Returns the provider node that executes a resource or data source.
    #[must_use]
    pub fn provider_of(&self, name: &str) -> Option<&Node> {
        let i = self.index.get(name)?;
        self.providers.get(i).map(|&p| &self.nodes[p])
    }

    /// Returns nodes in a topological order, ties broken by name.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&Node> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> =
            (0..self.nodes.len()).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(i) = ready.pop_first() {
            order.push(&self.nodes[i]);
            for &d in &self.dependents[i] {
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    ready.insert(d);
                }
            }
        }
        order
    }

    /// Returns every edge as `(from, to)`, meaning `from` depends on `to`, sorted.
    #[must_use]
    pub fn edges(&self) -> Vec<(&str, &str)> {
        let mut edges: Vec<(&str, &str)> = self
            .dependencies
            .iter()
            .enumerate()
            .flat_map(|(i, deps)| {
                deps.iter()
                    .map(move |&d| (self.nodes[i].name(), self.nodes[d].name()))
            })
            .collect();
        edges.sort_unstable();
        edges
    }

    /// Renders the graph in Graphviz DOT format.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph {\n  compound = \"true\"\n  newrank = \"true\"\n");
        for node in &self.nodes {
            let shape = match node.kind() {
                NodeKind::Resource => "box",
                NodeKind::DataSource => "cylinder",
                NodeKind::Provider => "diamond",
                NodeKind::Variable | NodeKind::Output => "note",
                NodeKind::ModuleCall => "folder",
            };
            let name = node.name();
            let _ = writeln!(out, "  \"{name}\" [label = \"{name}\", shape = \"{shape}\"]");
        }
        for (from, to) in self.edges() {
            let _ = writeln!(out, "  \"{from}\" -> \"{to}\"");
        }
        out.push_str("}\n");
        out
    }

    pub(crate) fn dependency_indices(&self, i: usize) -> &[usize] {
        &self.dependencies[i]
    }

    pub(crate) fn dependent_indices(&self, i: usize) -> &[usize] {
        &self.dependents[i]
    }

    pub(crate) fn descendant_indices(&self, i: usize) -> BTreeSet<usize> {
        self.closure_indices(i, &self.dependents)
    }
}

/// Finds the provider node for `key` in the node's module or an ancestor.
fn resolve_provider(node: &Node, key: &str, index: &HashMap<String, usize>) -> Result<usize> {
    let relative = format!("provider.{key}");
    node.module_path()
        .scopes()
        .into_iter()
        .find_map(|scope| index.get(&scope.qualify(&relative)).copied())
        .ok_or_else(|| {
            StructuralError::UnresolvedProvider {
                node: node.name().to_string(),
                provider: key.to_string(),
            }
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TerragraphError;
    use crate::graph::node::ModulePath;
    use serde_json::json;

    fn null_provider() -> Node {
        Node::provider("null", None, ModulePath::root(), json!({}))
    }

    fn res(name: &str, config: serde_json::Value) -> Node {
        Node::resource("null_resource", name, ModulePath::root(), config)
    }

    #[test]
    fn test_build_acyclic_graph() {
        let graph = Graph::build(vec![
            null_provider(),
            res("a", json!({})),
            res("b", json!({"x": "${null_resource.a.id}"})),
            res("c", json!({"x": "${null_resource.b.id}"})),
        ])
        .unwrap();

        assert_eq!(graph.len(), 4);
        let order: Vec<&str> = graph.topological_order().iter().map(|n| n.name()).collect();
        assert_eq!(
            order,
            vec!["provider.null", "null_resource.a", "null_resource.b", "null_resource.c"]
        );
        assert_eq!(graph.provider_of("null_resource.a").map(Node::name), Some("provider.null"));
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let graph = Graph::build(vec![
            null_provider(),
            res("a", json!({})),
            res("b", json!({"x": "${null_resource.a.id}"})),
            res("c", json!({"x": "${null_resource.b.id}"})),
            res("d", json!({})),
        ])
        .unwrap();

        let desc = graph.descendants("null_resource.a");
        assert_eq!(
            desc.into_iter().collect::<Vec<_>>(),
            vec!["null_resource.b", "null_resource.c"]
        );

        let anc = graph.ancestors("null_resource.c");
        assert!(anc.contains("null_resource.a"));
        assert!(anc.contains("provider.null"));
        assert!(!anc.contains("null_resource.d"));
    }

    #[test]
    fn test_cycle_names_every_node_on_it() {
        let err = Graph::build(vec![
            null_provider(),
            res("a", json!({"x": "${null_resource.c.id}"})),
            res("b", json!({"x": "${null_resource.a.id}"})),
            res("c", json!({"x": "${null_resource.b.id}"})),
        ])
        .unwrap_err();

        let TerragraphError::Structural(StructuralError::Cycle { path }) = err else {
            panic!("expected cycle, got {err}");
        };
        assert_eq!(path.first(), path.last());
        for name in ["null_resource.a", "null_resource.b", "null_resource.c"] {
            assert!(path.iter().any(|p| p == name), "{name} missing from {path:?}");
        }
        assert!(!path.iter().any(|p| p == "provider.null"));
    }

    #[test]
    fn test_cycle_through_depends_on() {
        let err = Graph::build(vec![
            null_provider(),
            res("a", json!({})).with_depends_on(["null_resource.b"]),
            res("b", json!({})).with_depends_on(["null_resource.a"]),
        ])
        .unwrap_err();
        assert!(matches!(err, TerragraphError::Structural(StructuralError::Cycle { .. })));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let self_interpolation = vec![
            null_provider(),
            res("a", json!({"x": "${null_resource.a.id}"})),
        ];
        let self_depends_on = vec![
            null_provider(),
            res("a", json!({})).with_depends_on(["null_resource.a"]),
        ];

        for nodes in [self_interpolation, self_depends_on] {
            let err = Graph::build(nodes).unwrap_err();
            let TerragraphError::Structural(StructuralError::Cycle { path }) = err else {
                panic!("expected cycle, got {err}");
            };
            assert_eq!(path, vec!["null_resource.a", "null_resource.a"]);
        }
    }

    #[test]
    fn test_unresolved_provider() {
        let web = Node::resource("aws_instance", "web", ModulePath::root(), json!({}));
        let err = Graph::build(vec![web]).unwrap_err();
        let TerragraphError::Structural(StructuralError::UnresolvedProvider { provider, .. }) = err
        else {
            panic!("expected unresolved provider, got {err}");
        };
        assert_eq!(provider, "aws");
    }

    #[test]
    fn test_provider_inherited_from_ancestor_module() {
        let graph = Graph::build(vec![
            null_provider(),
            Node::module_call("child", ModulePath::root(), json!({})),
            Node::resource("null_resource", "x", ModulePath::new(["child"]), json!({})),
        ])
        .unwrap();
        assert_eq!(
            graph.provider_of("module.child.null_resource.x").map(Node::name),
            Some("provider.null")
        );
    }

    #[test]
    fn test_duplicate_node() {
        let err = Graph::build(vec![null_provider(), null_provider()]).unwrap_err();
        assert!(matches!(err, TerragraphError::Structural(StructuralError::DuplicateNode { .. })));
    }

    #[test]
    fn test_edges_are_sorted_and_dot_renders_them() {
        let graph = Graph::build(vec![
            null_provider(),
            res("b", json!({"x": "${null_resource.a.id}"})),
            res("a", json!({})),
        ])
        .unwrap();

        let edges = graph.edges();
        assert_eq!(
            edges,
            vec![
                ("null_resource.a", "provider.null"),
                ("null_resource.b", "null_resource.a"),
                ("null_resource.b", "provider.null"),
            ]
        );

        let dot = graph.to_dot();
        assert!(dot.contains("\"null_resource.b\" -> \"null_resource.a\""));
    }
}

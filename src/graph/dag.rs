//! Directed acyclic dependency graph.
//!
//! Edges point from a resource to the resources it depends on. Depth is the
//! length of the longest dependency chain below a node, so every node sits
//! strictly deeper than all of its dependencies.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::model::{ResourceId, ResourceNode};

/// Dependency edges keyed by node: node -> the nodes it depends on.
pub type EdgeMap = BTreeMap<ResourceId, BTreeSet<ResourceId>>;

/// A validated, acyclic resource graph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// Nodes by identity.
    nodes: BTreeMap<ResourceId, ResourceNode>,
    /// Reverse edges: node -> nodes that depend on it.
    dependents: EdgeMap,
    /// Longest-chain depth of each node.
    depths: BTreeMap<ResourceId, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl Graph {
    /// Assembles a graph from nodes already checked for missing targets and
    /// cycles.
    pub(crate) fn from_validated(nodes: BTreeMap<ResourceId, ResourceNode>) -> Self {
        let edges: EdgeMap = nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.depends_on.clone()))
            .collect();

        let mut dependents: EdgeMap =
            nodes.keys().map(|id| (id.clone(), BTreeSet::new())).collect();
        for (id, deps) in &edges {
            for dep in deps {
                if let Some(set) = dependents.get_mut(dep) {
                    set.insert(id.clone());
                }
            }
        }

        let depths = compute_depths(&edges);

        Self {
            nodes,
            dependents,
            depths,
        }
    }

    /// Returns a node by identity.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    /// Returns true if the graph holds the identity.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.nodes.contains_key(id)
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

    /// Iterates nodes in identity order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// Iterates the direct dependencies of a node.
    pub fn dependencies(&self, id: &ResourceId) -> impl Iterator<Item = &ResourceId> {
        self.nodes
            .get(id)
            .into_iter()
            .flat_map(|node| node.depends_on.iter())
    }

    /// Iterates the nodes that directly depend on `id`.
    pub fn dependents(&self, id: &ResourceId) -> impl Iterator<Item = &ResourceId> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// Returns the depth of a node.
    #[must_use]
    pub fn depth(&self, id: &ResourceId) -> Option<usize> {
        self.depths.get(id).copied()
    }

    /// Returns every node, dependencies before dependents.
    ///
    /// Nodes at the same depth are ordered by logical name, then kind.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&ResourceNode> {
        order_by_depth(&self.depths, false)
            .into_iter()
            .filter_map(|id| self.nodes.get(&id))
            .collect()
    }

    /// Returns true if `id` transitively depends on `target`.
    #[must_use]
    pub fn depends_transitively(&self, id: &ResourceId, target: &ResourceId) -> bool {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&ResourceId> = self.dependencies(id).collect();

        while let Some(next) = queue.pop_front() {
            if next == target {
                return true;
            }
            if seen.insert(next) {
                queue.extend(self.dependencies(next));
            }
        }
        false
    }
}

/// Finds a cycle using a depth-first walk with white/gray/black marking.
///
/// Reaching a gray node from a gray node closes a cycle. The returned path
/// starts and ends at that node. Edges to unknown nodes are ignored.
#[must_use]
pub fn find_cycle(edges: &EdgeMap) -> Option<Vec<ResourceId>> {
    let mut color: HashMap<&ResourceId, Color> =
        edges.keys().map(|id| (id, Color::White)).collect();

    for (root, root_deps) in edges {
        if color.get(root) != Some(&Color::White) {
            continue;
        }

        color.insert(root, Color::Gray);
        let mut stack = vec![(root, root_deps.iter())];

        loop {
            let Some((node, deps)) = stack.last_mut() else {
                break;
            };
            let node: &ResourceId = *node;

            match deps.next() {
                Some(next) => match color.get(next).copied() {
                    Some(Color::White) => {
                        color.insert(next, Color::Gray);
                        if let Some(next_deps) = edges.get(next) {
                            stack.push((next, next_deps.iter()));
                        }
                    }
                    Some(Color::Gray) => {
                        let start = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                        let mut cycle: Vec<ResourceId> =
                            stack[start..].iter().map(|(n, _)| (*n).clone()).collect();
                        cycle.push(next.clone());
                        return Some(cycle);
                    }
                    Some(Color::Black) | None => {}
                },
                None => {
                    color.insert(node, Color::Black);
                    stack.pop();
                }
            }
        }
    }

    None
}

/// Computes longest-chain depths, ignoring edges to unknown nodes.
///
/// Nodes caught in a cycle keep the depth reached before the cycle blocked
/// them; callers that need a strict order check for cycles first.
#[must_use]
pub fn compute_depths(edges: &EdgeMap) -> BTreeMap<ResourceId, usize> {
    let mut remaining: HashMap<&ResourceId, usize> = HashMap::new();
    let mut reverse: HashMap<&ResourceId, Vec<&ResourceId>> = HashMap::new();

    for (id, deps) in edges {
        let known: Vec<_> = deps.iter().filter(|d| edges.contains_key(*d)).collect();
        remaining.insert(id, known.len());
        for dep in known {
            reverse.entry(dep).or_default().push(id);
        }
    }

    let mut depths: BTreeMap<ResourceId, usize> =
        edges.keys().map(|id| (id.clone(), 0)).collect();
    let mut queue: VecDeque<&ResourceId> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();

    while let Some(id) = queue.pop_front() {
        let depth = depths.get(id).copied().unwrap_or(0);
        for dependent in reverse.get(id).into_iter().flatten() {
            if let Some(d) = depths.get_mut(*dependent) {
                *d = (*d).max(depth + 1);
            }
            if let Some(count) = remaining.get_mut(*dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    queue.push_back(*dependent);
                }
            }
        }
    }

    depths
}

/// Orders identities by depth, then logical name, then kind.
///
/// `descending` reverses the depth order only; the name tie-break stays
/// ascending either way.
#[must_use]
pub fn order_by_depth(depths: &BTreeMap<ResourceId, usize>, descending: bool) -> Vec<ResourceId> {
    let mut ids: Vec<(&ResourceId, usize)> = depths.iter().map(|(id, d)| (id, *d)).collect();
    ids.sort_by(|(a, da), (b, db)| {
        let by_depth = if descending { db.cmp(da) } else { da.cmp(db) };
        by_depth
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.kind.cmp(&b.kind))
    });
    ids.into_iter().map(|(id, _)| id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ResourceId {
        s.parse().expect("identity")
    }

    fn edges(pairs: &[(&str, &[&str])]) -> EdgeMap {
        pairs
            .iter()
            .map(|(node, deps)| (id(node), deps.iter().map(|d| id(d)).collect()))
            .collect()
    }

    #[test]
    fn test_no_cycle_in_chain() {
        let e = edges(&[("A.a", &[]), ("B.b", &["A.a"]), ("C.c", &["B.b", "A.a"])]);
        assert!(find_cycle(&e).is_none());
    }

    #[test]
    fn test_cycle_found() {
        let e = edges(&[("A.a", &["C.c"]), ("B.b", &["A.a"]), ("C.c", &["B.b"])]);
        let cycle = find_cycle(&e).expect("cycle");
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let e = edges(&[("A.a", &["A.a"])]);
        let cycle = find_cycle(&e).expect("cycle");
        assert_eq!(cycle, vec![id("A.a"), id("A.a")]);
    }

    #[test]
    fn test_depths_use_longest_chain() {
        let e = edges(&[("A.a", &[]), ("B.b", &["A.a"]), ("C.c", &["B.b", "A.a"])]);
        let depths = compute_depths(&e);
        assert_eq!(depths[&id("A.a")], 0);
        assert_eq!(depths[&id("B.b")], 1);
        assert_eq!(depths[&id("C.c")], 2);
    }

    #[test]
    fn test_unknown_edges_ignored() {
        let e = edges(&[("A.a", &["Gone.x"])]);
        let depths = compute_depths(&e);
        assert_eq!(depths[&id("A.a")], 0);
    }

    #[test]
    fn test_order_ties_break_by_name() {
        let e = edges(&[
            ("Zone.b", &[]),
            ("Api.c", &[]),
            ("Bucket.a", &[]),
            ("Service.x", &["Zone.b"]),
        ]);
        let depths = compute_depths(&e);

        let names = |descending| -> Vec<String> {
            order_by_depth(&depths, descending).iter().map(ToString::to_string).collect()
        };

        let asc = names(false);
        assert_eq!(asc, vec!["Bucket.a", "Zone.b", "Api.c", "Service.x"]);

        let desc = names(true);
        assert_eq!(desc, vec!["Service.x", "Bucket.a", "Zone.b", "Api.c"]);
    }
}

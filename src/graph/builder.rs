//! Graph builder.
//!
//! Turns resource declarations into a validated [`Graph`]: every attribute is
//! scanned for reference expressions, each reference and explicit dependency
//! becomes an edge, and the result is checked for missing targets and cycles.
//! Building is a pure transform.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::ResourceDecl;
use crate::error::GraphError;
use crate::model::{is_valid_kind, is_valid_resource_name, AttrValue, ResourceId, ResourceNode};

use super::dag::{find_cycle, EdgeMap, Graph};

/// Builds dependency graphs from declarations.
#[derive(Debug, Default, Clone, Copy)]
pub struct GraphBuilder;

impl GraphBuilder {
    /// Creates a new graph builder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Builds a graph from declarations.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateIdentity` or `InvalidReference` for malformed input,
    /// `UnresolvedReference` if an edge names an undeclared resource, and
    /// `Cycle` if the edges form a cycle.
    pub fn build<'a, I>(&self, declarations: I) -> Result<Graph, GraphError>
    where
        I: IntoIterator<Item = &'a ResourceDecl>,
    {
        let mut nodes: BTreeMap<ResourceId, ResourceNode> = BTreeMap::new();

        for decl in declarations {
            let node = Self::build_node(decl)?;
            if nodes.contains_key(&node.id) {
                return Err(GraphError::DuplicateIdentity {
                    resource: node.id.to_string(),
                });
            }
            nodes.insert(node.id.clone(), node);
        }

        Self::check_targets(&nodes)?;

        let edges: EdgeMap = nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.depends_on.clone()))
            .collect();

        if let Some(cycle) = find_cycle(&edges) {
            return Err(GraphError::Cycle {
                cycle: cycle.iter().map(ToString::to_string).collect(),
            });
        }

        let graph = Graph::from_validated(nodes);
        debug!("Built dependency graph with {} nodes", graph.len());
        Ok(graph)
    }

    /// Parses one declaration into a node with its full dependency set.
    fn build_node(decl: &ResourceDecl) -> Result<ResourceNode, GraphError> {
        let id = Self::checked_id(decl)?;

        let mut attributes = BTreeMap::new();
        for (key, raw) in &decl.attributes {
            let value = AttrValue::parse(raw).map_err(|(expression, reason)| {
                GraphError::InvalidReference {
                    resource: id.to_string(),
                    expression,
                    reason,
                }
            })?;
            attributes.insert(key.clone(), value);
        }

        let mut depends_on = BTreeSet::new();
        for dep in &decl.depends_on {
            let target: ResourceId =
                dep.parse()
                    .map_err(|reason| GraphError::InvalidReference {
                        resource: id.to_string(),
                        expression: dep.clone(),
                        reason,
                    })?;
            depends_on.insert(target);
        }

        let mut node = ResourceNode {
            id,
            ensure: decl.ensure,
            attributes,
            depends_on,
        };

        let referenced: Vec<ResourceId> =
            node.references().into_iter().map(|r| r.target.clone()).collect();
        node.depends_on.extend(referenced);

        Ok(node)
    }

    /// Identities end up as state file stems, so they must parse back.
    fn checked_id(decl: &ResourceDecl) -> Result<ResourceId, GraphError> {
        let invalid = |reason: &str| GraphError::InvalidIdentity {
            kind: decl.kind.clone(),
            name: decl.name.clone(),
            reason: reason.to_string(),
        };

        if !is_valid_kind(&decl.kind) {
            return Err(invalid(
                "kind must be a letter followed by letters, digits or '_'",
            ));
        }
        if !is_valid_resource_name(&decl.name) {
            return Err(invalid("name may only contain letters, digits, '-' or '_'"));
        }
        Ok(decl.id())
    }

    /// Fails on the first edge (in identity order) naming an undeclared node.
    fn check_targets(nodes: &BTreeMap<ResourceId, ResourceNode>) -> Result<(), GraphError> {
        for node in nodes.values() {
            if let Some(missing) = node.depends_on.iter().find(|dep| !nodes.contains_key(*dep)) {
                return Err(GraphError::UnresolvedReference {
                    resource: node.id.to_string(),
                    target: missing.to_string(),
                });
            }
        }
        Ok(())
    }
}

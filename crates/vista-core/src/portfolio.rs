//! The resolved portfolio tree.
//!
//! Portfolios are immutable once built. Children are held behind [`Arc`] so
//! that traversal can hand out targets for nodes and positions without
//! copying subtrees.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::identifiers::{ExternalIdBundle, UniqueId};

/// A tradable security, as referenced by positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Security {
    unique_id: UniqueId,
    security_type: String,
    name: String,
    external_ids: ExternalIdBundle,
}

impl Security {
    /// Creates a security.
    pub fn new(
        unique_id: UniqueId,
        security_type: impl Into<String>,
        name: impl Into<String>,
        external_ids: ExternalIdBundle,
    ) -> Self {
        Self {
            unique_id,
            security_type: security_type.into(),
            name: name.into(),
            external_ids,
        }
    }

    /// Unique identifier.
    pub fn unique_id(&self) -> &UniqueId {
        &self.unique_id
    }

    /// Security type, e.g. `EQUITY` or `BOND`.
    pub fn security_type(&self) -> &str {
        &self.security_type
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// External identifiers.
    pub fn external_ids(&self) -> &ExternalIdBundle {
        &self.external_ids
    }
}

/// A holding of some quantity of a security.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    unique_id: UniqueId,
    quantity: Decimal,
    security_link: ExternalIdBundle,
    security: Option<Arc<Security>>,
}

impl Position {
    /// Creates a position whose security has not been resolved.
    pub fn new(unique_id: UniqueId, quantity: Decimal, security_link: ExternalIdBundle) -> Self {
        Self {
            unique_id,
            quantity,
            security_link,
            security: None,
        }
    }

    /// Attaches the resolved security.
    #[must_use]
    pub fn with_security(mut self, security: Arc<Security>) -> Self {
        self.security = Some(security);
        self
    }

    /// Unique identifier.
    pub fn unique_id(&self) -> &UniqueId {
        &self.unique_id
    }

    /// Quantity held.
    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    /// External identifiers of the held security.
    pub fn security_link(&self) -> &ExternalIdBundle {
        &self.security_link
    }

    /// The resolved security, if any.
    pub fn security(&self) -> Option<&Arc<Security>> {
        self.security.as_ref()
    }

    /// Security type of the resolved security.
    pub fn security_type(&self) -> Option<&str> {
        self.security.as_deref().map(Security::security_type)
    }
}

/// A node of the portfolio tree.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioNode {
    unique_id: UniqueId,
    name: String,
    child_nodes: Vec<Arc<PortfolioNode>>,
    positions: Vec<Arc<Position>>,
}

impl PortfolioNode {
    /// Creates an empty node.
    pub fn new(unique_id: UniqueId, name: impl Into<String>) -> Self {
        Self {
            unique_id,
            name: name.into(),
            child_nodes: Vec::new(),
            positions: Vec::new(),
        }
    }

    /// Adds a child node.
    #[must_use]
    pub fn with_child(mut self, child: PortfolioNode) -> Self {
        self.child_nodes.push(Arc::new(child));
        self
    }

    /// Adds a position.
    #[must_use]
    pub fn with_position(mut self, position: Position) -> Self {
        self.positions.push(Arc::new(position));
        self
    }

    /// Unique identifier.
    pub fn unique_id(&self) -> &UniqueId {
        &self.unique_id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct children.
    pub fn child_nodes(&self) -> &[Arc<PortfolioNode>] {
        &self.child_nodes
    }

    /// Positions held directly at this node.
    pub fn positions(&self) -> &[Arc<Position>] {
        &self.positions
    }

    /// Number of nodes in this subtree, this node included.
    pub fn node_count(&self) -> usize {
        1 + self
            .child_nodes
            .iter()
            .map(|child| child.node_count())
            .sum::<usize>()
    }

    /// Number of positions in this subtree.
    pub fn position_count(&self) -> usize {
        self.positions.len()
            + self
                .child_nodes
                .iter()
                .map(|child| child.position_count())
                .sum::<usize>()
    }

    /// Finds a node in this subtree.
    pub fn find_node(&self, id: &UniqueId) -> Option<&PortfolioNode> {
        if &self.unique_id == id {
            return Some(self);
        }
        self.child_nodes.iter().find_map(|child| child.find_node(id))
    }

    /// Finds a position in this subtree.
    pub fn find_position(&self, id: &UniqueId) -> Option<&Arc<Position>> {
        self.positions
            .iter()
            .find(|p| p.unique_id() == id)
            .or_else(|| {
                self.child_nodes
                    .iter()
                    .find_map(|child| child.find_position(id))
            })
    }
}

/// A named portfolio with its root node.
#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    unique_id: UniqueId,
    name: String,
    root_node: Arc<PortfolioNode>,
}

impl Portfolio {
    /// Creates a portfolio.
    pub fn new(unique_id: UniqueId, name: impl Into<String>, root_node: PortfolioNode) -> Self {
        Self {
            unique_id,
            name: name.into(),
            root_node: Arc::new(root_node),
        }
    }

    /// Unique identifier.
    pub fn unique_id(&self) -> &UniqueId {
        &self.unique_id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root node.
    pub fn root_node(&self) -> &Arc<PortfolioNode> {
        &self.root_node
    }
}

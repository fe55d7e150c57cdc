//! Computation targets: the things functions are applied to.
//!
//! A view refers to targets through a [`ComputationTargetReference`]. The
//! reference is either already a [`ComputationTargetSpecification`] (type
//! plus unique id) or a [`ComputationTargetRequirement`] (type plus external
//! identifiers) that still has to be resolved. Resolution yields a
//! [`ComputationTarget`] carrying the resolved object.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::identifiers::{ExternalIdBundle, UniqueId};
use crate::portfolio::{Portfolio, PortfolioNode, Position, Security};

/// Kinds of computation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComputationTargetType {
    /// A bare identifier with no backing object (curves, market data keys).
    Primitive,
    /// A whole portfolio.
    Portfolio,
    /// A node of a portfolio tree.
    PortfolioNode,
    /// A position.
    Position,
    /// A trade.
    Trade,
    /// A security.
    Security,
}

impl ComputationTargetType {
    /// All target types.
    pub const ALL: [ComputationTargetType; 6] = [
        Self::Primitive,
        Self::Portfolio,
        Self::PortfolioNode,
        Self::Position,
        Self::Trade,
        Self::Security,
    ];

    /// Upper-case name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Primitive => "PRIMITIVE",
            Self::Portfolio => "PORTFOLIO",
            Self::PortfolioNode => "PORTFOLIO_NODE",
            Self::Position => "POSITION",
            Self::Trade => "TRADE",
            Self::Security => "SECURITY",
        }
    }
}

impl fmt::Display for ComputationTargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A resolved target: type and unique identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComputationTargetSpecification {
    target_type: ComputationTargetType,
    unique_id: UniqueId,
}

impl ComputationTargetSpecification {
    /// Creates a specification.
    pub fn new(target_type: ComputationTargetType, unique_id: UniqueId) -> Self {
        Self {
            target_type,
            unique_id,
        }
    }

    /// Shorthand for a primitive target.
    pub fn primitive(unique_id: UniqueId) -> Self {
        Self::new(ComputationTargetType::Primitive, unique_id)
    }

    /// Target type.
    pub fn target_type(&self) -> ComputationTargetType {
        self.target_type
    }

    /// Unique identifier.
    pub fn unique_id(&self) -> &UniqueId {
        &self.unique_id
    }

    /// The same target referenced by its unversioned identifier.
    #[must_use]
    pub fn to_latest(&self) -> Self {
        Self::new(self.target_type, self.unique_id.to_latest())
    }

    /// Wraps this specification as a reference.
    pub fn to_reference(&self) -> ComputationTargetReference {
        ComputationTargetReference::Specification(self.clone())
    }
}

impl fmt::Display for ComputationTargetSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CTSpec[{}, {}]", self.target_type, self.unique_id)
    }
}

/// An unresolved target: type and external identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComputationTargetRequirement {
    target_type: ComputationTargetType,
    identifiers: ExternalIdBundle,
}

impl ComputationTargetRequirement {
    /// Creates a requirement.
    pub fn new(target_type: ComputationTargetType, identifiers: ExternalIdBundle) -> Self {
        Self {
            target_type,
            identifiers,
        }
    }

    /// Target type.
    pub fn target_type(&self) -> ComputationTargetType {
        self.target_type
    }

    /// External identifiers.
    pub fn identifiers(&self) -> &ExternalIdBundle {
        &self.identifiers
    }
}

/// Reference to a target, resolved or not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComputationTargetReference {
    /// Already carries a unique identifier.
    Specification(ComputationTargetSpecification),
    /// Carries external identifiers still to be resolved.
    Requirement(ComputationTargetRequirement),
}

impl ComputationTargetReference {
    /// Reference by type and unique id.
    pub fn of(target_type: ComputationTargetType, unique_id: UniqueId) -> Self {
        Self::Specification(ComputationTargetSpecification::new(target_type, unique_id))
    }

    /// Reference by type and external identifiers.
    pub fn of_external(target_type: ComputationTargetType, identifiers: ExternalIdBundle) -> Self {
        Self::Requirement(ComputationTargetRequirement::new(target_type, identifiers))
    }

    /// Target type of the referenced object.
    pub fn target_type(&self) -> ComputationTargetType {
        match self {
            Self::Specification(spec) => spec.target_type(),
            Self::Requirement(req) => req.target_type(),
        }
    }

    /// The specification, if this reference is already resolved.
    pub fn as_specification(&self) -> Option<&ComputationTargetSpecification> {
        match self {
            Self::Specification(spec) => Some(spec),
            Self::Requirement(_) => None,
        }
    }
}

impl From<ComputationTargetSpecification> for ComputationTargetReference {
    fn from(spec: ComputationTargetSpecification) -> Self {
        Self::Specification(spec)
    }
}

impl From<ComputationTargetRequirement> for ComputationTargetReference {
    fn from(req: ComputationTargetRequirement) -> Self {
        Self::Requirement(req)
    }
}

impl fmt::Display for ComputationTargetReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Specification(spec) => write!(f, "{spec}"),
            Self::Requirement(req) => {
                write!(f, "CTReq[{}, {}]", req.target_type, req.identifiers)
            }
        }
    }
}

/// Object backing a resolved target.
#[derive(Debug, Clone)]
pub enum TargetValue {
    /// No backing object.
    Primitive,
    /// A portfolio.
    Portfolio(Arc<Portfolio>),
    /// A portfolio node.
    PortfolioNode(Arc<PortfolioNode>),
    /// A position.
    Position(Arc<Position>),
    /// A security.
    Security(Arc<Security>),
}

/// A resolved target with its backing object.
#[derive(Debug, Clone)]
pub struct ComputationTarget {
    specification: ComputationTargetSpecification,
    value: TargetValue,
}

impl ComputationTarget {
    /// Creates a target from its parts.
    pub fn new(specification: ComputationTargetSpecification, value: TargetValue) -> Self {
        Self {
            specification,
            value,
        }
    }

    /// Primitive target.
    pub fn primitive(unique_id: UniqueId) -> Self {
        Self::new(
            ComputationTargetSpecification::primitive(unique_id),
            TargetValue::Primitive,
        )
    }

    /// Portfolio target.
    pub fn portfolio(portfolio: Arc<Portfolio>) -> Self {
        let spec = ComputationTargetSpecification::new(
            ComputationTargetType::Portfolio,
            portfolio.unique_id().clone(),
        );
        Self::new(spec, TargetValue::Portfolio(portfolio))
    }

    /// Portfolio node target.
    pub fn portfolio_node(node: Arc<PortfolioNode>) -> Self {
        let spec = ComputationTargetSpecification::new(
            ComputationTargetType::PortfolioNode,
            node.unique_id().clone(),
        );
        Self::new(spec, TargetValue::PortfolioNode(node))
    }

    /// Position target.
    pub fn position(position: Arc<Position>) -> Self {
        let spec = ComputationTargetSpecification::new(
            ComputationTargetType::Position,
            position.unique_id().clone(),
        );
        Self::new(spec, TargetValue::Position(position))
    }

    /// Security target.
    pub fn security(security: Arc<Security>) -> Self {
        let spec = ComputationTargetSpecification::new(
            ComputationTargetType::Security,
            security.unique_id().clone(),
        );
        Self::new(spec, TargetValue::Security(security))
    }

    /// Resolved specification.
    pub fn specification(&self) -> &ComputationTargetSpecification {
        &self.specification
    }

    /// Target type.
    pub fn target_type(&self) -> ComputationTargetType {
        self.specification.target_type()
    }

    /// Unique identifier.
    pub fn unique_id(&self) -> &UniqueId {
        self.specification.unique_id()
    }

    /// Backing object.
    pub fn value(&self) -> &TargetValue {
        &self.value
    }

    /// The portfolio, when this target is one.
    pub fn as_portfolio(&self) -> Option<&Arc<Portfolio>> {
        match &self.value {
            TargetValue::Portfolio(p) => Some(p),
            _ => None,
        }
    }

    /// The portfolio node, when this target is one.
    pub fn as_portfolio_node(&self) -> Option<&Arc<PortfolioNode>> {
        match &self.value {
            TargetValue::PortfolioNode(n) => Some(n),
            _ => None,
        }
    }

    /// The position, when this target is one.
    pub fn as_position(&self) -> Option<&Arc<Position>> {
        match &self.value {
            TargetValue::Position(p) => Some(p),
            _ => None,
        }
    }

    /// The security, when this target is one.
    pub fn as_security(&self) -> Option<&Arc<Security>> {
        match &self.value {
            TargetValue::Security(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ComputationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CT[{}]", self.specification)
    }
}

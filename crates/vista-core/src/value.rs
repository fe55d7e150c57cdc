//! Value requirements, value specifications and their properties.
//!
//! A [`ValueRequirement`] asks for a named value on a target subject to
//! constraints. A [`ValueSpecification`] describes a value a function
//! actually produces. Matching the two is done through
//! [`ValueProperties::satisfaction`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::target::{ComputationTargetReference, ComputationTargetSpecification};

/// Well-known property names.
pub struct ValuePropertyNames;

impl ValuePropertyNames {
    /// Identifier of the function producing a value.
    pub const FUNCTION: &'static str = "Function";
    /// Currency of a value.
    pub const CURRENCY: &'static str = "Currency";
    /// Curve used to compute a value.
    pub const CURVE: &'static str = "Curve";
    /// Calculation method.
    pub const CALCULATION_METHOD: &'static str = "CalculationMethod";
}

// =============================================================================
// PROPERTIES
// =============================================================================

/// Values of a single property. An empty set means "any value".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyValues {
    #[serde(default)]
    values: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    optional: bool,
}

impl PropertyValues {
    /// The permitted values; empty for a wildcard.
    pub fn values(&self) -> &BTreeSet<String> {
        &self.values
    }

    /// True when any value is accepted.
    pub fn is_wildcard(&self) -> bool {
        self.values.is_empty()
    }

    /// True when the constraint may be ignored if it cannot be met.
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    fn accepts(&self, other: &PropertyValues) -> bool {
        self.is_wildcard() || other.is_wildcard() || !self.values.is_disjoint(&other.values)
    }
}

/// How well a set of properties meets a set of constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Satisfaction {
    /// Every constraint is met.
    Exact,
    /// Only optional constraints were missed.
    Relaxed,
}

/// A map of property name to permitted values.
///
/// The same type is used for constraints on a requirement and for the
/// properties of a produced value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueProperties(BTreeMap<String, PropertyValues>);

impl ValueProperties {
    /// No properties, no constraints.
    pub fn none() -> Self {
        Self::default()
    }

    /// Starts a builder.
    pub fn builder() -> ValuePropertiesBuilder {
        ValuePropertiesBuilder::default()
    }

    /// Builder pre-populated with these properties.
    pub fn to_builder(&self) -> ValuePropertiesBuilder {
        ValuePropertiesBuilder {
            properties: self.0.clone(),
        }
    }

    /// True when there are no properties.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Property names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Entry for a property.
    pub fn get(&self, name: &str) -> Option<&PropertyValues> {
        self.0.get(name)
    }

    /// Values of a property.
    pub fn values(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.0.get(name).map(PropertyValues::values)
    }

    /// The value of a property holding exactly one value.
    pub fn single_value(&self, name: &str) -> Option<&str> {
        let values = self.values(name)?;
        if values.len() == 1 {
            values.iter().next().map(String::as_str)
        } else {
            None
        }
    }

    /// Checks these constraints against the properties of a produced value.
    ///
    /// A wildcard on either side matches anything. A missing or disjoint
    /// property fails the match unless the constraint is optional, in which
    /// case the match degrades to [`Satisfaction::Relaxed`].
    pub fn satisfaction(&self, properties: &ValueProperties) -> Option<Satisfaction> {
        let mut result = Satisfaction::Exact;
        for (name, constraint) in &self.0 {
            let met = properties
                .0
                .get(name)
                .is_some_and(|produced| produced.accepts(constraint));
            if !met {
                if constraint.optional {
                    result = Satisfaction::Relaxed;
                } else {
                    return None;
                }
            }
        }
        Some(result)
    }

    /// True when the properties meet every constraint exactly.
    pub fn is_satisfied_by(&self, properties: &ValueProperties) -> bool {
        self.satisfaction(properties) == Some(Satisfaction::Exact)
    }

    /// Narrows these produced properties towards the given constraints.
    ///
    /// Wildcard properties take the constrained values, and overlapping value
    /// sets are reduced to their intersection. Constraints naming properties
    /// that are not produced are ignored.
    #[must_use]
    pub fn compose(&self, constraints: &ValueProperties) -> ValueProperties {
        let mut composed = self.0.clone();
        for (name, produced) in &mut composed {
            produced.optional = false;
            let Some(constraint) = constraints.0.get(name) else {
                continue;
            };
            if constraint.is_wildcard() {
                continue;
            }
            if produced.is_wildcard() {
                produced.values = constraint.values.clone();
            } else {
                let common: BTreeSet<String> = produced
                    .values
                    .intersection(&constraint.values)
                    .cloned()
                    .collect();
                if !common.is_empty() {
                    produced.values = common;
                }
            }
        }
        ValueProperties(composed)
    }

    /// Returns a copy with the producing function stamped on it.
    #[must_use]
    pub fn with_function(&self, function_id: &str) -> ValueProperties {
        self.to_builder()
            .without(ValuePropertyNames::FUNCTION)
            .with(ValuePropertyNames::FUNCTION, function_id)
            .build()
    }
}

impl fmt::Display for ValueProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, entry)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{name}=")?;
            if entry.is_wildcard() {
                write!(f, "*")?;
            } else {
                let values: Vec<&str> = entry.values.iter().map(String::as_str).collect();
                write!(f, "[{}]", values.join(","))?;
            }
            if entry.optional {
                write!(f, "?")?;
            }
        }
        write!(f, "}}")
    }
}

/// Builder for [`ValueProperties`].
#[derive(Debug, Clone, Default)]
pub struct ValuePropertiesBuilder {
    properties: BTreeMap<String, PropertyValues>,
}

impl ValuePropertiesBuilder {
    /// Adds a value to a property.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties
            .entry(name.into())
            .or_default()
            .values
            .insert(value.into());
        self
    }

    /// Adds several values to a property.
    #[must_use]
    pub fn with_values<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.properties.entry(name.into()).or_default();
        entry.values.extend(values.into_iter().map(Into::into));
        self
    }

    /// Declares a property accepting any value.
    #[must_use]
    pub fn with_any(mut self, name: impl Into<String>) -> Self {
        self.properties.entry(name.into()).or_default().values.clear();
        self
    }

    /// Marks a property as optional, adding it as a wildcard if absent.
    #[must_use]
    pub fn with_optional(mut self, name: impl Into<String>) -> Self {
        self.properties.entry(name.into()).or_default().optional = true;
        self
    }

    /// Removes a property.
    #[must_use]
    pub fn without(mut self, name: &str) -> Self {
        self.properties.remove(name);
        self
    }

    /// Builds the properties.
    pub fn build(self) -> ValueProperties {
        ValueProperties(self.properties)
    }
}

// =============================================================================
// REQUIREMENTS AND SPECIFICATIONS
// =============================================================================

/// A request for a named value on a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueRequirement {
    value_name: String,
    target: ComputationTargetReference,
    #[serde(default)]
    constraints: ValueProperties,
}

impl ValueRequirement {
    /// Creates an unconstrained requirement.
    pub fn new(value_name: impl Into<String>, target: impl Into<ComputationTargetReference>) -> Self {
        Self {
            value_name: value_name.into(),
            target: target.into(),
            constraints: ValueProperties::none(),
        }
    }

    /// Sets the constraints.
    #[must_use]
    pub fn with_constraints(mut self, constraints: ValueProperties) -> Self {
        self.constraints = constraints;
        self
    }

    /// Value name.
    pub fn value_name(&self) -> &str {
        &self.value_name
    }

    /// Target reference.
    pub fn target(&self) -> &ComputationTargetReference {
        &self.target
    }

    /// Constraints.
    pub fn constraints(&self) -> &ValueProperties {
        &self.constraints
    }
}

impl fmt::Display for ValueRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ValueReq[{}, {}, {}]",
            self.value_name, self.target, self.constraints
        )
    }
}

/// A value produced by a function on a resolved target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueSpecification {
    value_name: String,
    target: ComputationTargetSpecification,
    properties: ValueProperties,
}

impl ValueSpecification {
    /// Creates a specification.
    pub fn new(
        value_name: impl Into<String>,
        target: ComputationTargetSpecification,
        properties: ValueProperties,
    ) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            properties,
        }
    }

    /// Value name.
    pub fn value_name(&self) -> &str {
        &self.value_name
    }

    /// Target.
    pub fn target(&self) -> &ComputationTargetSpecification {
        &self.target
    }

    /// Properties.
    pub fn properties(&self) -> &ValueProperties {
        &self.properties
    }

    /// Function that produces the value, if stamped.
    pub fn function_id(&self) -> Option<&str> {
        self.properties.single_value(ValuePropertyNames::FUNCTION)
    }

    /// Same value with different properties.
    #[must_use]
    pub fn with_properties(&self, properties: ValueProperties) -> Self {
        Self {
            value_name: self.value_name.clone(),
            target: self.target.clone(),
            properties,
        }
    }

    /// How well this value meets a requirement on the given resolved target.
    pub fn satisfies(
        &self,
        requirement: &ValueRequirement,
        target: &ComputationTargetSpecification,
    ) -> Option<Satisfaction> {
        if self.value_name != requirement.value_name || &self.target != target {
            return None;
        }
        requirement.constraints.satisfaction(&self.properties)
    }
}

impl fmt::Display for ValueSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VSpec[{}, {}, {}]",
            self.value_name, self.target, self.properties
        )
    }
}

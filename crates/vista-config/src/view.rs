//! View definitions.
//!
//! A [`ViewDefinition`] names a portfolio and one or more
//! [`ViewCalculationConfiguration`]s. Each configuration lists explicit
//! value requirements and, per security type, the values wanted on every
//! position of that type (and aggregated on every portfolio node).

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use vista_core::{ComputationTargetType, UniqueId, ValueProperties, ValueRequirement};

use crate::error::{ConfigResult, Validate, ValidationError};

// =============================================================================
// RESULT MODEL
// =============================================================================

/// Which outputs of a target type the view exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultOutputMode {
    /// Nothing is produced for this target type.
    None,
    /// Only values the view asked for.
    #[default]
    TerminalOutputs,
    /// Every value computed in the graph.
    All,
}

impl ResultOutputMode {
    /// True unless the mode is [`ResultOutputMode::None`].
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Output modes per target type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultModelDefinition {
    /// Mode for portfolio and portfolio node targets.
    #[serde(default)]
    pub aggregate_position_output_mode: ResultOutputMode,
    /// Mode for position targets.
    #[serde(default)]
    pub position_output_mode: ResultOutputMode,
    /// Mode for trade targets.
    #[serde(default)]
    pub trade_output_mode: ResultOutputMode,
    /// Mode for security targets.
    #[serde(default)]
    pub security_output_mode: ResultOutputMode,
    /// Mode for primitive targets.
    #[serde(default)]
    pub primitive_output_mode: ResultOutputMode,
}

impl ResultModelDefinition {
    /// Terminal outputs for every target type.
    pub fn new() -> Self {
        Self {
            aggregate_position_output_mode: ResultOutputMode::TerminalOutputs,
            position_output_mode: ResultOutputMode::TerminalOutputs,
            trade_output_mode: ResultOutputMode::TerminalOutputs,
            security_output_mode: ResultOutputMode::TerminalOutputs,
            primitive_output_mode: ResultOutputMode::TerminalOutputs,
        }
    }

    /// Output mode for a target type.
    pub fn output_mode(&self, target_type: ComputationTargetType) -> ResultOutputMode {
        match target_type {
            ComputationTargetType::Portfolio | ComputationTargetType::PortfolioNode => {
                self.aggregate_position_output_mode
            }
            ComputationTargetType::Position => self.position_output_mode,
            ComputationTargetType::Trade => self.trade_output_mode,
            ComputationTargetType::Security => self.security_output_mode,
            ComputationTargetType::Primitive => self.primitive_output_mode,
        }
    }

    /// Sets the output mode for a target type.
    #[must_use]
    pub fn with_output_mode(
        mut self,
        target_type: ComputationTargetType,
        mode: ResultOutputMode,
    ) -> Self {
        match target_type {
            ComputationTargetType::Portfolio | ComputationTargetType::PortfolioNode => {
                self.aggregate_position_output_mode = mode;
            }
            ComputationTargetType::Position => self.position_output_mode = mode,
            ComputationTargetType::Trade => self.trade_output_mode = mode,
            ComputationTargetType::Security => self.security_output_mode = mode,
            ComputationTargetType::Primitive => self.primitive_output_mode = mode,
        }
        self
    }
}

impl Default for ResultModelDefinition {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// CALCULATION CONFIGURATIONS
// =============================================================================

/// A value wanted on every position of a security type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortfolioRequirement {
    /// Value name.
    pub value_name: String,
    /// Constraints applied to the value.
    #[serde(default)]
    pub constraints: ValueProperties,
}

impl PortfolioRequirement {
    /// Creates a portfolio requirement.
    pub fn new(value_name: impl Into<String>, constraints: ValueProperties) -> Self {
        Self {
            value_name: value_name.into(),
            constraints,
        }
    }
}

/// One calculation configuration of a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewCalculationConfiguration {
    /// Configuration name, unique within the view.
    pub name: String,
    /// Requirements added to the graph as-is.
    #[serde(default)]
    pub specific_requirements: BTreeSet<ValueRequirement>,
    /// Portfolio requirements keyed by security type.
    #[serde(default)]
    pub portfolio_requirements_by_security_type: BTreeMap<String, BTreeSet<PortfolioRequirement>>,
}

impl ViewCalculationConfiguration {
    /// Creates an empty configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            specific_requirements: BTreeSet::new(),
            portfolio_requirements_by_security_type: BTreeMap::new(),
        }
    }

    /// Adds a specific requirement.
    #[must_use]
    pub fn with_specific_requirement(mut self, requirement: ValueRequirement) -> Self {
        self.specific_requirements.insert(requirement);
        self
    }

    /// Adds a portfolio requirement for a security type.
    #[must_use]
    pub fn with_portfolio_requirement(
        mut self,
        security_type: impl Into<String>,
        value_name: impl Into<String>,
        constraints: ValueProperties,
    ) -> Self {
        self.portfolio_requirements_by_security_type
            .entry(security_type.into())
            .or_default()
            .insert(PortfolioRequirement::new(value_name, constraints));
        self
    }

    /// Configuration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Specific requirements.
    pub fn specific_requirements(&self) -> &BTreeSet<ValueRequirement> {
        &self.specific_requirements
    }

    /// All portfolio requirements keyed by security type.
    pub fn all_portfolio_requirements(&self) -> &BTreeMap<String, BTreeSet<PortfolioRequirement>> {
        &self.portfolio_requirements_by_security_type
    }

    /// Portfolio requirements for one security type.
    pub fn portfolio_requirements_for(
        &self,
        security_type: &str,
    ) -> Option<&BTreeSet<PortfolioRequirement>> {
        self.portfolio_requirements_by_security_type
            .get(security_type)
            .filter(|reqs| !reqs.is_empty())
    }

    /// True when any security type carries a portfolio requirement.
    pub fn has_portfolio_requirements(&self) -> bool {
        self.portfolio_requirements_by_security_type
            .values()
            .any(|reqs| !reqs.is_empty())
    }
}

// =============================================================================
// VIEW DEFINITION
// =============================================================================

/// A view: a portfolio plus the configurations to compute on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDefinition {
    /// View name.
    pub name: String,
    /// Portfolio the view is computed over.
    #[serde(default)]
    pub portfolio_id: Option<UniqueId>,
    /// Output modes.
    #[serde(default)]
    pub result_model: ResultModelDefinition,
    /// Configurations in compilation order.
    #[serde(default)]
    pub calculation_configurations: Vec<ViewCalculationConfiguration>,
}

impl ViewDefinition {
    /// Creates a view with no portfolio and no configurations.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            portfolio_id: None,
            result_model: ResultModelDefinition::new(),
            calculation_configurations: Vec::new(),
        }
    }

    /// Parses a view from JSON.
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the portfolio.
    #[must_use]
    pub fn with_portfolio(mut self, portfolio_id: UniqueId) -> Self {
        self.portfolio_id = Some(portfolio_id);
        self
    }

    /// Sets the result model.
    #[must_use]
    pub fn with_result_model(mut self, result_model: ResultModelDefinition) -> Self {
        self.result_model = result_model;
        self
    }

    /// Appends a calculation configuration.
    #[must_use]
    pub fn with_calculation_configuration(mut self, config: ViewCalculationConfiguration) -> Self {
        self.calculation_configurations.push(config);
        self
    }

    /// View name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Portfolio identifier.
    pub fn portfolio_id(&self) -> Option<&UniqueId> {
        self.portfolio_id.as_ref()
    }

    /// Result model.
    pub fn result_model(&self) -> &ResultModelDefinition {
        &self.result_model
    }

    /// Configurations in order.
    pub fn calculation_configurations(&self) -> &[ViewCalculationConfiguration] {
        &self.calculation_configurations
    }

    /// Looks up a configuration by name.
    pub fn calculation_configuration(&self, name: &str) -> Option<&ViewCalculationConfiguration> {
        self.calculation_configurations
            .iter()
            .find(|config| config.name == name)
    }

    /// Configuration names in order.
    pub fn calculation_configuration_names(&self) -> Vec<&str> {
        self.calculation_configurations
            .iter()
            .map(|config| config.name.as_str())
            .collect()
    }
}

impl Validate for ViewDefinition {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push(ValidationError::new("name", "Name cannot be empty"));
        }

        if self.calculation_configurations.is_empty() {
            errors.push(ValidationError::with_rule(
                "calculation_configurations",
                "At least one calculation configuration is required",
                "non_empty",
            ));
        }

        let mut seen = HashSet::new();
        for config in &self.calculation_configurations {
            if config.name.is_empty() {
                errors.push(ValidationError::new(
                    "calculation_configurations.name",
                    "Configuration name cannot be empty",
                ));
            } else if !seen.insert(config.name.as_str()) {
                errors.push(ValidationError::with_rule(
                    "calculation_configurations.name",
                    format!("Duplicate configuration name '{}'", config.name),
                    "unique_names",
                ));
            }
            if config
                .portfolio_requirements_by_security_type
                .keys()
                .any(String::is_empty)
            {
                errors.push(ValidationError::new(
                    format!("calculation_configurations.{}", config.name),
                    "Security type cannot be empty",
                ));
            }
        }

        errors
    }
}

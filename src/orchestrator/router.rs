//! Block router: block type → ordered backends and operation variant.
//!
//! Rules are static configuration. The first rule whose `block_type` equals
//! the block's type wins, and a rule's backend order is its priority order.
//! Runtime signals never reorder backends.

use crate::backend::{Operation, SpecializedVariant};
use crate::error::UnitError;
use crate::layout::{Block, BlockType};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Routing rule for one block type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub block_type: BlockType,
    /// Backend names, highest priority first.
    pub backends: Vec<String>,
    /// Use the type's specialised operation (tables, formulas) when it has one.
    #[serde(default)]
    pub use_specialized_operation: bool,
    /// When none of `backends` is available, use the default route instead
    /// of failing the unit. Default: true.
    #[serde(default = "default_true")]
    pub fallback_to_generic: bool,
    /// How many of the rule's backends produce candidates for the merger.
    /// 1 means a fallback chain over the rule's backends. Default: 1.
    #[serde(default = "default_one")]
    pub max_candidates: usize,
}

fn default_true() -> bool {
    true
}

fn default_one() -> usize {
    1
}

impl RoutingRule {
    /// Generic-operation rule with fallback enabled and one candidate.
    pub fn new<I, S>(block_type: BlockType, backends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            block_type,
            backends: backends.into_iter().map(Into::into).collect(),
            use_specialized_operation: false,
            fallback_to_generic: true,
            max_candidates: 1,
        }
    }

    pub fn specialized(mut self) -> Self {
        self.use_specialized_operation = true;
        self
    }

    pub fn strict(mut self) -> Self {
        self.fallback_to_generic = false;
        self
    }

    pub fn max_candidates(mut self, n: usize) -> Self {
        self.max_candidates = n;
        self
    }
}

/// The routing decision for one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Backends to use, in priority order.
    pub backends: Vec<String>,
    pub operation: Operation,
    /// Number of backends that each produce a candidate. Always ≥ 1 and
    /// never more than `backends.len()` (unless `backends` is empty).
    pub max_candidates: usize,
}

impl Route {
    /// First available backend leads, the rest serve as its fallbacks.
    pub fn generic(available: &[String]) -> Self {
        Self {
            backends: available.to_vec(),
            operation: Operation::Generic,
            max_candidates: 1,
        }
    }

    pub fn is_multi_candidate(&self) -> bool {
        self.max_candidates > 1
    }
}

/// Specialised variant for a block type, if it has one.
pub fn specialized_variant(block_type: &BlockType) -> Option<SpecializedVariant> {
    match block_type {
        BlockType::Table => Some(SpecializedVariant::Table),
        BlockType::Formula => Some(SpecializedVariant::Formula),
        _ => None,
    }
}

/// Maps blocks to routes using a fixed rule table.
#[derive(Debug, Clone, Default)]
pub struct BlockRouter {
    rules: Vec<RoutingRule>,
}

impl BlockRouter {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn rule_for(&self, block_type: &BlockType) -> Option<&RoutingRule> {
        self.rules.iter().find(|r| &r.block_type == block_type)
    }

    /// Decide backends and operation for `block`.
    ///
    /// `available` lists usable backend names in priority order. Without a
    /// matching rule the default route applies. A rule whose backends are
    /// all unavailable yields the default route when `fallback_to_generic`
    /// is set and [`UnitError::Routing`] otherwise. An empty `available`
    /// list is always a routing error.
    pub fn route(&self, block: &Block, available: &[String]) -> Result<Route, UnitError> {
        let routing_error = || UnitError::Routing {
            block_type: block.block_type.to_string(),
        };

        let Some(rule) = self.rule_for(&block.block_type) else {
            if available.is_empty() {
                return Err(routing_error());
            }
            debug!("{}: no rule for '{}', default route", block.id, block.block_type);
            return Ok(Route::generic(available));
        };

        let backends: Vec<String> = rule
            .backends
            .iter()
            .filter(|name| available.contains(*name))
            .cloned()
            .collect();

        if backends.is_empty() {
            if rule.fallback_to_generic && !available.is_empty() {
                debug!(
                    "{}: preferred backends {:?} unavailable, default route",
                    block.id, rule.backends
                );
                return Ok(Route::generic(available));
            }
            return Err(routing_error());
        }

        let operation = match specialized_variant(&block.block_type) {
            Some(variant) if rule.use_specialized_operation => Operation::Specialized(variant),
            _ => Operation::Generic,
        };
        let max_candidates = rule.max_candidates.clamp(1, backends.len());

        Ok(Route {
            backends,
            operation,
            max_candidates,
        })
    }
}

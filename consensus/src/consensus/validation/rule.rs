//! Rule contract and per-stage rule lists

use consensus_core::config::Params;
use consensus_core::errors::RuleResult;

use super::context::RuleContext;
use super::state::Stage;

/// A single named consensus rule.
///
/// Rules are registered once per pipeline. Work that only depends on the
/// network parameters (decoding federation keys, building lookups) belongs in
/// [`Rule::initialize`], which runs at registration, never in
/// [`Rule::validate`].
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;

    fn initialize(&mut self, _params: &Params) -> Result<(), String> {
        Ok(())
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()>;
}

/// Ordered rules of one stage
pub struct RuleSet {
    stage: Stage,
    rules: Vec<Box<dyn Rule>>,
}

impl RuleSet {
    pub fn new(stage: Stage) -> Self {
        Self { stage, rules: Vec::new() }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Initializes `rule` and appends it to the set
    pub fn register(&mut self, mut rule: Box<dyn Rule>, params: &Params) -> Result<(), String> {
        rule.initialize(params).map_err(|err| format!("rule {} failed to initialize: {err}", rule.name()))?;
        self.rules.push(rule);
        Ok(())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Runs every rule in order and stops at the first failure
    pub fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        for rule in &self.rules {
            if let Err(err) = rule.validate(ctx) {
                tracing::debug!("rule {} ({} stage) rejected {}: {}", rule.name(), self.stage.name(), ctx.hash, err);
                return Err(err);
            }
        }
        Ok(())
    }
}

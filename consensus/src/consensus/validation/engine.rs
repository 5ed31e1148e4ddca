//! Rule pipeline
//!
//! Drives a [`RuleContext`] through the validation stages in order. Each step
//! asks the [`ValidationState`] for its next stage, so once a stage fails the
//! state is terminal and nothing after it runs.

use std::sync::Arc;

use consensus_core::config::{ConsensusAlgorithm, Params};

use super::context::RuleContext;
use super::rule::{Rule, RuleSet};
use super::state::{Stage, ValidationState};
use crate::consensus::rules;
use crate::consensus::storage::CoinViewError;

pub struct RulePipeline {
    params: Arc<Params>,
    header: RuleSet,
    integrity: RuleSet,
    partial: RuleSet,
    full: RuleSet,
}

impl RulePipeline {
    /// Builds the pipeline for the configured consensus algorithm
    pub fn new(params: Arc<Params>) -> Result<Self, String> {
        let mut pipeline = Self::empty(params.clone());
        rules::register_common(&mut pipeline)?;
        match params.algorithm {
            ConsensusAlgorithm::ProofOfWork => rules::pow::register(&mut pipeline)?,
            ConsensusAlgorithm::ProofOfStake => rules::pos::register(&mut pipeline)?,
            ConsensusAlgorithm::ProofOfAuthority => rules::poa::register(&mut pipeline)?,
        }
        tracing::debug!(
            "{} rule pipeline: header {:?}, integrity {:?}, partial {:?}, full {:?}",
            params.algorithm,
            pipeline.header.names(),
            pipeline.integrity.names(),
            pipeline.partial.names(),
            pipeline.full.names()
        );
        Ok(pipeline)
    }

    /// A pipeline without any rules
    pub fn empty(params: Arc<Params>) -> Self {
        Self {
            params,
            header: RuleSet::new(Stage::Header),
            integrity: RuleSet::new(Stage::Integrity),
            partial: RuleSet::new(Stage::Partial),
            full: RuleSet::new(Stage::Full),
        }
    }

    pub fn params(&self) -> &Arc<Params> {
        &self.params
    }

    /// Appends `rule` to the rules of `stage`
    pub fn register(&mut self, stage: Stage, rule: Box<dyn Rule>) -> Result<(), String> {
        let params = self.params.clone();
        self.rule_set_mut(stage).register(rule, &params)
    }

    pub fn rule_set(&self, stage: Stage) -> &RuleSet {
        match stage {
            Stage::Header => &self.header,
            Stage::Integrity => &self.integrity,
            Stage::Partial => &self.partial,
            Stage::Full => &self.full,
        }
    }

    fn rule_set_mut(&mut self, stage: Stage) -> &mut RuleSet {
        match stage {
            Stage::Header => &mut self.header,
            Stage::Integrity => &mut self.integrity,
            Stage::Partial => &mut self.partial,
            Stage::Full => &mut self.full,
        }
    }

    /// Runs pending stages up to and including `through`.
    ///
    /// Rule failures end up in `ctx.state`. Only a coin source fault is
    /// returned as an error, since it says nothing about the candidate.
    /// Stages past the header stage need a block body and are not run for a
    /// header-only context.
    pub fn run(&self, ctx: &mut RuleContext<'_>, through: Stage) -> Result<(), CoinViewError> {
        while let Some(stage) = ctx.state.next_stage() {
            if stage > through || (stage > Stage::Header && !ctx.has_body()) {
                break;
            }
            if stage == Stage::Full {
                ctx.load_coins()?;
            }
            match self.rule_set(stage).validate(ctx) {
                Ok(()) => match ctx.state.complete(stage) {
                    Some(next) => ctx.state = next,
                    None => break,
                },
                Err(error) => ctx.state = ValidationState::Invalid { stage, error },
            }
        }
        Ok(())
    }
}

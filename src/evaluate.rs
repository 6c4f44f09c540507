use tracing::debug;

use crate::{
    config::EvaluatorConfig,
    credible_set::{rank_cmp, CredibleSet},
    error::Result,
    harmonize::HarmonizedCohort,
    math::min_abs_correlation,
    variant::Variant,
};

/// Slack allowed when comparing coverage against its threshold
pub const COVERAGE_TOLERANCE: f64 = 1e-9;

/// Annotates credible sets with purity and keeps the ones meeting the thresholds
#[derive(Debug, Clone, Copy, Default)]
pub struct CredibleSetEvaluator {
    config: EvaluatorConfig,
}
impl CredibleSetEvaluator {
    /// Fails with `InvalidConfig` when a threshold lies outside `[0, 1]`
    pub fn new(config: EvaluatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Minimum absolute pairwise LD among members in the cohort's own LD.
    ///
    /// Pairs the cohort does not observe count as uncorrelated.
    pub fn purity(&self, set: &CredibleSet, cohort: &HarmonizedCohort) -> f64 {
        min_abs_correlation(set.members(), |i, j| cohort.shared_r(i, j).unwrap_or(0.0))
    }

    pub fn passes(&self, set: &CredibleSet) -> bool {
        let purity_ok = set
            .purity()
            .is_some_and(|purity| purity >= self.config.min_purity);
        let coverage_ok = set.coverage() + COVERAGE_TOLERANCE >= self.config.min_coverage;
        purity_ok && coverage_ok
    }

    /// Returns the passing sets with purity filled in, best first
    pub fn evaluate(
        &self,
        sets: &[CredibleSet],
        cohort: &HarmonizedCohort,
        variants: &[Variant],
    ) -> Vec<CredibleSet> {
        let mut passing = sets
            .iter()
            .map(|set| set.with_purity(self.purity(set, cohort)))
            .filter(|set| self.passes(set))
            .collect::<Vec<_>>();
        passing.sort_by(|a, b| rank_cmp(a, b, variants));
        debug!(
            "{} of {} credible sets from cohort {} passed evaluation",
            passing.len(),
            sets.len(),
            cohort.cohort()
        );
        passing
    }
}

use std::time::Duration;

use bon::Builder;

use crate::{
    error::{CredmetaError, Result},
    math::{arithmetic_mean, weighted_mean},
};

/// Which variants make it into the shared index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexMode {
    /// Variants present in every cohort
    #[default]
    Intersection,
    /// Variants present in at least one cohort
    Union,
}

#[derive(Debug, Clone, Copy, Builder)]
pub struct HarmonizeConfig {
    #[builder(default)]
    pub index_mode: IndexMode,
    /// Drop A/T and C/G variants before matching
    #[builder(default = true)]
    pub drop_ambiguous: bool,
    /// Match alleles against their complement as well
    #[builder(default = false)]
    pub allow_strand_flip: bool,
}
impl Default for HarmonizeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, Copy, Builder)]
pub struct EvaluatorConfig {
    #[builder(default = 0.5)]
    pub min_purity: f64,
    #[builder(default = 0.95)]
    pub min_coverage: f64,
}
impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
impl EvaluatorConfig {
    pub fn validate(&self) -> Result<()> {
        check_unit_interval(self.min_purity, "min_purity")?;
        check_unit_interval(self.min_coverage, "min_coverage")
    }
}

/// Rule for combining one variant's PIPs across contributing cohorts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PipCombination {
    /// Average weighted by cohort sample size
    #[default]
    SampleSizeWeighted,
    Mean,
    Max,
}
impl PipCombination {
    pub fn combine(&self, pips: &[f64], sample_sizes: &[usize]) -> f64 {
        if pips.is_empty() {
            return 0.0;
        }
        match self {
            PipCombination::SampleSizeWeighted => {
                let weights = sample_sizes.iter().map(|n| *n as f64).collect::<Vec<_>>();
                weighted_mean(pips, &weights)
            }
            PipCombination::Mean => arithmetic_mean(pips),
            PipCombination::Max => pips.iter().copied().fold(0.0, f64::max),
        }
    }
}

#[derive(Debug, Clone, Copy, Builder)]
pub struct ReconcilerConfig {
    /// LD-weighted Jaccard overlap a pair of sets must exceed to merge
    #[builder(default = 0.25)]
    pub merge_threshold: f64,
    #[builder(default)]
    pub pip_combination: PipCombination,
}
impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
impl ReconcilerConfig {
    pub fn validate(&self) -> Result<()> {
        check_unit_interval(self.merge_threshold, "merge_threshold")
    }
}

/// Tunable options shared by every fine-mapping method
#[derive(Debug, Clone, Copy, PartialEq, Builder)]
pub struct MethodConfig {
    #[builder(default = 1)]
    pub max_causal_signals: usize,
    /// Prior variance of the causal effect size
    #[builder(default = 0.04)]
    pub prior_variance: f64,
    /// Target posterior mass of each credible set
    #[builder(default = 0.95)]
    pub coverage: f64,
    #[builder(default = 100)]
    pub max_iterations: usize,
    pub time_budget: Option<Duration>,
}
impl Default for MethodConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
impl MethodConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_causal_signals == 0 {
            return Err(CredmetaError::InvalidConfig(
                "max_causal_signals must be at least 1".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(CredmetaError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !self.prior_variance.is_finite() || self.prior_variance <= 0.0 {
            return Err(CredmetaError::InvalidConfig(
                "prior_variance must be finite and positive".to_string(),
            ));
        }
        check_unit_interval(self.coverage, "coverage")
    }
}

#[derive(Debug, Clone, Builder)]
pub struct PipelineConfig {
    #[builder(default)]
    pub harmonize: HarmonizeConfig,
    #[builder(default)]
    pub evaluator: EvaluatorConfig,
    #[builder(default)]
    pub reconciler: ReconcilerConfig,
    /// Methods to run on every cohort, by registered name
    #[builder(default = vec![("abf".to_string(), MethodConfig::default())])]
    pub methods: Vec<(String, MethodConfig)>,
    /// Worker threads for multi-locus runs, rayon's global pool when unset
    pub threads: Option<usize>,
}
impl Default for PipelineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn check_unit_interval(value: f64, name: &str) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CredmetaError::InvalidConfig(format!(
            "{name} must lie in [0, 1], got {value}"
        )));
    }
    Ok(())
}

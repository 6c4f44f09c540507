//! Adapter between the pipeline and single-cohort fine-mapping methods.
//!
//! A method only sees one cohort's harmonized [`LocusData`] and reports
//! cohort-local indices. The [`FineMapRunner`] enforces the iteration and time
//! budget and translates the output into the shared variant index.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::{
    config::MethodConfig,
    credible_set::{CredibleSet, Provenance},
    error::{CredmetaError, Result},
    harmonize::HarmonizedCohort,
    locus::LocusData,
    math::{softmax, wakefield_log_abf},
};

/// Iteration and wall-clock allowance of one method invocation
#[derive(Debug, Clone)]
pub struct Budget {
    cohort: String,
    method: String,
    max_iterations: usize,
    deadline: Option<Instant>,
    iterations: usize,
}
impl Budget {
    pub fn new(cohort: &str, method: &str, config: &MethodConfig) -> Self {
        Self {
            cohort: cohort.to_string(),
            method: method.to_string(),
            max_iterations: config.max_iterations,
            deadline: config.time_budget.map(|budget| Instant::now() + budget),
            iterations: 0,
        }
    }

    /// Records one iteration, failing once the allowance is used up
    pub fn tick(&mut self) -> Result<()> {
        self.iterations += 1;
        if self.iterations > self.max_iterations || self.expired() {
            return Err(self.non_convergence());
        }
        Ok(())
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() > deadline)
    }

    fn non_convergence(&self) -> CredmetaError {
        CredmetaError::NonConvergence {
            cohort: self.cohort.clone(),
            method: self.method.clone(),
            iterations: self.iterations,
        }
    }
}

/// Raw output of a method in cohort-local indices
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodOutput {
    /// Posterior inclusion probability of every local variant
    pub pips: Vec<f64>,
    /// Ranked credible sets as `(local index, pip)` members
    pub credible_sets: Vec<Vec<(usize, f64)>>,
}

/// A single-cohort fine-mapping method
pub trait FineMapMethod: Send + Sync {
    fn name(&self) -> &str;

    /// Largest number of causal signals the method can model, `None` if unbounded
    fn max_signals(&self) -> Option<usize> {
        None
    }

    /// Fine-maps `locus` assuming `n_signals` causal signals.
    ///
    /// Implementations call [`Budget::tick`] once per iteration.
    fn run(
        &self,
        locus: &LocusData,
        n_signals: usize,
        config: &MethodConfig,
        budget: &mut Budget,
    ) -> Result<MethodOutput>;
}

/// Wakefield approximate Bayes factors under a single causal variant
#[derive(Debug, Clone, Copy, Default)]
pub struct Abf;

impl FineMapMethod for Abf {
    fn name(&self) -> &str {
        "abf"
    }

    fn max_signals(&self) -> Option<usize> {
        Some(1)
    }

    fn run(
        &self,
        locus: &LocusData,
        _n_signals: usize,
        config: &MethodConfig,
        budget: &mut Budget,
    ) -> Result<MethodOutput> {
        budget.tick()?;
        let log_abf = locus
            .beta()
            .iter()
            .zip(locus.se().iter())
            .map(|(b, s)| wakefield_log_abf(*b, *s, config.prior_variance))
            .collect::<Vec<_>>();
        let pips = softmax(&log_abf);

        let mut order = (0..pips.len()).collect::<Vec<_>>();
        order.sort_by(|a, b| pips[*b].total_cmp(&pips[*a]).then(a.cmp(b)));
        let mut members = Vec::new();
        let mut mass = 0.0;
        for idx in order {
            members.push((idx, pips[idx]));
            mass += pips[idx];
            if mass >= config.coverage {
                break;
            }
        }

        Ok(MethodOutput {
            pips,
            credible_sets: vec![members],
        })
    }
}

/// Methods available to the pipeline, by name
#[derive(Clone)]
pub struct MethodRegistry {
    methods: BTreeMap<String, Arc<dyn FineMapMethod>>,
}
impl MethodRegistry {
    pub fn empty() -> Self {
        Self {
            methods: BTreeMap::new(),
        }
    }

    pub fn register<M: FineMapMethod + 'static>(&mut self, method: M) -> &mut Self {
        self.methods
            .insert(method.name().to_string(), Arc::new(method));
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn FineMapMethod>> {
        self.methods
            .get(name)
            .cloned()
            .ok_or_else(|| CredmetaError::UnsupportedMethod(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Checks a method name and its configuration before any locus runs
    pub fn validate(&self, name: &str, config: &MethodConfig) -> Result<()> {
        let method = self.get(name)?;
        config.validate()?;
        if let Some(max) = method.max_signals() {
            if config.max_causal_signals > max {
                return Err(CredmetaError::InvalidConfig(format!(
                    "{name} supports at most {max} causal signals, {} requested",
                    config.max_causal_signals
                )));
            }
        }
        Ok(())
    }
}
impl Default for MethodRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Abf);
        registry
    }
}

/// One method run on one cohort for a fixed number of causal signals
#[derive(Debug, Clone, PartialEq)]
pub struct CohortFit {
    pub provenance: Provenance,
    pub sample_size: usize,
    pub n_signals: usize,
    /// Posterior inclusion probability per shared variant, `None` where the cohort lacks it
    pub pips: Vec<Option<f64>>,
    pub credible_sets: Vec<CredibleSet>,
}
impl CohortFit {
    pub fn pip(&self, shared: usize) -> Option<f64> {
        self.pips.get(shared).copied().flatten()
    }
}

#[derive(Clone)]
pub struct FineMapRunner {
    method: Arc<dyn FineMapMethod>,
    config: MethodConfig,
}
impl FineMapRunner {
    pub fn new(registry: &MethodRegistry, name: &str, config: MethodConfig) -> Result<Self> {
        registry.validate(name, &config)?;
        Ok(Self {
            method: registry.get(name)?,
            config,
        })
    }

    pub fn method_name(&self) -> &str {
        self.method.name()
    }

    /// Runs the method once per number of causal signals up to the configured maximum.
    ///
    /// Any budget overrun discards every result of the call.
    pub fn run(&self, cohort: &HarmonizedCohort, n_shared: usize) -> Result<Vec<CohortFit>> {
        let provenance = Provenance::new(
            cohort.cohort().to_string(),
            self.method_name().to_string(),
        );
        (1..=self.config.max_causal_signals)
            .map(|n_signals| {
                let mut budget = Budget::new(cohort.cohort(), self.method_name(), &self.config);
                let output = self
                    .method
                    .run(cohort.data(), n_signals, &self.config, &mut budget)?;
                if budget.expired() {
                    return Err(budget.non_convergence());
                }
                debug!(
                    "{provenance} with {n_signals} signal(s) finished after {} iteration(s)",
                    budget.iterations()
                );
                self.normalize(cohort, n_shared, n_signals, &provenance, output)
            })
            .collect()
    }

    /// Moves a method's output into the shared variant index
    fn normalize(
        &self,
        cohort: &HarmonizedCohort,
        n_shared: usize,
        n_signals: usize,
        provenance: &Provenance,
        output: MethodOutput,
    ) -> Result<CohortFit> {
        let shared = cohort.shared_indices();
        let malformed = |reason: String| CredmetaError::InvalidMethodOutput {
            method: self.method_name().to_string(),
            reason,
        };
        if output.pips.len() != shared.len() {
            return Err(malformed(format!(
                "{} pips for {} variants",
                output.pips.len(),
                shared.len()
            )));
        }

        if let Some(bad) = output.pips.iter().position(|p| !p.is_finite()) {
            return Err(malformed(format!("non-finite pip at variant index {bad}")));
        }

        let mut pips = vec![None; n_shared];
        for (local, pip) in output.pips.iter().enumerate() {
            pips[shared[local]] = Some(pip.clamp(0.0, 1.0));
        }

        let credible_sets = output
            .credible_sets
            .into_iter()
            .filter(|members| !members.is_empty())
            .map(|members| {
                members
                    .into_iter()
                    .map(|(local, pip)| {
                        if !pip.is_finite() {
                            return Err(malformed(format!(
                                "non-finite credible set pip at variant index {local}"
                            )));
                        }
                        shared
                            .get(local)
                            .map(|s| (*s, pip))
                            .ok_or_else(|| malformed(format!("variant index {local} out of range")))
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(|members| CredibleSet::new(members, provenance.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CohortFit {
            provenance: provenance.clone(),
            sample_size: cohort.sample_size(),
            n_signals,
            pips,
            credible_sets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::{harmonize::Harmonizer, variant::Variant};
    use approx::assert_relative_eq;

    fn harmonized(beta: Vec<f64>) -> HarmonizedCohort {
        let n = beta.len();
        let variants = (0..n as u64)
            .map(|i| Variant::new("1", 100 + i, "A", "G"))
            .collect();
        let locus = LocusData::new(
            "c1",
            variants,
            beta,
            vec![0.05; n],
            ndarray::Array2::eye(n),
            5000,
        )
        .unwrap();
        Harmonizer::default()
            .harmonize("L1", &[locus])
            .unwrap()
            .cohorts()[0]
            .clone()
    }

    struct Stubborn;
    impl FineMapMethod for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }

        fn run(
            &self,
            _locus: &LocusData,
            _n_signals: usize,
            _config: &MethodConfig,
            budget: &mut Budget,
        ) -> Result<MethodOutput> {
            loop {
                budget.tick()?;
            }
        }
    }

    struct OutOfRange;
    impl FineMapMethod for OutOfRange {
        fn name(&self) -> &str {
            "out_of_range"
        }

        fn run(
            &self,
            locus: &LocusData,
            _n_signals: usize,
            _config: &MethodConfig,
            _budget: &mut Budget,
        ) -> Result<MethodOutput> {
            Ok(MethodOutput {
                pips: vec![0.5; locus.n_variants()],
                credible_sets: vec![vec![(99, 0.5)]],
            })
        }
    }

    struct NonFinite;
    impl FineMapMethod for NonFinite {
        fn name(&self) -> &str {
            "non_finite"
        }

        fn run(
            &self,
            _locus: &LocusData,
            _n_signals: usize,
            _config: &MethodConfig,
            _budget: &mut Budget,
        ) -> Result<MethodOutput> {
            Ok(MethodOutput {
                pips: vec![0.5, f64::NAN],
                credible_sets: vec![vec![(0, 0.5), (1, 0.47)]],
            })
        }
    }

    /// Finishes within its iteration allowance but sleeps past any short deadline
    struct Sluggish;
    impl FineMapMethod for Sluggish {
        fn name(&self) -> &str {
            "sluggish"
        }

        fn run(
            &self,
            locus: &LocusData,
            _n_signals: usize,
            _config: &MethodConfig,
            _budget: &mut Budget,
        ) -> Result<MethodOutput> {
            std::thread::sleep(Duration::from_millis(20));
            Ok(MethodOutput {
                pips: vec![0.5; locus.n_variants()],
                credible_sets: Vec::new(),
            })
        }
    }

    /// Puts all mass on variant `n_signals - 1`
    struct PerSignal;
    impl FineMapMethod for PerSignal {
        fn name(&self) -> &str {
            "per_signal"
        }

        fn run(
            &self,
            locus: &LocusData,
            n_signals: usize,
            _config: &MethodConfig,
            budget: &mut Budget,
        ) -> Result<MethodOutput> {
            budget.tick()?;
            let mut pips = vec![0.0; locus.n_variants()];
            pips[n_signals - 1] = 0.97;
            Ok(MethodOutput {
                pips,
                credible_sets: vec![vec![(n_signals - 1, 0.97)]],
            })
        }
    }

    #[test]
    fn test_abf_picks_strongest_variant() {
        let cohort = harmonized(vec![0.01, 0.4, 0.02]);
        let runner = FineMapRunner::new(&MethodRegistry::default(), "abf", MethodConfig::default()).unwrap();
        let fits = runner.run(&cohort, 3).unwrap();
        assert_eq!(fits.len(), 1);
        let fit = &fits[0];
        assert_eq!(fit.provenance, Provenance::new("c1".into(), "abf".into()));
        assert_eq!(fit.sample_size, 5000);
        let total = fit.pips.iter().flatten().sum::<f64>();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        assert_eq!(fit.credible_sets.len(), 1);
        assert_eq!(fit.credible_sets[0].members(), &[1]);
        assert!(fit.credible_sets[0].coverage() > 0.95);
    }

    #[test]
    fn test_abf_does_not_touch_input() {
        let cohort = harmonized(vec![0.01, 0.4, 0.02]);
        let before = cohort.data().beta().to_vec();
        let runner = FineMapRunner::new(&MethodRegistry::default(), "abf", MethodConfig::default()).unwrap();
        runner.run(&cohort, 3).unwrap();
        assert_eq!(cohort.data().beta(), before.as_slice());
    }

    #[test]
    fn test_unknown_method() {
        let result = FineMapRunner::new(&MethodRegistry::default(), "susie", MethodConfig::default());
        assert!(matches!(result, Err(CredmetaError::UnsupportedMethod(name)) if name == "susie"));
    }

    #[test]
    fn test_abf_rejects_multiple_signals() {
        let config = MethodConfig::builder().max_causal_signals(2).build();
        let result = FineMapRunner::new(&MethodRegistry::default(), "abf", config);
        assert!(matches!(result, Err(CredmetaError::InvalidConfig(_))));
    }

    #[test]
    fn test_iteration_budget_raises_non_convergence() {
        let mut registry = MethodRegistry::default();
        registry.register(Stubborn);
        let config = MethodConfig::builder().max_iterations(5).build();
        let runner = FineMapRunner::new(&registry, "stubborn", config).unwrap();
        let err = runner.run(&harmonized(vec![0.1, 0.2]), 2).unwrap_err();
        assert!(matches!(
            err,
            CredmetaError::NonConvergence { iterations: 6, .. }
        ));
    }

    #[test]
    fn test_out_of_range_members_rejected() {
        let mut registry = MethodRegistry::empty();
        registry.register(OutOfRange);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["out_of_range"]);
        let runner = FineMapRunner::new(&registry, "out_of_range", MethodConfig::default()).unwrap();
        let err = runner.run(&harmonized(vec![0.1, 0.2]), 2).unwrap_err();
        assert!(matches!(err, CredmetaError::InvalidMethodOutput { .. }));
    }

    #[test]
    fn test_non_finite_pips_rejected() {
        let mut registry = MethodRegistry::empty();
        registry.register(NonFinite);
        let runner = FineMapRunner::new(&registry, "non_finite", MethodConfig::default()).unwrap();
        let err = runner.run(&harmonized(vec![0.1, 0.2]), 2).unwrap_err();
        assert!(matches!(
            err,
            CredmetaError::InvalidMethodOutput { ref reason, .. } if reason.contains("non-finite")
        ));
    }

    #[test]
    fn test_time_budget_raises_non_convergence() {
        let mut registry = MethodRegistry::empty();
        registry.register(Sluggish);
        let config = MethodConfig::builder()
            .time_budget(Duration::from_millis(1))
            .build();
        let runner = FineMapRunner::new(&registry, "sluggish", config).unwrap();
        let err = runner.run(&harmonized(vec![0.1, 0.2]), 2).unwrap_err();
        assert!(matches!(err, CredmetaError::NonConvergence { ref method, .. } if method == "sluggish"));

        let mut budget = Budget::new("c1", "sluggish", &config);
        std::thread::sleep(Duration::from_millis(5));
        assert!(budget.expired());
        assert!(budget.tick().is_err());
    }

    #[test]
    fn test_one_fit_per_signal_count() {
        let mut registry = MethodRegistry::empty();
        registry.register(PerSignal);
        let config = MethodConfig::builder().max_causal_signals(3).build();
        let runner = FineMapRunner::new(&registry, "per_signal", config).unwrap();
        let fits = runner.run(&harmonized(vec![0.1, 0.2, 0.3, 0.4]), 4).unwrap();
        assert_eq!(fits.len(), 3);
        assert_eq!(fits.iter().map(|f| f.n_signals).collect::<Vec<_>>(), vec![1, 2, 3]);
        for fit in &fits {
            assert_eq!(fit.credible_sets[0].members(), &[fit.n_signals - 1]);
        }
    }
}

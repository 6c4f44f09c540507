use std::collections::HashSet;
use std::sync::Arc;

use itertools::Itertools;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::{
    config::PipelineConfig,
    credible_set::Provenance,
    error::{CredmetaError, Result},
    evaluate::CredibleSetEvaluator,
    finemap::{FineMapRunner, MethodRegistry},
    harmonize::{HarmonizedCohort, HarmonizedLocus, Harmonizer},
    locus::LocusData,
    parallel::{resolve_threads, run_in_pool},
    reconcile::{CrossCohortReconciler, EvaluatedFit},
    report::{Diagnostics, FailedSource, Heterogeneity, MetaReport, SourceCounts},
};

/// Cross-cohort fine-mapping of one or many loci
pub struct Pipeline {
    config: PipelineConfig,
    harmonizer: Harmonizer,
    runners: Vec<FineMapRunner>,
    evaluator: CredibleSetEvaluator,
    reconciler: CrossCohortReconciler,
}
impl Pipeline {
    /// Validates the configuration against the registry.
    ///
    /// Unknown method names fail here, before any locus is touched.
    pub fn new(config: PipelineConfig, registry: &MethodRegistry) -> Result<Self> {
        if config.methods.is_empty() {
            return Err(CredmetaError::InvalidConfig(
                "at least one fine-mapping method is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for (name, _) in &config.methods {
            if !seen.insert(name.as_str()) {
                return Err(CredmetaError::InvalidConfig(format!(
                    "method {name} is configured more than once"
                )));
            }
        }
        let runners = config
            .methods
            .iter()
            .map(|(name, method_config)| FineMapRunner::new(registry, name, *method_config))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            harmonizer: Harmonizer::new(config.harmonize),
            evaluator: CredibleSetEvaluator::new(config.evaluator)?,
            reconciler: CrossCohortReconciler::new(config.reconciler)?,
            runners,
            config,
        })
    }

    /// Runs every stage for one locus.
    ///
    /// Cohort/method runs proceed in parallel and are all collected before
    /// reconciliation. A failing run is recorded in the diagnostics while the
    /// remaining cohorts are still reconciled. When every run fails the locus
    /// fails with [`CredmetaError::AllSourcesFailed`].
    pub fn run(&self, locus_id: &str, cohorts: &[LocusData]) -> Result<MetaReport> {
        info!("Fine-mapping locus {locus_id} across {} cohorts", cohorts.len());
        let locus = self.harmonizer.harmonize(locus_id, cohorts)?;

        let jobs = locus
            .cohorts()
            .iter()
            .cartesian_product(self.runners.iter())
            .collect::<Vec<_>>();
        let outcomes = jobs
            .par_iter()
            .map(|(cohort, runner)| self.process_cohort(&locus, cohort, runner))
            .collect::<Vec<_>>();

        let mut evaluated = Vec::new();
        let mut sources = Vec::new();
        let mut failed = Vec::new();
        for (provenance, outcome) in outcomes {
            match outcome {
                Ok(fit) => {
                    sources.push(SourceCounts::new(
                        provenance,
                        fit.fit.credible_sets.len(),
                        fit.passing.len(),
                    ));
                    evaluated.push(fit);
                }
                Err(e) => {
                    warn!("Excluding {provenance} from {locus_id}: {e}");
                    failed.push(FailedSource::new(provenance, e.to_string()));
                }
            }
        }
        sources.sort_by(|a, b| a.provenance.cmp(&b.provenance));
        failed.sort_by(|a, b| a.provenance.cmp(&b.provenance));
        if evaluated.is_empty() && !failed.is_empty() {
            return Err(CredmetaError::AllSourcesFailed {
                locus: locus_id.to_string(),
                failures: failed
                    .iter()
                    .map(|f| format!("{}: {}", f.provenance, f.reason))
                    .collect(),
            });
        }

        let consensus_sets = self.reconciler.reconcile(&locus, &evaluated);
        info!(
            "Locus {locus_id}: {} consensus sets from {} sources ({} failed)",
            consensus_sets.len(),
            sources.len(),
            failed.len()
        );

        let diagnostics = Diagnostics {
            harmonization: locus.diagnostics().clone(),
            sources,
            failed,
            heterogeneity: Heterogeneity::for_locus(&locus),
        };
        Ok(MetaReport::builder()
            .locus_id(locus_id)
            .variants(locus.variants().to_vec())
            .consensus_sets(consensus_sets)
            .diagnostics(diagnostics)
            .build())
    }

    /// Fine-maps one cohort with one method and evaluates the deepest fit
    fn process_cohort(
        &self,
        locus: &HarmonizedLocus,
        cohort: &HarmonizedCohort,
        runner: &FineMapRunner,
    ) -> (Provenance, Result<EvaluatedFit>) {
        let provenance = Provenance::new(
            cohort.cohort().to_string(),
            runner.method_name().to_string(),
        );
        let outcome = runner
            .run(cohort, locus.variants().len())
            .and_then(|mut fits| {
                fits.pop().ok_or_else(|| CredmetaError::InvalidMethodOutput {
                    method: runner.method_name().to_string(),
                    reason: "no fits returned".to_string(),
                })
            })
            .map(|fit| {
                let passing = self
                    .evaluator
                    .evaluate(&fit.credible_sets, cohort, locus.variants())
                    .into_iter()
                    .map(Arc::new)
                    .collect();
                EvaluatedFit::new(fit, passing)
            });
        (provenance, outcome)
    }

    /// Runs many loci in parallel, each with its own outcome
    pub fn run_loci(
        &self,
        loci: &[(String, Vec<LocusData>)],
    ) -> Result<Vec<(String, Result<MetaReport>)>> {
        let threads = resolve_threads(self.config.threads, loci.len());
        run_in_pool(threads, || {
            loci.par_iter()
                .map(|(locus_id, cohorts)| {
                    let outcome = self.run(locus_id, cohorts);
                    if let Err(e) = &outcome {
                        warn!("Locus {locus_id} failed: {e}");
                    }
                    (locus_id.clone(), outcome)
                })
                .collect()
        })
    }
}

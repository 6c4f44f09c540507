//! credmeta: cross-cohort credible set meta-analysis for statistical fine-mapping
//!
//! Given summary statistics and LD matrices from several cohorts at one locus,
//! this library aligns the cohorts onto a shared variant index, fine-maps each
//! cohort with pluggable single-cohort methods, filters the resulting credible
//! sets by purity and coverage, and reconciles them into consensus sets.
//!
//! The main components of this library are:
//! - `Harmonizer`: allele alignment and LD reindexing across cohorts
//! - `FineMapRunner` / `MethodRegistry`: the adapter around fine-mapping methods
//! - `CredibleSetEvaluator`: purity and coverage filtering
//! - `CrossCohortReconciler`: LD-aware merging of credible sets
//! - `Pipeline`: the whole flow for one or many loci, producing `MetaReport`s

mod consensus;
mod credible_set;
mod error;
mod evaluate;
mod finemap;
mod harmonize;
mod locus;
mod math;
mod parallel;
mod pipeline;
mod reconcile;
mod report;
mod utils;
mod variant;

pub mod config;
pub mod logging;

pub use config::{
    EvaluatorConfig, HarmonizeConfig, IndexMode, MethodConfig, PipCombination, PipelineConfig,
    ReconcilerConfig,
};
pub use consensus::ConsensusSet;
pub use credible_set::{CredibleSet, Provenance};
pub use error::{CredmetaError, Result};
pub use evaluate::CredibleSetEvaluator;
pub use finemap::{Abf, Budget, CohortFit, FineMapMethod, FineMapRunner, MethodOutput, MethodRegistry};
pub use harmonize::{
    CohortHarmonization, HarmonizeDiagnostics, HarmonizedCohort, HarmonizedLocus, Harmonizer,
    MismatchedSite,
};
pub use locus::LocusData;
pub use pipeline::Pipeline;
pub use reconcile::{CrossCohortReconciler, EvaluatedFit};
pub use report::{Diagnostics, FailedSource, Heterogeneity, MetaReport, SourceCounts};
pub use variant::Variant;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredmetaError {
    #[error("alleles at {site} cannot be reconciled across cohorts: {}", .cohorts.join(", "))]
    AlleleMismatch { site: String, cohorts: Vec<String> },

    #[error("locus {locus} has no variants left after harmonization")]
    EmptyLocus { locus: String },

    #[error("method {method} did not converge for cohort {cohort} within {iterations} iterations")]
    NonConvergence {
        cohort: String,
        method: String,
        iterations: usize,
    },

    #[error("unsupported fine-mapping method: {0}")]
    UnsupportedMethod(String),

    #[error("invalid locus data for cohort {cohort}: {reason}")]
    InvalidLocus { cohort: String, reason: String },

    #[error("method {method} returned malformed output: {reason}")]
    InvalidMethodOutput { method: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cohort {0} was supplied more than once")]
    DuplicateCohort(String),

    #[error("locus {locus} has no cohorts")]
    NoCohorts { locus: String },

    #[error("every fine-mapping run failed for locus {locus}: {}", .failures.join("; "))]
    AllSourcesFailed { locus: String, failures: Vec<String> },

    #[error("thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, CredmetaError>;

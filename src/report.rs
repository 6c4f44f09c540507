use bon::Builder;
use derive_new::new;

use crate::{
    consensus::ConsensusSet,
    credible_set::Provenance,
    harmonize::{HarmonizeDiagnostics, HarmonizedLocus},
    math::cochran_q,
    variant::Variant,
};

/// Credible set counts of one source before and after evaluation
#[derive(Debug, Clone, PartialEq, new)]
pub struct SourceCounts {
    pub provenance: Provenance,
    pub raw_sets: usize,
    pub passing_sets: usize,
}

/// A source dropped from reconciliation
#[derive(Debug, Clone, PartialEq, new)]
pub struct FailedSource {
    pub provenance: Provenance,
    pub reason: String,
}

/// Effect heterogeneity of one shared variant across cohorts
#[derive(Debug, Clone, PartialEq, new)]
pub struct Heterogeneity {
    pub variant: usize,
    pub n_cohorts: usize,
    pub q: f64,
    pub p_value: f64,
    pub i_squared: f64,
}
impl Heterogeneity {
    /// Cochran's Q for every shared variant observed by at least two cohorts
    pub fn for_locus(locus: &HarmonizedLocus) -> Vec<Self> {
        (0..locus.variants().len())
            .filter_map(|shared| {
                let (beta, se): (Vec<f64>, Vec<f64>) = locus
                    .cohorts()
                    .iter()
                    .filter_map(|c| {
                        c.local_index(shared)
                            .map(|li| (c.data().beta()[li], c.data().se()[li]))
                    })
                    .unzip();
                if beta.len() < 2 {
                    return None;
                }
                let (q, p_value, i_squared) = cochran_q(&beta, &se);
                Some(Self::new(shared, beta.len(), q, p_value, i_squared))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Diagnostics {
    pub harmonization: HarmonizeDiagnostics,
    pub sources: Vec<SourceCounts>,
    pub failed: Vec<FailedSource>,
    pub heterogeneity: Vec<Heterogeneity>,
}
impl Diagnostics {
    /// Cohorts contributing nothing: dropped during harmonization or failed for every method
    pub fn excluded_cohorts(&self) -> Vec<&str> {
        let mut excluded = self
            .harmonization
            .excluded_cohorts
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>();
        for failed in &self.failed {
            let cohort = failed.provenance.cohort.as_str();
            let any_success = self
                .sources
                .iter()
                .any(|s| s.provenance.cohort == cohort);
            if !any_success && !excluded.contains(&cohort) {
                excluded.push(cohort);
            }
        }
        excluded.sort_unstable();
        excluded
    }
}

/// Final per-locus result
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct MetaReport {
    #[builder(into)]
    locus_id: String,
    variants: Vec<Variant>,
    consensus_sets: Vec<ConsensusSet>,
    diagnostics: Diagnostics,
}
impl MetaReport {
    pub fn locus_id(&self) -> &str {
        &self.locus_id
    }

    /// The shared variant index all set members refer to
    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Consensus sets, best first
    pub fn consensus_sets(&self) -> &[ConsensusSet] {
        &self.consensus_sets
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// `(variant, consensus set rank, merged pip)` for every consensus member
    pub fn merged_pips(&self) -> Vec<(&Variant, usize, f64)> {
        self.consensus_sets
            .iter()
            .enumerate()
            .flat_map(|(rank, set)| {
                set.members()
                    .iter()
                    .zip(set.pips().iter())
                    .map(move |(idx, pip)| (&self.variants[*idx], rank, *pip))
            })
            .collect()
    }

    pub fn pprint(&self) {
        println!("Locus\tSet\tVariant\tPIP\tCoverage\tPurity\tSources");
        for (rank, set) in self.consensus_sets.iter().enumerate() {
            let sources = set
                .sources()
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(",");
            for (idx, pip) in set.members().iter().zip(set.pips().iter()) {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    self.locus_id,
                    rank,
                    self.variants[*idx],
                    pip,
                    set.coverage(),
                    set.purity(),
                    sources
                );
            }
        }
    }
}

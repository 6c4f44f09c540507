use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use derive_new::new;
use itertools::Itertools;
use ndarray::Array2;
use tracing::{debug, info, warn};

use crate::{
    config::{HarmonizeConfig, IndexMode},
    error::{CredmetaError, Result},
    locus::LocusData,
    utils::{allele_class, complement, is_strand_ambiguous, sorted_pair},
    variant::Variant,
};

/// Cohorts missing more than this share of the shared index are flagged
const MISSINGNESS_WARNING: f64 = 0.1;

/// Per-cohort counts collected while harmonizing
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CohortHarmonization {
    pub cohort: String,
    pub input_variants: usize,
    pub ambiguous_dropped: usize,
    pub multiallelic_dropped: usize,
    pub mismatch_dropped: usize,
    pub flipped: usize,
    pub retained: usize,
    /// Share of the shared index absent from this cohort
    pub missingness: f64,
}

/// A site excluded because its alleles disagree between cohorts
#[derive(Debug, Clone, PartialEq, new)]
pub struct MismatchedSite {
    pub site: String,
    pub cohorts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HarmonizeDiagnostics {
    pub cohorts: Vec<CohortHarmonization>,
    pub mismatched_sites: Vec<MismatchedSite>,
    /// Cohorts left without any shared variant
    pub excluded_cohorts: Vec<String>,
}

/// One cohort expressed in the shared variant space
#[derive(Debug, Clone)]
pub struct HarmonizedCohort {
    data: LocusData,
    /// Shared index of each local variant
    shared_indices: Vec<usize>,
    /// Local index of each shared variant, `None` when the cohort lacks it
    local_of: Vec<Option<usize>>,
}
impl HarmonizedCohort {
    pub fn data(&self) -> &LocusData {
        &self.data
    }

    pub fn cohort(&self) -> &str {
        self.data.cohort()
    }

    pub fn sample_size(&self) -> usize {
        self.data.sample_size()
    }

    pub fn shared_indices(&self) -> &[usize] {
        &self.shared_indices
    }

    pub fn local_index(&self, shared: usize) -> Option<usize> {
        self.local_of.get(shared).copied().flatten()
    }

    pub fn contains(&self, shared: usize) -> bool {
        self.local_index(shared).is_some()
    }

    /// LD between two shared variants as seen by this cohort
    pub fn shared_r(&self, i: usize, j: usize) -> Option<f64> {
        let li = self.local_index(i)?;
        let lj = self.local_index(j)?;
        Some(self.data.r(li, lj))
    }
}

/// All cohorts of one locus aligned onto a common ordered variant index
#[derive(Debug, Clone)]
pub struct HarmonizedLocus {
    locus_id: String,
    variants: Vec<Variant>,
    cohorts: Vec<HarmonizedCohort>,
    shared_ld: Option<Arc<Array2<f64>>>,
    diagnostics: HarmonizeDiagnostics,
}
impl HarmonizedLocus {
    pub fn locus_id(&self) -> &str {
        &self.locus_id
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Cohorts sorted by identifier
    pub fn cohorts(&self) -> &[HarmonizedCohort] {
        &self.cohorts
    }

    pub fn cohort(&self, id: &str) -> Option<&HarmonizedCohort> {
        self.cohorts.iter().find(|c| c.cohort() == id)
    }

    /// Sample-size weighted LD over all cohorts, if every pair is covered
    pub fn shared_ld(&self) -> Option<&Arc<Array2<f64>>> {
        self.shared_ld.as_ref()
    }

    pub fn diagnostics(&self) -> &HarmonizeDiagnostics {
        &self.diagnostics
    }
}

/// One cohort's observation of a site
struct SiteEntry<'a> {
    cohort: usize,
    local: usize,
    ref_allele: &'a str,
    alt_allele: &'a str,
}

/// Orientation of a cohort allele pair relative to the site reference
fn orientation(entry: &SiteEntry, site: &(String, String), strand_flip: bool) -> Option<bool> {
    let (r, a) = (entry.ref_allele, entry.alt_allele);
    if (r, a) == (site.0.as_str(), site.1.as_str()) {
        return Some(false);
    }
    if (a, r) == (site.0.as_str(), site.1.as_str()) {
        return Some(true);
    }
    if strand_flip {
        let (cr, ca) = (complement(r), complement(a));
        if (cr.as_str(), ca.as_str()) == (site.0.as_str(), site.1.as_str()) {
            return Some(false);
        }
        if (ca.as_str(), cr.as_str()) == (site.0.as_str(), site.1.as_str()) {
            return Some(true);
        }
    }
    None
}

#[derive(Debug, Clone, Copy, Default, new)]
pub struct Harmonizer {
    config: HarmonizeConfig,
}
impl Harmonizer {
    /// Aligns all cohorts of a locus onto a shared variant index.
    ///
    /// Sites whose alleles cannot be reconciled are excluded and recorded, the
    /// locus only fails when nothing is left.
    pub fn harmonize(&self, locus_id: &str, cohorts: &[LocusData]) -> Result<HarmonizedLocus> {
        if cohorts.is_empty() {
            return Err(CredmetaError::NoCohorts {
                locus: locus_id.to_string(),
            });
        }
        let mut seen = HashSet::new();
        for cohort in cohorts {
            if !seen.insert(cohort.cohort()) {
                return Err(CredmetaError::DuplicateCohort(cohort.cohort().to_string()));
            }
        }

        let cohorts = cohorts
            .iter()
            .sorted_by(|a, b| a.cohort().cmp(b.cohort()))
            .collect::<Vec<_>>();
        let upper = cohorts
            .iter()
            .map(|c| {
                c.variants()
                    .iter()
                    .map(|v| {
                        (
                            v.ref_allele().to_ascii_uppercase(),
                            v.alt_allele().to_ascii_uppercase(),
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        let mut stats = cohorts
            .iter()
            .map(|c| CohortHarmonization {
                cohort: c.cohort().to_string(),
                input_variants: c.n_variants(),
                ..Default::default()
            })
            .collect::<Vec<_>>();

        // Group every cohort's variants by site
        let mut sites: BTreeMap<(String, u64), Vec<SiteEntry>> = BTreeMap::new();
        for (ci, cohort) in cohorts.iter().enumerate() {
            let mut per_site: BTreeMap<(String, u64), Vec<usize>> = BTreeMap::new();
            for (li, variant) in cohort.variants().iter().enumerate() {
                let (r, a) = &upper[ci][li];
                if self.config.drop_ambiguous && is_strand_ambiguous(r, a) {
                    stats[ci].ambiguous_dropped += 1;
                    continue;
                }
                per_site
                    .entry((variant.chrom().to_string(), variant.pos()))
                    .or_default()
                    .push(li);
            }
            for (key, locals) in per_site {
                if locals.len() > 1 {
                    stats[ci].multiallelic_dropped += locals.len();
                    continue;
                }
                let li = locals[0];
                sites.entry(key).or_default().push(SiteEntry {
                    cohort: ci,
                    local: li,
                    ref_allele: &upper[ci][li].0,
                    alt_allele: &upper[ci][li].1,
                });
            }
        }

        // Reconcile alleles site by site
        let mut diagnostics = HarmonizeDiagnostics::default();
        let mut shared: Vec<(Variant, Vec<(usize, usize, bool)>)> = Vec::new();
        for ((chrom, pos), entries) in sites {
            if self.config.index_mode == IndexMode::Intersection && entries.len() < cohorts.len() {
                continue;
            }
            match self.reconcile_site(&chrom, pos, &entries, &cohorts) {
                Ok((variant, oriented)) => shared.push((variant, oriented)),
                Err(CredmetaError::AlleleMismatch { site, cohorts: names }) => {
                    warn!("Excluding {site}: alleles disagree across {}", names.join(", "));
                    for entry in &entries {
                        stats[entry.cohort].mismatch_dropped += 1;
                    }
                    diagnostics
                        .mismatched_sites
                        .push(MismatchedSite::new(site, names));
                }
                Err(e) => return Err(e),
            }
        }
        shared.sort_by(|a, b| a.0.genomic_cmp(&b.0));

        if shared.is_empty() {
            return Err(CredmetaError::EmptyLocus {
                locus: locus_id.to_string(),
            });
        }
        let variants = shared.iter().map(|(v, _)| v.clone()).collect::<Vec<_>>();

        // Re-express each cohort in shared order
        let mut harmonized = Vec::with_capacity(cohorts.len());
        for (ci, cohort) in cohorts.iter().enumerate() {
            let mut order = Vec::new();
            let mut flips = Vec::new();
            let mut shared_indices = Vec::new();
            let mut local_of = vec![None; variants.len()];
            for (si, (_, oriented)) in shared.iter().enumerate() {
                if let Some((_, li, flip)) = oriented.iter().find(|(c, _, _)| *c == ci) {
                    local_of[si] = Some(order.len());
                    order.push(*li);
                    flips.push(*flip);
                    shared_indices.push(si);
                }
            }

            let entry = &mut stats[ci];
            entry.retained = order.len();
            entry.flipped = flips.iter().filter(|f| **f).count();
            entry.missingness = 1.0 - order.len() as f64 / variants.len() as f64;
            if entry.missingness > MISSINGNESS_WARNING {
                warn!(
                    "Cohort {} is missing {:.3} of the shared variants at {locus_id}",
                    entry.cohort, entry.missingness
                );
            } else {
                debug!(
                    "Cohort {} is missing {:.3} of the shared variants at {locus_id}",
                    entry.cohort, entry.missingness
                );
            }

            if order.is_empty() {
                warn!("Cohort {} has no shared variants at {locus_id}", entry.cohort);
                diagnostics.excluded_cohorts.push(entry.cohort.clone());
                continue;
            }

            let subset = shared_indices
                .iter()
                .map(|si| variants[*si].clone())
                .collect::<Vec<_>>();
            let data = cohort.reindexed(&order, &flips, subset)?;
            harmonized.push(HarmonizedCohort {
                data,
                shared_indices,
                local_of,
            });
        }

        let shared_ld = shared_ld(variants.len(), &harmonized).map(Arc::new);
        diagnostics.cohorts = stats;

        info!(
            "Harmonized {} cohorts at {locus_id}: {} shared variants, {} mismatched sites",
            harmonized.len(),
            variants.len(),
            diagnostics.mismatched_sites.len()
        );

        Ok(HarmonizedLocus {
            locus_id: locus_id.to_string(),
            variants,
            cohorts: harmonized,
            shared_ld,
            diagnostics,
        })
    }

    /// Picks the reference alleles of a site and orients every cohort against them
    fn reconcile_site(
        &self,
        chrom: &str,
        pos: u64,
        entries: &[SiteEntry],
        cohorts: &[&LocusData],
    ) -> Result<(Variant, Vec<(usize, usize, bool)>)> {
        let strand_flip = self.config.allow_strand_flip;
        let mismatch = || CredmetaError::AlleleMismatch {
            site: format!("{chrom}:{pos}"),
            cohorts: entries
                .iter()
                .map(|e| cohorts[e.cohort].cohort().to_string())
                .collect(),
        };

        let all_same_class = entries
            .iter()
            .map(|e| allele_class(e.ref_allele, e.alt_allele, strand_flip))
            .all_equal();
        if !all_same_class {
            return Err(mismatch());
        }

        let site = entries
            .iter()
            .map(|e| sorted_pair(e.ref_allele, e.alt_allele))
            .min()
            .ok_or_else(mismatch)?;

        let mut oriented = Vec::with_capacity(entries.len());
        for entry in entries {
            let flip = orientation(entry, &site, strand_flip).ok_or_else(mismatch)?;
            oriented.push((entry.cohort, entry.local, flip));
        }
        Ok((Variant::new(chrom, pos, site.0, site.1), oriented))
    }
}

/// Sample-size weighted LD over the cohorts observing each pair
fn shared_ld(n: usize, cohorts: &[HarmonizedCohort]) -> Option<Array2<f64>> {
    let mut ld = Array2::<f64>::eye(n);
    for i in 0..n {
        for j in (i + 1)..n {
            let (sum, weight) = cohorts
                .iter()
                .filter_map(|c| c.shared_r(i, j).map(|r| (r, c.sample_size() as f64)))
                .fold((0.0, 0.0), |(s, w), (r, n)| (s + r * n, w + n));
            if weight == 0.0 {
                return None;
            }
            ld[[i, j]] = sum / weight;
            ld[[j, i]] = sum / weight;
        }
    }
    Some(ld)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn cohort(id: &str, variants: Vec<Variant>, beta: Vec<f64>, ld: Array2<f64>, n: usize) -> LocusData {
        let se = vec![0.05; variants.len()];
        LocusData::new(id, variants, beta, se, ld, n).unwrap()
    }

    #[test]
    fn test_opposite_alleles_flip_one_cohort() {
        let a = cohort(
            "a",
            vec![Variant::new("1", 100, "A", "G"), Variant::new("1", 200, "C", "T")],
            vec![0.3, 0.1],
            array![[1.0, 0.5], [0.5, 1.0]],
            1000,
        );
        let b = cohort(
            "b",
            vec![Variant::new("1", 100, "G", "A"), Variant::new("1", 200, "C", "T")],
            vec![-0.3, 0.1],
            array![[1.0, -0.5], [-0.5, 1.0]],
            2000,
        );
        let locus = Harmonizer::default().harmonize("L1", &[a, b]).unwrap();
        let ca = locus.cohort("a").unwrap();
        let cb = locus.cohort("b").unwrap();
        assert_eq!(ca.data().beta(), cb.data().beta());
        assert_eq!(ca.data().beta()[0], 0.3);
        assert_eq!(cb.data().r(0, 1), 0.5);
        let diag = locus.diagnostics();
        assert_eq!(diag.cohorts[0].flipped, 0);
        assert_eq!(diag.cohorts[1].flipped, 1);
        assert_eq!(locus.variants()[0].id(), "1:100:A:G");
        assert_relative_eq!(locus.shared_ld().unwrap()[[0, 1]], 0.5);
    }

    #[test]
    fn test_ambiguous_dropped_by_default() {
        let a = cohort(
            "a",
            vec![Variant::new("1", 100, "A", "T"), Variant::new("1", 200, "C", "T")],
            vec![0.3, 0.1],
            array![[1.0, 0.5], [0.5, 1.0]],
            1000,
        );
        let locus = Harmonizer::default().harmonize("L1", &[a.clone()]).unwrap();
        assert_eq!(locus.variants().len(), 1);
        assert_eq!(locus.diagnostics().cohorts[0].ambiguous_dropped, 1);

        let config = HarmonizeConfig::builder().drop_ambiguous(false).build();
        let locus = Harmonizer::new(config).harmonize("L1", &[a]).unwrap();
        assert_eq!(locus.variants().len(), 2);
    }

    #[test]
    fn test_case_insensitive_alleles() {
        let a = cohort("a", vec![Variant::new("1", 100, "a", "g")], vec![0.3], array![[1.0]], 10);
        let b = cohort("b", vec![Variant::new("1", 100, "G", "A")], vec![-0.3], array![[1.0]], 10);
        let locus = Harmonizer::default().harmonize("L1", &[a, b]).unwrap();
        assert_eq!(locus.variants().len(), 1);
        assert_eq!(locus.cohort("b").unwrap().data().beta(), &[0.3]);
    }

    #[test]
    fn test_strand_flip_requires_config() {
        let a = cohort("a", vec![Variant::new("1", 100, "A", "G")], vec![0.3], array![[1.0]], 10);
        let b = cohort("b", vec![Variant::new("1", 100, "C", "T")], vec![-0.3], array![[1.0]], 10);

        let err = Harmonizer::default()
            .harmonize("L1", &[a.clone(), b.clone()])
            .unwrap_err();
        assert!(matches!(err, CredmetaError::EmptyLocus { .. }));

        let config = HarmonizeConfig::builder().allow_strand_flip(true).build();
        let locus = Harmonizer::new(config).harmonize("L1", &[a, b]).unwrap();
        // C/T complements to G/A, the reverse of A/G
        assert_eq!(locus.cohort("b").unwrap().data().beta(), &[0.3]);
    }

    #[test]
    fn test_mismatch_excludes_only_the_site() {
        let a = cohort(
            "a",
            vec![Variant::new("1", 100, "A", "G"), Variant::new("1", 200, "C", "T")],
            vec![0.3, 0.1],
            array![[1.0, 0.5], [0.5, 1.0]],
            1000,
        );
        let b = cohort(
            "b",
            vec![Variant::new("1", 100, "A", "C"), Variant::new("1", 200, "C", "T")],
            vec![0.3, 0.1],
            array![[1.0, 0.5], [0.5, 1.0]],
            1000,
        );
        let locus = Harmonizer::default().harmonize("L1", &[a, b]).unwrap();
        assert_eq!(locus.variants().len(), 1);
        assert_eq!(locus.variants()[0].pos(), 200);
        let diag = locus.diagnostics();
        assert_eq!(
            diag.mismatched_sites,
            vec![MismatchedSite::new("1:100".into(), vec!["a".into(), "b".into()])]
        );
        assert_eq!(diag.cohorts[0].mismatch_dropped, 1);
    }

    #[test]
    fn test_union_keeps_missing_variants() {
        let a = cohort(
            "a",
            vec![Variant::new("1", 100, "A", "G"), Variant::new("1", 200, "C", "T")],
            vec![0.3, 0.1],
            array![[1.0, 0.5], [0.5, 1.0]],
            1000,
        );
        let b = cohort(
            "b",
            vec![Variant::new("1", 200, "C", "T"), Variant::new("1", 300, "A", "C")],
            vec![0.1, 0.2],
            array![[1.0, 0.4], [0.4, 1.0]],
            1000,
        );
        let intersection = Harmonizer::default().harmonize("L1", &[a.clone(), b.clone()]).unwrap();
        assert_eq!(intersection.variants().len(), 1);

        let config = HarmonizeConfig::builder().index_mode(IndexMode::Union).build();
        let union = Harmonizer::new(config).harmonize("L1", &[a, b]).unwrap();
        assert_eq!(union.variants().len(), 3);
        let cb = union.cohort("b").unwrap();
        assert!(!cb.contains(0));
        assert_eq!(cb.local_index(2), Some(1));
        assert_eq!(cb.shared_r(1, 2), Some(0.4));
        assert_eq!(cb.shared_r(0, 1), None);
        assert_relative_eq!(union.diagnostics().cohorts[1].missingness, 1.0 / 3.0);
        // pair (100, 300) is observed by no cohort
        assert!(union.shared_ld().is_none());
    }

    #[test]
    fn test_shared_index_sorted_by_position() {
        let a = cohort(
            "a",
            vec![Variant::new("1", 300, "A", "G"), Variant::new("1", 100, "C", "T")],
            vec![0.3, 0.1],
            array![[1.0, 0.5], [0.5, 1.0]],
            1000,
        );
        let locus = Harmonizer::default().harmonize("L1", &[a]).unwrap();
        let positions = locus.variants().iter().map(|v| v.pos()).collect::<Vec<_>>();
        assert_eq!(positions, vec![100, 300]);
        assert_eq!(locus.cohorts()[0].data().beta(), &[0.1, 0.3]);
    }

    #[test]
    fn test_order_independent() {
        let a = cohort(
            "a",
            vec![Variant::new("1", 100, "A", "G"), Variant::new("1", 200, "C", "T")],
            vec![0.3, 0.1],
            array![[1.0, 0.5], [0.5, 1.0]],
            1000,
        );
        let b = cohort(
            "b",
            vec![Variant::new("1", 100, "G", "A"), Variant::new("1", 200, "T", "C")],
            vec![-0.3, -0.1],
            array![[1.0, 0.6], [0.6, 1.0]],
            3000,
        );
        let h = Harmonizer::default();
        let ab = h.harmonize("L1", &[a.clone(), b.clone()]).unwrap();
        let ba = h.harmonize("L1", &[b, a]).unwrap();
        assert_eq!(ab.variants(), ba.variants());
        assert_eq!(ab.diagnostics(), ba.diagnostics());
        assert_eq!(ab.shared_ld(), ba.shared_ld());
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            Harmonizer::default().harmonize("L1", &[]),
            Err(CredmetaError::NoCohorts { .. })
        ));
        let a = cohort("a", vec![Variant::new("1", 100, "A", "G")], vec![0.3], array![[1.0]], 10);
        assert!(matches!(
            Harmonizer::default().harmonize("L1", &[a.clone(), a]),
            Err(CredmetaError::DuplicateCohort(_))
        ));
    }
}

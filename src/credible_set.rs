use std::cmp::Ordering;
use std::fmt;

use derive_new::new;

use crate::variant::Variant;

/// Which cohort and method produced a credible set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, new)]
pub struct Provenance {
    pub cohort: String,
    pub method: String,
}
impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cohort, self.method)
    }
}

/// A set of variants jointly likely to hold one causal variant.
///
/// Members are indices into the shared harmonized variant index, sorted and
/// unique. Instances are never changed after creation, annotation returns a copy.
#[derive(Debug, Clone, PartialEq)]
pub struct CredibleSet {
    members: Vec<usize>,
    pips: Vec<f64>,
    coverage: f64,
    purity: Option<f64>,
    provenance: Provenance,
}
impl CredibleSet {
    /// Builds a set from `(shared index, pip)` pairs.
    ///
    /// Pairs are sorted by index, repeated indices keep their first pip and
    /// pips are clamped to `[0, 1]`.
    pub fn new(mut members: Vec<(usize, f64)>, provenance: Provenance) -> Self {
        members.sort_by_key(|(idx, _)| *idx);
        members.dedup_by_key(|(idx, _)| *idx);
        let (members, pips): (Vec<_>, Vec<_>) = members
            .into_iter()
            .map(|(idx, pip)| (idx, pip.clamp(0.0, 1.0)))
            .unzip();
        let coverage = pips.iter().sum();
        Self {
            members,
            pips,
            coverage,
            purity: None,
            provenance,
        }
    }

    pub fn with_purity(&self, purity: f64) -> Self {
        Self {
            purity: Some(purity),
            ..self.clone()
        }
    }

    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn pips(&self) -> &[f64] {
        &self.pips
    }

    pub fn coverage(&self) -> f64 {
        self.coverage
    }

    /// `None` until the set has been evaluated
    pub fn purity(&self) -> Option<f64> {
        self.purity
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, shared: usize) -> bool {
        self.members.binary_search(&shared).is_ok()
    }

    pub fn pip_of(&self, shared: usize) -> Option<f64> {
        self.members
            .binary_search(&shared)
            .ok()
            .map(|i| self.pips[i])
    }
}

/// Anything ordered by the credible set ranking rule
pub trait Ranked {
    fn coverage(&self) -> f64;
    /// Sorted shared indices
    fn members(&self) -> &[usize];
    /// Final tie-break once coverage, size and position agree
    fn provenance_key(&self) -> Vec<&Provenance>;
}

impl Ranked for CredibleSet {
    fn coverage(&self) -> f64 {
        self.coverage
    }

    fn members(&self) -> &[usize] {
        &self.members
    }

    fn provenance_key(&self) -> Vec<&Provenance> {
        vec![&self.provenance]
    }
}

/// Coverage descending, then size ascending, then lowest member position.
///
/// Remaining ties fall back to the member indices and the provenance so the
/// order is total.
pub fn rank_cmp<T: Ranked>(a: &T, b: &T, variants: &[Variant]) -> Ordering {
    b.coverage()
        .total_cmp(&a.coverage())
        .then(a.members().len().cmp(&b.members().len()))
        .then_with(|| match (a.members().first(), b.members().first()) {
            (Some(x), Some(y)) => variants[*x].genomic_cmp(&variants[*y]),
            (x, y) => x.cmp(&y),
        })
        .then_with(|| a.members().cmp(b.members()))
        .then_with(|| a.provenance_key().cmp(&b.provenance_key()))
}

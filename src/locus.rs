use std::sync::Arc;

use approx::abs_diff_eq;
use itertools::Itertools;
use ndarray::{Array2, Axis};

use crate::{
    error::{CredmetaError, Result},
    utils::select_indices,
    variant::Variant,
};

/// Tolerance on the LD diagonal and on LD symmetry
pub const LD_TOLERANCE: f64 = 1e-6;

/// One cohort's summary statistics and LD at a locus.
///
/// The LD matrix is held behind an `Arc` so that concurrent readers share it
/// without copies. Nothing in the struct can be changed after construction.
#[derive(Debug, Clone)]
pub struct LocusData {
    cohort: String,
    variants: Vec<Variant>,
    beta: Vec<f64>,
    se: Vec<f64>,
    ld: Arc<Array2<f64>>,
    sample_size: usize,
}

impl LocusData {
    pub fn new(
        cohort: impl Into<String>,
        variants: Vec<Variant>,
        beta: Vec<f64>,
        se: Vec<f64>,
        ld: Array2<f64>,
        sample_size: usize,
    ) -> Result<Self> {
        Self::from_shared(cohort, variants, beta, se, Arc::new(ld), sample_size)
    }

    /// Builds a locus around an LD matrix that is already shared elsewhere
    pub fn from_shared(
        cohort: impl Into<String>,
        variants: Vec<Variant>,
        beta: Vec<f64>,
        se: Vec<f64>,
        ld: Arc<Array2<f64>>,
        sample_size: usize,
    ) -> Result<Self> {
        let locus = Self {
            cohort: cohort.into(),
            variants,
            beta,
            se,
            ld,
            sample_size,
        };
        locus.validate()?;
        Ok(locus)
    }

    fn invalid(&self, reason: impl Into<String>) -> CredmetaError {
        CredmetaError::InvalidLocus {
            cohort: self.cohort.clone(),
            reason: reason.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        let n = self.variants.len();
        if n == 0 {
            return Err(self.invalid("no variants"));
        }
        if self.sample_size == 0 {
            return Err(self.invalid("sample size must be positive"));
        }
        if self.beta.len() != n || self.se.len() != n {
            return Err(self.invalid(format!(
                "{n} variants but {} effects and {} standard errors",
                self.beta.len(),
                self.se.len()
            )));
        }
        if self.ld.dim() != (n, n) {
            let (rows, cols) = self.ld.dim();
            return Err(self.invalid(format!(
                "LD matrix is {rows}x{cols}, expected {n}x{n}"
            )));
        }
        if let Some(dup) = self.variants.iter().duplicates().next() {
            return Err(self.invalid(format!("duplicate variant {dup}")));
        }
        if let Some(i) = self.beta.iter().position(|b| !b.is_finite()) {
            return Err(self.invalid(format!("non-finite effect for {}", self.variants[i])));
        }
        if let Some(i) = self.se.iter().position(|s| !s.is_finite() || *s <= 0.0) {
            return Err(self.invalid(format!(
                "standard error for {} must be finite and positive",
                self.variants[i]
            )));
        }
        for i in 0..n {
            if !abs_diff_eq!(self.ld[[i, i]], 1.0, epsilon = LD_TOLERANCE) {
                return Err(self.invalid(format!(
                    "LD diagonal at {} is {}",
                    self.variants[i],
                    self.ld[[i, i]]
                )));
            }
            for j in (i + 1)..n {
                if !abs_diff_eq!(self.ld[[i, j]], self.ld[[j, i]], epsilon = LD_TOLERANCE) {
                    return Err(self.invalid(format!(
                        "LD matrix is not symmetric at ({}, {})",
                        self.variants[i], self.variants[j]
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn cohort(&self) -> &str {
        &self.cohort
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn beta(&self) -> &[f64] {
        &self.beta
    }

    pub fn se(&self) -> &[f64] {
        &self.se
    }

    pub fn ld(&self) -> &Arc<Array2<f64>> {
        &self.ld
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn n_variants(&self) -> usize {
        self.variants.len()
    }

    pub fn r(&self, i: usize, j: usize) -> f64 {
        self.ld[[i, j]]
    }

    pub fn z_scores(&self) -> Vec<f64> {
        self.beta
            .iter()
            .zip(self.se.iter())
            .map(|(b, s)| b / s)
            .collect()
    }

    /// Re-expresses the locus in a new variant order.
    ///
    /// `order[k]` is the local index of the k-th output variant and `flips[k]`
    /// negates its effect together with its LD row and column.
    pub(crate) fn reindexed(
        &self,
        order: &[usize],
        flips: &[bool],
        variants: Vec<Variant>,
    ) -> Result<Self> {
        let beta = select_indices(order, &self.beta)
            .into_iter()
            .zip(flips.iter())
            .map(|(b, flip)| if *flip { -b } else { b })
            .collect();
        let se = select_indices(order, &self.se);

        let mut ld = self.ld.select(Axis(0), order).select(Axis(1), order);
        for (k, _) in flips.iter().enumerate().filter(|(_, flip)| **flip) {
            ld.row_mut(k).mapv_inplace(|r| -r);
            ld.column_mut(k).mapv_inplace(|r| -r);
        }

        Self::new(
            self.cohort.clone(),
            variants,
            beta,
            se,
            ld,
            self.sample_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn variants(n: u64) -> Vec<Variant> {
        (0..n).map(|i| Variant::new("1", 100 + i, "A", "G")).collect()
    }

    #[test]
    fn test_valid_locus() {
        let locus = LocusData::new(
            "c1",
            variants(2),
            vec![0.1, -0.2],
            vec![0.05, 0.05],
            array![[1.0, 0.3], [0.3, 1.0]],
            1000,
        )
        .unwrap();
        assert_eq!(locus.n_variants(), 2);
        assert_eq!(locus.z_scores(), vec![2.0, -4.0]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = LocusData::new(
            "c1",
            variants(3),
            vec![0.1, -0.2, 0.0],
            vec![0.05, 0.05, 0.05],
            array![[1.0, 0.3], [0.3, 1.0]],
            1000,
        )
        .unwrap_err();
        assert!(matches!(err, CredmetaError::InvalidLocus { .. }));
    }

    #[test]
    fn test_asymmetric_ld() {
        let err = LocusData::new(
            "c1",
            variants(2),
            vec![0.1, -0.2],
            vec![0.05, 0.05],
            array![[1.0, 0.3], [0.2, 1.0]],
            1000,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not symmetric"));
    }

    #[test]
    fn test_bad_diagonal() {
        let result = LocusData::new(
            "c1",
            variants(2),
            vec![0.1, -0.2],
            vec![0.05, 0.05],
            array![[0.9, 0.3], [0.3, 1.0]],
            1000,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_sample_size() {
        let result = LocusData::new(
            "c1",
            variants(1),
            vec![0.1],
            vec![0.05],
            array![[1.0]],
            0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_reindexed_flips_ld_sign() {
        let locus = LocusData::new(
            "c1",
            variants(3),
            vec![0.1, 0.2, 0.3],
            vec![0.05, 0.06, 0.07],
            array![[1.0, 0.5, 0.2], [0.5, 1.0, 0.4], [0.2, 0.4, 1.0]],
            500,
        )
        .unwrap();
        let order = [2, 0];
        let flips = [true, false];
        let out = locus
            .reindexed(&order, &flips, vec![locus.variants()[2].clone(), locus.variants()[0].clone()])
            .unwrap();
        assert_eq!(out.beta(), &[-0.3, 0.1]);
        assert_eq!(out.se(), &[0.07, 0.05]);
        assert_eq!(out.r(0, 1), -0.2);
        assert_eq!(out.r(1, 0), -0.2);
        assert_eq!(out.r(0, 0), 1.0);
        // the input is untouched
        assert_eq!(locus.r(0, 2), 0.2);
    }
}

pub fn select_indices<T: Copy>(indices: &[usize], data: &[T]) -> Vec<T> {
    indices.iter().map(|i| data[*i]).collect()
}

pub fn is_strand_ambiguous(a1: &str, a2: &str) -> bool {
    matches!((a1, a2), ("A", "T") | ("T", "A") | ("C", "G") | ("G", "C"))
}

/// Complements every base of an allele, leaving non-ACGT characters untouched
pub fn complement(allele: &str) -> String {
    allele
        .chars()
        .map(|c| match c {
            'A' => 'T',
            'T' => 'A',
            'C' => 'G',
            'G' => 'C',
            other => other,
        })
        .collect()
}

/// Returns the allele pair sorted alphabetically
pub fn sorted_pair(a1: &str, a2: &str) -> (String, String) {
    if a1 <= a2 {
        (a1.to_string(), a2.to_string())
    } else {
        (a2.to_string(), a1.to_string())
    }
}

/// The orientation-free class of an allele pair.
///
/// When strand flips are allowed a pair and its complement share a class.
pub fn allele_class(a1: &str, a2: &str, strand_agnostic: bool) -> (String, String) {
    let direct = sorted_pair(a1, a2);
    if !strand_agnostic {
        return direct;
    }
    let flipped = sorted_pair(&complement(a1), &complement(a2));
    direct.min(flipped)
}

use std::cmp::Ordering;
use std::fmt;

/// A biallelic variant identified by its genomic coordinate and alleles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variant {
    chrom: String,
    pos: u64,
    ref_allele: String,
    alt_allele: String,
}

impl Variant {
    pub fn new(
        chrom: impl Into<String>,
        pos: u64,
        ref_allele: impl Into<String>,
        alt_allele: impl Into<String>,
    ) -> Self {
        Self {
            chrom: chrom.into(),
            pos,
            ref_allele: ref_allele.into(),
            alt_allele: alt_allele.into(),
        }
    }

    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn ref_allele(&self) -> &str {
        &self.ref_allele
    }

    pub fn alt_allele(&self) -> &str {
        &self.alt_allele
    }

    /// `chrom:pos:ref:alt`
    pub fn id(&self) -> String {
        self.to_string()
    }

    /// `chrom:pos`, the key under which cohorts are matched
    pub fn site(&self) -> String {
        format!("{}:{}", self.chrom, self.pos)
    }

    /// Orders variants by chromosome, then position, then alleles.
    ///
    /// Numeric chromosomes sort numerically ahead of named ones, with an
    /// optional `chr` prefix ignored.
    pub fn genomic_cmp(&self, other: &Self) -> Ordering {
        chrom_key(&self.chrom)
            .cmp(&chrom_key(&other.chrom))
            .then_with(|| self.chrom.cmp(&other.chrom))
            .then(self.pos.cmp(&other.pos))
            .then_with(|| self.ref_allele.cmp(&other.ref_allele))
            .then_with(|| self.alt_allele.cmp(&other.alt_allele))
    }
}

fn chrom_key(chrom: &str) -> (u8, u64, String) {
    let bare = match chrom.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("chr") => &chrom[3..],
        _ => chrom,
    };
    match bare.parse::<u64>() {
        Ok(n) => (0, n, String::new()),
        Err(_) => (1, 0, bare.to_ascii_uppercase()),
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.chrom, self.pos, self.ref_allele, self.alt_allele
        )
    }
}

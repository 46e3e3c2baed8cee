
//! The `Bin` entity: a group of contigs believed to come from a single organism.
//!
//! A bin is identified by the label of the contig it was created from. Bins only ever
//! grow; merging moves every contig of the source bin into the target and recomputes
//! the length-weighted coverage. A bin becomes significant once a taxon and reference
//! genome have been assigned, at which point it acts as a starter bin for classification.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Disposition of a bin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BinStatus {
    /// Contig failed the binning filters.
    Bad,
    /// Contig is usable for binning and for the seed-protein search.
    SeedUsable,
    /// Contig is usable for binning only.
    Usable,
    /// Aggregate of two or more contigs.
    Virtual,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    id: String,
    name: String,
    contigs: BTreeSet<String>,
    len: u64,
    coverage: f64,
    status: BinStatus,
    significant: bool,
    #[serde(default)]
    taxon_id: Option<u32>,
    #[serde(default)]
    ref_genomes: Vec<String>,
    #[serde(default)]
    suffix: String,
}

impl Bin {
    /// Create a single-contig bin.
    pub fn new(label: &str, len: u64, coverage: f64, status: BinStatus) -> Self {
        Bin {
            id: label.to_string(),
            name: label.to_string(),
            contigs: BTreeSet::from([label.to_string()]),
            len,
            coverage,
            status,
            significant: false,
            taxon_id: None,
            ref_genomes: Vec::new(),
            suffix: String::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contigs(&self) -> &BTreeSet<String> {
        &self.contigs
    }

    pub fn length(&self) -> u64 {
        self.len
    }

    pub fn coverage(&self) -> f64 {
        self.coverage
    }

    pub fn status(&self) -> BinStatus {
        self.status
    }

    pub fn is_significant(&self) -> bool {
        self.significant
    }

    pub fn taxon_id(&self) -> Option<u32> {
        self.taxon_id
    }

    /// Candidate reference genomes; the first one is the genome the bin was named from.
    pub fn ref_genomes(&self) -> &[String] {
        &self.ref_genomes
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Assign taxonomic information, making this a significant bin.
    pub fn set_tax_info(&mut self, taxon_id: u32, name: &str, suffix: &str, ref_genome: &str) {
        self.taxon_id = Some(taxon_id);
        self.name = name.to_string();
        self.suffix = suffix.to_string();
        self.significant = true;
        self.add_ref_genome(ref_genome);
    }

    /// Record a candidate reference genome if it is not already known.
    pub fn add_ref_genome(&mut self, genome_id: &str) {
        if !self.ref_genomes.iter().any(|g| g == genome_id) {
            self.ref_genomes.push(genome_id.to_string());
        }
    }

    /// Absorb the contigs of another bin.
    ///
    /// Coverage is the length-weighted mean of the two bins. Taxonomy of the source bin
    /// is discarded.
    pub(crate) fn absorb(&mut self, other: Bin) {
        let total_len = self.len + other.len;
        if total_len > 0 {
            self.coverage = (self.coverage * self.len as f64 + other.coverage * other.len as f64)
                / total_len as f64;
        }
        self.len = total_len;
        self.contigs.extend(other.contigs);
        self.status = BinStatus::Virtual;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_bin() {
        let bin = Bin::new("NODE_1", 1000, 12.5, BinStatus::SeedUsable);
        assert_eq!(bin.id(), "NODE_1");
        assert_eq!(bin.name(), "NODE_1");
        assert_eq!(bin.contigs().len(), 1);
        assert!(!bin.is_significant());
        assert_eq!(bin.taxon_id(), None);
    }

    #[test]
    fn test_absorb() {
        let mut bin = Bin::new("c1", 300, 10.0, BinStatus::SeedUsable);
        bin.absorb(Bin::new("c2", 100, 20.0, BinStatus::Usable));

        assert_eq!(bin.length(), 400);
        assert!((bin.coverage() - 12.5).abs() < 1e-9);
        assert_eq!(bin.contigs().iter().collect::<Vec<_>>(), vec!["c1", "c2"]);
        assert_eq!(bin.status(), BinStatus::Virtual);
        assert_eq!(bin.id(), "c1");
    }

    #[test]
    fn test_tax_info() {
        let mut bin = Bin::new("c1", 300, 10.0, BinStatus::SeedUsable);
        bin.set_tax_info(562, "Escherichia coli clonal population", "clonal population", "562.1");
        bin.add_ref_genome("562.2");
        bin.add_ref_genome("562.1");

        assert!(bin.is_significant());
        assert_eq!(bin.taxon_id(), Some(562));
        assert_eq!(bin.ref_genomes(), &["562.1".to_string(), "562.2".to_string()]);
        assert_eq!(bin.suffix(), "clonal population");
    }
}

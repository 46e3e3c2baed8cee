
//! Discriminating k-mer databases.
//!
//! Sequences are added under a group label, and every k-mer is recorded against the label
//! it came from. Once all sequences are in, `finalize` discards the k-mers seen under more
//! than one label, leaving only k-mers that discriminate between groups. A query sequence
//! is scored by counting how many of its k-mers belong to each label.
//!
//! Two alphabets are supported behind the same `DiscriminatingKmerDb` trait: nucleotide
//! k-mers taken directly from the DNA, and amino-acid k-mers taken from its six-frame
//! translation.

use itertools::Itertools;
use log::debug;
use num_format::{Locale, ToFormattedString};
use rustc_hash::FxHashMap;

use crate::error::{BinError, Result};
use crate::hashing::{dna_hashes, ItemHash};
use crate::translation::protein_hashes;

type LabelId = u32;

/// Label value for k-mers seen under more than one label.
const SHARED: LabelId = LabelId::MAX;

/// Common interface of the k-mer database variants.
pub trait DiscriminatingKmerDb {
    /// Record the k-mers of a sequence under a group label.
    fn add_sequence(&mut self, label: &str, seq: &[u8]) -> Result<()>;

    /// Discard non-discriminating k-mers and make the database read-only.
    fn finalize(&mut self);

    /// Count the discriminating k-mer hits of a query sequence for each label.
    fn count_hits(&self, seq: &[u8]) -> HitCounts;

    /// Release all indexed k-mers.
    fn clear(&mut self);

    /// Number of k-mers currently indexed.
    fn kmer_count(&self) -> usize;
}

/// Hit counts for a query, sorted by count descending and label ascending on ties.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HitCounts {
    counts: Vec<(String, u32)>,
}

impl HitCounts {
    /// Labels with at least one hit, strongest first.
    pub fn sorted(&self) -> &[(String, u32)] {
        &self.counts
    }

    pub fn best(&self) -> Option<(&str, u32)> {
        self.counts.first().map(|(label, count)| (label.as_str(), *count))
    }

    pub fn get(&self, label: &str) -> u32 {
        self.counts
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl FromIterator<(String, u32)> for HitCounts {
    fn from_iter<I: IntoIterator<Item = (String, u32)>>(iter: I) -> Self {
        let counts = iter
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
            .collect();
        HitCounts { counts }
    }
}

/// K-mer to label index shared by both alphabets.
#[derive(Debug, Default)]
struct KmerIndex {
    labels: Vec<String>,
    label_ids: FxHashMap<String, LabelId>,
    kmers: FxHashMap<ItemHash, LabelId>,
    finalized: bool,
}

impl KmerIndex {
    fn label_id(&mut self, label: &str) -> Result<LabelId> {
        if self.finalized {
            return Err(BinError::DataIntegrity(format!(
                "Sequence added for {label} after the k-mer database was finalized."
            )));
        }
        if let Some(id) = self.label_ids.get(label) {
            return Ok(*id);
        }
        let id = self.labels.len() as LabelId;
        self.labels.push(label.to_string());
        self.label_ids.insert(label.to_string(), id);
        Ok(id)
    }

    fn insert(&mut self, hash: ItemHash, id: LabelId) {
        self.kmers
            .entry(hash)
            .and_modify(|owner| {
                if *owner != id {
                    *owner = SHARED;
                }
            })
            .or_insert(id);
    }

    fn finalize(&mut self) {
        let before = self.kmers.len();
        self.kmers.retain(|_, owner| *owner != SHARED);
        self.kmers.shrink_to_fit();
        self.finalized = true;
        debug!(
            "{} discriminating k-mers kept for {} groups, {} shared k-mers discarded.",
            self.kmers.len().to_formatted_string(&Locale::en),
            self.labels.len(),
            (before - self.kmers.len()).to_formatted_string(&Locale::en)
        );
    }

    fn tally(&self, hit: ItemHash, counts: &mut FxHashMap<LabelId, u32>) {
        if let Some(&owner) = self.kmers.get(&hit) {
            if owner != SHARED {
                *counts.entry(owner).or_insert(0) += 1;
            }
        }
    }

    fn hit_counts(&self, counts: FxHashMap<LabelId, u32>) -> HitCounts {
        counts
            .into_iter()
            .map(|(id, count)| (self.labels[id as usize].clone(), count))
            .collect()
    }

    fn clear(&mut self) {
        *self = KmerIndex::default();
    }
}

/// Database of canonical nucleotide k-mers.
#[derive(Debug)]
pub struct DnaKmerDb {
    k: usize,
    index: KmerIndex,
}

impl DnaKmerDb {
    pub fn new(k: usize) -> Self {
        DnaKmerDb { k, index: KmerIndex::default() }
    }
}

impl DiscriminatingKmerDb for DnaKmerDb {
    fn add_sequence(&mut self, label: &str, seq: &[u8]) -> Result<()> {
        let id = self.index.label_id(label)?;
        let index = &mut self.index;
        dna_hashes(seq, self.k, |hash| index.insert(hash, id));
        Ok(())
    }

    fn finalize(&mut self) {
        self.index.finalize();
    }

    fn count_hits(&self, seq: &[u8]) -> HitCounts {
        let mut counts = FxHashMap::default();
        dna_hashes(seq, self.k, |hash| self.index.tally(hash, &mut counts));
        self.index.hit_counts(counts)
    }

    fn clear(&mut self) {
        self.index.clear();
    }

    fn kmer_count(&self) -> usize {
        self.index.kmers.len()
    }
}

/// Database of amino-acid k-mers from six-frame translations.
#[derive(Debug)]
pub struct ProteinKmerDb {
    k: usize,
    index: KmerIndex,
}

impl ProteinKmerDb {
    pub fn new(k: usize) -> Self {
        ProteinKmerDb { k, index: KmerIndex::default() }
    }
}

impl DiscriminatingKmerDb for ProteinKmerDb {
    fn add_sequence(&mut self, label: &str, seq: &[u8]) -> Result<()> {
        let id = self.index.label_id(label)?;
        let index = &mut self.index;
        protein_hashes(seq, self.k, |hash| index.insert(hash, id));
        Ok(())
    }

    fn finalize(&mut self) {
        self.index.finalize();
    }

    fn count_hits(&self, seq: &[u8]) -> HitCounts {
        let mut counts = FxHashMap::default();
        protein_hashes(seq, self.k, |hash| self.index.tally(hash, &mut counts));
        self.index.hit_counts(counts)
    }

    fn clear(&mut self) {
        self.index.clear();
    }

    fn kmer_count(&self) -> usize {
        self.index.kmers.len()
    }
}

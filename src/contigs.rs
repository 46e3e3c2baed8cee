
//! Contig records, FASTA streaming, and the contig filter.
//!
//! Contig files are streamed with `needletail` so that no pass over the input needs to hold
//! the whole assembly in memory. Coverage is recovered from assembler headers, and each
//! contig is classified by the `ContigFilter` into a single-contig `Bin` whose status says
//! whether the contig is rejected, usable for binning, or also usable for the seed search.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use needletail::parse_fastx_file;
use needletail::parser::{write_fasta, LineEnding};

use crate::bin::{Bin, BinStatus};
use crate::bin_group::CountMap;
use crate::bin_parms::BinParms;
use crate::error::{BinError, Result};
use crate::hashing::{NOT_ACGT, NT_TO_CODE};

/// Header keys recognized as carrying a coverage value.
const COVERAGE_KEYS: [&str; 4] = ["multi", "cov", "covg", "coverage"];

#[derive(Clone, Debug, PartialEq)]
pub struct Contig {
    pub label: String,
    pub seq: Vec<u8>,
    /// Coverage parsed from the header, if present.
    pub coverage: Option<f64>,
}

impl Contig {
    /// Build a contig from a FASTA header and sequence.
    pub fn from_header(header: &[u8], seq: Vec<u8>) -> Self {
        let header = String::from_utf8_lossy(header);
        let label = header.split_whitespace().next().unwrap_or_default().to_string();
        let coverage = parse_coverage(&header);

        Contig { label, seq, coverage }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    pub fn max_ambiguity_run(&self) -> usize {
        max_ambiguity_run(&self.seq)
    }
}

/// Extract a coverage estimate from a contig header.
///
/// SPAdes labels carry the coverage as `_cov_<x>`; MEGAHIT and other assemblers put
/// `multi=<x>` or `cov=<x>` style tokens in the comment.
pub fn parse_coverage(header: &str) -> Option<f64> {
    let mut tokens = header.split_whitespace();
    let label = tokens.next()?;

    let from_label = label
        .find("_cov_")
        .and_then(|pos| label[pos + 5..].split('_').next())
        .and_then(|value| value.parse::<f64>().ok());

    from_label
        .or_else(|| {
            tokens
                .filter_map(|token| token.split_once('='))
                .filter(|(key, _)| COVERAGE_KEYS.contains(&key.to_ascii_lowercase().as_str()))
                .find_map(|(_, value)| value.parse::<f64>().ok())
        })
        .filter(|coverage| coverage.is_finite() && *coverage >= 0.0)
}

/// Length of the longest run of characters other than A, C, G or T.
pub fn max_ambiguity_run(seq: &[u8]) -> usize {
    let mut longest = 0;
    let mut run = 0;
    for &base in seq {
        if NT_TO_CODE[base as usize] == NOT_ACGT {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }

    longest
}

/// True if a file holds nothing but whitespace.
fn is_blank(path: &Path) -> Result<bool> {
    let file = File::open(path).map_err(|e| BinError::input(path, format!("cannot read file: {e}")))?;
    for byte in BufReader::new(file).bytes() {
        let byte = byte.map_err(|e| BinError::input(path, e))?;
        if !byte.is_ascii_whitespace() {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Stream every contig in a FASTA file through a callback.
///
/// An empty or whitespace-only file is treated as containing no contigs. Returns the number of contigs read.
pub fn scan_contigs<F>(fasta_file: &Path, mut process: F) -> Result<u64>
where
    F: FnMut(Contig) -> Result<()>,
{
    if is_blank(fasta_file)? {
        return Ok(0);
    }

    let mut reader = parse_fastx_file(fasta_file).map_err(|e| BinError::input(fasta_file, e))?;
    let mut count = 0;
    while let Some(rec) = reader.next() {
        let record = rec.map_err(|e| BinError::input(fasta_file, e))?;
        let contig = Contig::from_header(record.id(), record.seq().into_owned());
        count += 1;
        process(contig)?;
    }

    Ok(count)
}

/// Write a single sequence in FASTA format.
pub fn write_contig<W: Write>(writer: &mut W, label: &str, seq: &[u8]) -> Result<()> {
    write_fasta(label.as_bytes(), seq, writer, LineEnding::Unix)
        .map_err(|e| BinError::Io(std::io::Error::other(e.to_string())))
}

/// Decides the disposition of raw contigs.
pub struct ContigFilter<'a> {
    parms: &'a BinParms,
}

impl<'a> ContigFilter<'a> {
    pub fn new(parms: &'a BinParms) -> Self {
        ContigFilter { parms }
    }

    /// Create a single-contig bin with its status set by the filtering rules.
    pub fn compute_bin(&self, contig: &Contig, stats: &mut CountMap) -> Bin {
        stats.count("contig-in", 1);
        let len = contig.len();
        let coverage = contig.coverage.unwrap_or_else(|| {
            stats.count("contig-no-coverage", 1);
            0.0
        });

        let status = if len < self.parms.bin_len_filter {
            stats.count("contig-bad-length", 1);
            BinStatus::Bad
        } else if coverage < self.parms.bin_covg_filter {
            stats.count("contig-bad-coverage", 1);
            BinStatus::Bad
        } else if contig.max_ambiguity_run() > self.parms.x_limit {
            stats.count("contig-bad-ambiguity", 1);
            BinStatus::Bad
        } else if len >= self.parms.len_filter && coverage >= self.parms.covg_filter {
            stats.count("contig-seed-usable", 1);
            BinStatus::SeedUsable
        } else {
            stats.count("contig-usable", 1);
            BinStatus::Usable
        };

        if status == BinStatus::Bad {
            stats.count("contig-rejected", 1);
        }

        Bin::new(&contig.label, len as u64, coverage, status)
    }
}

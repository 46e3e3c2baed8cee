
//! Six-frame translation of DNA and hashing of amino-acid k-mers.
//!
//! Codons are translated with the standard genetic code. Codons containing a base
//! other than A, C, G or T translate to `X`, and protein k-mers spanning a stop (`*`)
//! or an `X` are never reported.

use std::hash::Hasher;

use rustc_hash::FxHasher;

use crate::hashing::{ItemHash, NOT_ACGT, NT_TO_CODE};

/// Standard genetic code indexed by the 6-bit codon value in ACGT order.
const GENETIC_CODE: &[u8; 64] =
    b"KNKNTTTTRSRSIIMIQHQHPPPPRRRRLLLLEDEDAAAAGGGGVVVV*Y*YSSSS*CWCLFLF";

const UNKNOWN_AA: u8 = b'X';

/// Translate a single codon.
#[inline]
pub fn translate_codon(codon: &[u8]) -> u8 {
    let mut index = 0usize;
    for &base in codon {
        let code = NT_TO_CODE[base as usize];
        if code == NOT_ACGT {
            return UNKNOWN_AA;
        }
        index = (index << 2) | code as usize;
    }
    GENETIC_CODE[index]
}

/// Translate a DNA sequence in the frame beginning at `offset`.
pub fn translate(seq: &[u8], offset: usize) -> Vec<u8> {
    seq.get(offset..)
        .unwrap_or_default()
        .chunks_exact(3)
        .map(translate_codon)
        .collect()
}

pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|base| match base {
            b'A' | b'a' => b'T',
            b'C' | b'c' => b'G',
            b'G' | b'g' => b'C',
            b'T' | b't' => b'A',
            _ => b'N',
        })
        .collect()
}

/// Translations of all six reading frames.
pub fn six_frames(seq: &[u8]) -> Vec<Vec<u8>> {
    let rev = reverse_complement(seq);
    let mut frames = Vec::with_capacity(6);
    for offset in 0..3 {
        frames.push(translate(seq, offset));
    }
    for offset in 0..3 {
        frames.push(translate(&rev, offset));
    }

    frames
}

#[inline]
fn protein_kmer_hash(kmer: &[u8]) -> ItemHash {
    let mut hasher = FxHasher::default();
    hasher.write(kmer);
    hasher.finish()
}

/// Report the hash of every protein k-mer in the six-frame translation of a DNA sequence.
pub fn protein_hashes<F: FnMut(ItemHash)>(seq: &[u8], k: usize, mut emit: F) {
    if k == 0 {
        return;
    }

    for frame in six_frames(seq) {
        frame
            .split(|&aa| aa == b'*' || aa == UNKNOWN_AA)
            .filter(|segment| segment.len() >= k)
            .for_each(|segment| segment.windows(k).for_each(|kmer| emit(protein_kmer_hash(kmer))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_codon() {
        assert_eq!(translate_codon(b"ATG"), b'M');
        assert_eq!(translate_codon(b"TTT"), b'F');
        assert_eq!(translate_codon(b"ttc"), b'F');
        assert_eq!(translate_codon(b"GTT"), b'V');
        assert_eq!(translate_codon(b"TGG"), b'W');
        assert_eq!(translate_codon(b"AAA"), b'K');
        assert_eq!(translate_codon(b"GGG"), b'G');
        assert_eq!(translate_codon(b"TAA"), b'*');
        assert_eq!(translate_codon(b"TAG"), b'*');
        assert_eq!(translate_codon(b"TGA"), b'*');
        assert_eq!(translate_codon(b"ANG"), b'X');
    }

    #[test]
    fn test_frames() {
        assert_eq!(translate(b"ATGGCCTAA", 0), b"MA*");
        assert_eq!(translate(b"ATGGCCTAA", 1), b"WP");
        assert_eq!(translate(b"AT", 3), b"");

        let frames = six_frames(b"ATGAAACCC");
        assert_eq!(frames.len(), 6);
        assert_eq!(frames[0], b"MKP");
        // reverse complement is GGGTTTCAT
        assert_eq!(frames[3], b"GFH");
    }

    #[test]
    fn test_protein_hashes_skip_stops() {
        // frames: MKP*, *NP, ETL, LGFH, *GF, RVS
        let mut count = 0;
        protein_hashes(b"ATGAAACCCTAA", 3, |_| count += 1);
        assert_eq!(count, 5);

        // frames: ***, NN, II, LLL, YY, II
        let mut hashes = Vec::new();
        protein_hashes(b"TAATAATAA", 2, |hash| hashes.push(hash));
        assert_eq!(hashes.len(), 6);
        assert_eq!(hashes.iter().filter(|&&h| h == protein_kmer_hash(b"II")).count(), 2);
    }

    #[test]
    fn test_protein_hashes_strand_independent() {
        let seq = b"ATGGCTAGCAAAGGCGAAGAACTGTTTACCGGCGTGGTGCCGATTCTGGTG";
        let mut fwd = Vec::new();
        protein_hashes(seq, 5, |hash| fwd.push(hash));
        let mut rev = Vec::new();
        protein_hashes(&reverse_complement(seq), 5, |hash| rev.push(hash));

        fwd.sort_unstable();
        rev.sort_unstable();
        assert_eq!(fwd, rev);
    }
}

// Methods in this file were ported from minimap2 by Heng Li or modified from skani by Jim Shaw.

// minimap2 MIT License
//
// Copyright (c) 2018-     Dana-Farber Cancer Institute
//               2017-2018 Broad Institute, Inc.
//
// skani MIT License
//
// Copyright (c) 2022 Jim Shaw
//
// Permission is hereby granted, free of charge, to any person obtaining
// a copy of this software and associated documentation files (the
// "Software"), to deal in the Software without restriction, including
// without limitation the rights to use, copy, modify, merge, publish,
// distribute, sublicense, and/or sell copies of the Software, and to
// permit persons to whom the Software is furnished to do so, subject to
// the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use crate::bin_parms::MAX_DNA_KMER;

pub type ItemHash = u64;

/// Marker for a base that cannot be 2-bit encoded.
pub const NOT_ACGT: u8 = 4;

pub const NT_TO_CODE: [u8; 256] = {
    let mut table = [NOT_ACGT; 256];

    table[b'A' as usize] = 0;
    table[b'C' as usize] = 1;
    table[b'G' as usize] = 2;
    table[b'T' as usize] = 3;
    table[b'a' as usize] = 0;
    table[b'c' as usize] = 1;
    table[b'g' as usize] = 2;
    table[b't' as usize] = 3;

    table
};

/// Thomas Wang's integer hash function.
// Ported from minimap2 and following Rust implementation by Anicet Ebou.
// https://gist.github.com/lh3/974ced188be2f90422cc#file-inthash-c
// https://aebou.rbind.io/post/a-rust-glimpse-at-thomas-wang-integer-hash-function
// Further reading: https://gist.github.com/badboy/6267743
#[inline]
pub fn tw_hash64(kmer: ItemHash) -> ItemHash {
    let mut hash = kmer;

    hash = (!hash).wrapping_add(hash << 21); // key = (key << 21) - key - 1
    hash = hash ^ (hash >> 24);

    hash = hash.wrapping_add(hash << 3).wrapping_add(hash << 8); // key * 265
    hash = hash ^ (hash >> 14);

    hash = hash.wrapping_add(hash << 2).wrapping_add(hash << 4); // key * 21
    hash = hash ^ (hash >> 28);

    hash = hash.wrapping_add(hash << 31);

    hash
}

/// Hash a 2-bit encoded k-mer of up to 64 bases.
#[inline]
fn kmer_hash(kmer: u128) -> ItemHash {
    let lo = kmer as u64;
    let hi = (kmer >> 64) as u64;
    if hi == 0 {
        tw_hash64(lo)
    } else {
        tw_hash64(lo ^ tw_hash64(hi))
    }
}

/// Report the hash of every canonical k-mer in a DNA sequence.
///
/// K-mers overlapping a base other than A, C, G or T are skipped. Lengths
/// outside [1, 64] produce no k-mers.
// Modified from the fmh_seeds method by Jim Shaw in skani.
pub fn dna_hashes<F: FnMut(ItemHash)>(seq: &[u8], k: usize, mut emit: F) {
    if k == 0 || k > MAX_DNA_KMER || seq.len() < k {
        return;
    }

    let mut fwd_kmer: u128 = 0;
    let mut rev_kmer: u128 = 0;
    let mut run_len = 0;

    let rev_shift_dist = 2 * (k - 1);
    let fwd_mask = u128::MAX >> (128 - 2 * k);

    for &base in seq {
        let code = NT_TO_CODE[base as usize];
        if code == NOT_ACGT {
            run_len = 0;
            continue;
        }

        let nuc_f = code as u128;
        fwd_kmer <<= 2;
        fwd_kmer |= nuc_f;
        fwd_kmer &= fwd_mask;

        let nuc_r = 3 - nuc_f;
        rev_kmer >>= 2;
        rev_kmer |= nuc_r << rev_shift_dist;

        run_len += 1;
        if run_len >= k {
            let canonical_kmer_marker = if fwd_kmer < rev_kmer {
                fwd_kmer
            } else {
                rev_kmer
            };
            emit(kmer_hash(canonical_kmer_marker));
        }
    }
}

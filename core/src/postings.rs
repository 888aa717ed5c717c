//! Postings accumulation and gap + vbyte compression.
//!
//! A compressed postings blob is the flat concatenation of
//! `vbyte(gap) vbyte(freq)` pairs, doc ids ascending, with
//! `gap[0] = doc_id[0]` and `gap[i] = doc_id[i] - doc_id[i - 1]`.

use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::corpus::{Corpus, Document};
use crate::lexicon::Lexicon;
use crate::vbyte::{self, DecodeError};
use crate::{DocId, TermId};

/// term id -> doc id -> raw frequency
pub type RawPostings = HashMap<TermId, HashMap<DocId, u32>>;

/// term id -> compressed blob, ascending term id.
pub type CompressedPostings = BTreeMap<TermId, Vec<u8>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error(transparent)]
    Vbyte(#[from] DecodeError),
    #[error("gap without a frequency at end of postings")]
    DanglingGap,
    #[error("doc id {0} repeated within one postings list")]
    DuplicateDoc(u64),
    #[error("zero frequency for doc {0}")]
    ZeroFrequency(DocId),
    #[error("value {0} does not fit in 32 bits")]
    OutOfRange(u64),
}

/// Count term occurrences per document in one sequential pass.
pub fn accumulate(corpus: &Corpus, lexicon: &Lexicon) -> RawPostings {
    count_shard(corpus.documents(), lexicon)
}

/// Same result as [`accumulate`], counting `shard_size`-document chunks on the
/// rayon pool and summing the per-shard tables.
pub fn accumulate_parallel(corpus: &Corpus, lexicon: &Lexicon, shard_size: usize) -> RawPostings {
    let shard_size = shard_size.max(1);
    corpus
        .documents()
        .par_chunks(shard_size)
        .map(|shard| count_shard(shard, lexicon))
        .reduce(RawPostings::new, |mut acc, shard| {
            merge_into(&mut acc, shard);
            acc
        })
}

fn count_shard(docs: &[Document], lexicon: &Lexicon) -> RawPostings {
    let mut postings = RawPostings::new();
    for doc in docs {
        for token in doc.tokens() {
            match lexicon.get(token) {
                Some(tid) => *postings.entry(tid).or_default().entry(doc.id).or_insert(0) += 1,
                None => tracing::warn!(doc_id = doc.id, token, "token missing from lexicon"),
            }
        }
    }
    tracing::debug!(docs = docs.len(), terms = postings.len(), "counted shard");
    postings
}

/// Add every `(term, doc) -> freq` of `other` into `acc`.
pub fn merge_into(acc: &mut RawPostings, other: RawPostings) {
    for (tid, docs) in other {
        let target = acc.entry(tid).or_default();
        for (doc_id, freq) in docs {
            *target.entry(doc_id).or_insert(0) += freq;
        }
    }
}

/// Sort by doc id, gap-encode, and vbyte both members of every pair.
pub fn compress_list(docs: &HashMap<DocId, u32>) -> Vec<u8> {
    let mut sorted: Vec<(DocId, u32)> = docs.iter().map(|(&d, &f)| (d, f)).collect();
    sorted.sort_unstable_by_key(|&(d, _)| d);
    encode_sorted(&sorted)
}

/// `entries` must be ascending by doc id with no repeats; callers outside the
/// crate go through `compress_list` or `PostingsList`, which uphold that.
pub(crate) fn encode_sorted(entries: &[(DocId, u32)]) -> Vec<u8> {
    debug_assert!(entries.windows(2).all(|w| w[0].0 < w[1].0), "postings not strictly ascending");
    let mut out = Vec::with_capacity(entries.len() * 2);
    let mut prev: DocId = 0;
    for &(doc_id, freq) in entries {
        vbyte::encode(u64::from(doc_id - prev), &mut out);
        vbyte::encode(u64::from(freq), &mut out);
        prev = doc_id;
    }
    out
}

pub fn compress(raw: &RawPostings) -> CompressedPostings {
    raw.iter().map(|(&tid, docs)| (tid, compress_list(docs))).collect()
}

/// Decode a whole blob back to absolute doc ids.
pub fn decompress(blob: &[u8]) -> Result<PostingsList, BlobError> {
    let mut values = vbyte::Decoder::new(blob);
    let mut entries = Vec::new();
    let mut prev: u64 = 0;
    while let Some(gap) = values.next() {
        let gap = gap?;
        let freq = values.next().ok_or(BlobError::DanglingGap)??;
        if gap == 0 && !entries.is_empty() {
            return Err(BlobError::DuplicateDoc(prev));
        }
        let doc = prev.checked_add(gap).ok_or(BlobError::OutOfRange(gap))?;
        let doc_id = DocId::try_from(doc).map_err(|_| BlobError::OutOfRange(doc))?;
        let freq = u32::try_from(freq).map_err(|_| BlobError::OutOfRange(freq))?;
        if freq == 0 {
            return Err(BlobError::ZeroFrequency(doc_id));
        }
        entries.push((doc_id, freq));
        prev = doc;
    }
    Ok(PostingsList { entries })
}

/// Decoded postings for one term, ascending doc id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingsList {
    entries: Vec<(DocId, u32)>,
}

impl PostingsList {
    pub fn from_raw(docs: &HashMap<DocId, u32>) -> Self {
        let mut entries: Vec<(DocId, u32)> = docs.iter().map(|(&d, &f)| (d, f)).collect();
        entries.sort_unstable_by_key(|&(d, _)| d);
        Self { entries }
    }

    /// Number of documents the term occurs in.
    pub fn doc_freq(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw frequency in `doc_id`, 0 when absent.
    pub fn tf(&self, doc_id: DocId) -> u32 {
        self.entries
            .binary_search_by_key(&doc_id, |&(d, _)| d)
            .map(|i| self.entries[i].1)
            .unwrap_or(0)
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = DocId> + '_ {
        self.entries.iter().map(|&(d, _)| d)
    }

    pub fn entries(&self) -> &[(DocId, u32)] {
        &self.entries
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_sorted(&self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw(pairs: &[(DocId, u32)]) -> HashMap<DocId, u32> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn counts_per_document() {
        let corpus = Corpus::from_records(["1\tDocument one", "2\tDocument two one one"]).unwrap();
        let lex = Lexicon::build(&corpus);
        let postings = accumulate(&corpus, &lex);
        assert_eq!(postings.len(), 3);
        assert_eq!(postings[&0], raw(&[(1, 1), (2, 1)]));
        assert_eq!(postings[&1], raw(&[(1, 1), (2, 2)]));
        assert_eq!(postings[&2], raw(&[(2, 1)]));
    }

    #[test]
    fn parallel_matches_sequential() {
        let records: Vec<String> = (0..50).map(|i| format!("{}\tw{} w{} shared w{}", i, i % 7, i % 3, i % 7)).collect();
        let corpus = Corpus::from_records(&records).unwrap();
        let lex = Lexicon::build(&corpus);
        let seq = accumulate(&corpus, &lex);
        for shard in [1, 3, 8, 64] {
            assert_eq!(accumulate_parallel(&corpus, &lex, shard), seq);
        }
    }

    #[test]
    fn gaps_are_appended_not_indexed() {
        // doc ids 1 and 2 both produce gap 1; both pairs must survive
        let blob = compress_list(&raw(&[(2, 1), (1, 1)]));
        assert_eq!(blob, vec![1, 1, 1, 1]);
        assert_eq!(decompress(&blob).unwrap().entries(), &[(1, 1), (2, 1)]);
    }

    #[test]
    fn sorts_numerically() {
        let blob = compress_list(&raw(&[(10, 2), (9, 1), (100, 3)]));
        assert_eq!(blob, vec![9, 1, 1, 2, 90, 3]);
    }

    #[test]
    fn multi_byte_gap() {
        let blob = compress_list(&raw(&[(0, 1), (300, 129)]));
        assert_eq!(blob, vec![0, 1, 0x82, 0x2C, 0x81, 0x01]);
        let list = decompress(&blob).unwrap();
        assert_eq!(list.tf(300), 129);
        assert_eq!(list.tf(0), 1);
        assert_eq!(list.tf(5), 0);
    }

    #[test]
    fn rejects_malformed_blobs() {
        assert_eq!(decompress(&[3]), Err(BlobError::DanglingGap));
        assert_eq!(decompress(&[3, 1, 0, 1]), Err(BlobError::DuplicateDoc(3)));
        assert_eq!(decompress(&[3, 0]), Err(BlobError::ZeroFrequency(3)));
        assert_eq!(decompress(&[3, 0x81]), Err(BlobError::Vbyte(DecodeError::Unterminated)));
        assert!(decompress(&[]).unwrap().is_empty());
    }

    #[test]
    fn compress_list_orders_unsorted_input() {
        let docs: HashMap<DocId, u32> = [(300, 2), (1, 1), (17, 4), (2, 1)].into_iter().collect();
        let blob = compress_list(&docs);
        assert_eq!(blob, vec![0x01, 0x01, 0x01, 0x01, 0x0F, 0x04, 0x82, 0x1B, 0x02]);
        let back = decompress(&blob).unwrap();
        assert_eq!(back.entries(), &[(1, 1), (2, 1), (17, 4), (300, 2)]);
    }

    proptest! {
        #[test]
        fn gap_roundtrip(docs in prop::collection::btree_map(any::<u32>(), 1u32..10_000, 0..200)) {
            let entries: Vec<(DocId, u32)> = docs.into_iter().collect();
            let blob = encode_sorted(&entries);
            let back = decompress(&blob).unwrap();
            prop_assert_eq!(back.entries(), entries.as_slice());
        }
    }
}

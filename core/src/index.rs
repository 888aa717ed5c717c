use std::collections::BTreeMap;
use std::time::Instant;

use crate::corpus::{Corpus, DocLengths};
use crate::lexicon::Lexicon;
use crate::postings::{self, BlobError, CompressedPostings, PostingsList};
use crate::TermId;

/// Decompressed index, indexed by dense term id. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvertedIndex {
    postings: Vec<Option<PostingsList>>,
}

impl InvertedIndex {
    /// Decode every blob. Fails on the first malformed term.
    pub fn from_compressed(compressed: &CompressedPostings) -> Result<Self, (TermId, BlobError)> {
        let mut lists = BTreeMap::new();
        for (&tid, blob) in compressed {
            let list = postings::decompress(blob).map_err(|e| (tid, e))?;
            lists.insert(tid, list);
        }
        Ok(Self::from_lists(lists))
    }

    pub(crate) fn from_lists(lists: BTreeMap<TermId, PostingsList>) -> Self {
        let width = lists.keys().next_back().map(|&t| t as usize + 1).unwrap_or(0);
        let mut postings = vec![None; width];
        for (tid, list) in lists {
            postings[tid as usize] = Some(list);
        }
        Self { postings }
    }

    pub fn postings(&self, term_id: TermId) -> Option<&PostingsList> {
        self.postings.get(term_id as usize).and_then(Option::as_ref)
    }

    /// Number of terms with a postings list.
    pub fn num_terms(&self) -> usize {
        self.postings.iter().filter(|p| p.is_some()).count()
    }

    /// `(term_id, postings)` ascending term id.
    pub fn iter(&self) -> impl Iterator<Item = (TermId, &PostingsList)> {
        self.postings.iter().enumerate().filter_map(|(i, p)| p.as_ref().map(|p| (i as TermId, p)))
    }

    /// Re-encode every list; equals the compressor output it was built from.
    pub fn to_compressed(&self) -> CompressedPostings {
        self.iter().map(|(tid, list)| (tid, list.encode())).collect()
    }
}

/// Everything one build run produces.
#[derive(Debug, Clone)]
pub struct BuiltIndex {
    pub lexicon: Lexicon,
    pub doc_lengths: DocLengths,
    pub compressed: CompressedPostings,
    pub index: InvertedIndex,
}

impl BuiltIndex {
    pub fn num_docs(&self) -> usize {
        self.doc_lengths.total_docs()
    }

    pub fn compressed_bytes(&self) -> usize {
        self.compressed.values().map(Vec::len).sum()
    }
}

/// Lexicon -> accumulation -> compression over a parsed corpus.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    shard_size: usize,
    parallel: bool,
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self { shard_size: 1024, parallel: true }
    }
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents per counting shard; only used when parallel.
    pub fn with_shard_size(mut self, shard_size: usize) -> Self {
        self.shard_size = shard_size.max(1);
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn build(&self, corpus: &Corpus) -> BuiltIndex {
        let start = Instant::now();
        let lexicon = Lexicon::build(corpus);
        let raw = if self.parallel && corpus.len() > self.shard_size {
            postings::accumulate_parallel(corpus, &lexicon, self.shard_size)
        } else {
            postings::accumulate(corpus, &lexicon)
        };

        let mut compressed = CompressedPostings::new();
        let mut lists = BTreeMap::new();
        for (tid, docs) in &raw {
            let list = PostingsList::from_raw(docs);
            compressed.insert(*tid, list.encode());
            lists.insert(*tid, list);
        }

        let built = BuiltIndex {
            doc_lengths: corpus.doc_lengths(),
            index: InvertedIndex::from_lists(lists),
            lexicon,
            compressed,
        };
        tracing::info!(
            num_docs = built.num_docs(),
            num_terms = built.lexicon.len(),
            compressed_bytes = built.compressed_bytes(),
            took_ms = start.elapsed().as_millis() as u64,
            "index built"
        );
        built
    }
}

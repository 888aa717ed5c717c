//! Compressed inverted index: lexicon assignment, gap + vbyte postings,
//! a tab-separated / binary on-disk layout, and boolean retrieval ranked by
//! TF-IDF or BM25.

pub mod corpus;
pub mod error;
pub mod index;
pub mod lexicon;
pub mod persist;
pub mod postings;
pub mod query;
pub mod tokenizer;
pub mod vbyte;

pub type TermId = u32;
pub type DocId = u32;

/// Counts wider than `u32` clamp to `u32::MAX`.
pub(crate) fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

pub use corpus::{Corpus, DocLengths, Document};
pub use error::{Error, Result};
pub use index::{BuiltIndex, IndexBuilder, InvertedIndex};
pub use lexicon::Lexicon;
pub use persist::{IndexPaths, LoadedIndex, MetaFile};
pub use postings::PostingsList;
pub use query::{BooleanMode, Bm25Params, QueryEngine, RankingMode, ScoredDoc};

#[cfg(test)]
mod tests {
    use super::saturating_u32;

    #[test]
    fn counts_clamp_instead_of_wrapping() {
        assert_eq!(saturating_u32(7), 7);
        assert_eq!(saturating_u32(u32::MAX as usize), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        {
            assert_eq!(saturating_u32(u32::MAX as usize + 1), u32::MAX);
            assert_eq!(saturating_u32(usize::MAX), u32::MAX);
        }
    }
}

//! Boolean candidate selection followed by TF-IDF or BM25 ranking.

use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::corpus::DocLengths;
use crate::error::{Error, Result};
use crate::index::InvertedIndex;
use crate::lexicon::Lexicon;
use crate::persist::LoadedIndex;
use crate::postings::PostingsList;
use crate::{DocId, TermId};

/// Candidate sets at least this large are scored on the rayon pool.
const PARALLEL_SCORING_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingMode {
    TfIdf,
    Bm25,
}

impl FromStr for RankingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tfidf" | "tf-idf" => Ok(RankingMode::TfIdf),
            "bm25" => Ok(RankingMode::Bm25),
            _ => Err(Error::Config(format!("unknown ranking mode {s:?}, expected tfidf or bm25"))),
        }
    }
}

impl fmt::Display for RankingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RankingMode::TfIdf => "tfidf",
            RankingMode::Bm25 => "bm25",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BooleanMode {
    And,
    Or,
}

impl FromStr for BooleanMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "and" => Ok(BooleanMode::And),
            "or" => Ok(BooleanMode::Or),
            _ => Err(Error::Config(format!("unknown boolean mode {s:?}, expected and or or"))),
        }
    }
}

impl fmt::Display for BooleanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BooleanMode::And => "and",
            BooleanMode::Or => "or",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// Term frequency saturation.
    pub k1: f64,
    /// Length normalization strength, 0 disables it.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

impl Bm25Params {
    pub fn new(k1: f64, b: f64) -> Result<Self> {
        if !k1.is_finite() || k1 < 0.0 {
            return Err(Error::Config(format!("bm25 k1 must be finite and non-negative, got {k1}")));
        }
        if !(0.0..=1.0).contains(&b) {
            return Err(Error::Config(format!("bm25 b must be within [0, 1], got {b}")));
        }
        Ok(Self { k1, b })
    }
}

/// `tf * ln(N / df)`. `doc_freq` is at least 1 for any indexed term.
pub fn tfidf_score(tf: u32, doc_freq: usize, total_docs: usize) -> f64 {
    debug_assert!(doc_freq > 0);
    f64::from(tf) * (total_docs as f64 / doc_freq as f64).ln()
}

/// Okapi BM25 contribution of one term to one document.
pub fn bm25_score(tf: u32, doc_freq: usize, total_docs: usize, doc_len: f64, avgdl: f64, params: &Bm25Params) -> f64 {
    let n = total_docs as f64;
    let df = doc_freq as f64;
    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
    let tf = f64::from(tf);
    let norm = params.k1 * (1.0 - params.b + params.b * (doc_len / avgdl));
    idf * (tf * (params.k1 + 1.0)) / (tf + norm)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f64,
}

/// Read-only view over a built or loaded index. Holds no mutable state, so
/// one engine can serve any number of concurrent queries.
#[derive(Debug, Clone)]
pub struct QueryEngine<'a> {
    lexicon: &'a Lexicon,
    index: &'a InvertedIndex,
    doc_lengths: &'a DocLengths,
    total_docs: usize,
    avgdl: f64,
    bm25: Bm25Params,
}

impl<'a> QueryEngine<'a> {
    pub fn new(lexicon: &'a Lexicon, index: &'a InvertedIndex, doc_lengths: &'a DocLengths) -> Self {
        Self {
            lexicon,
            index,
            doc_lengths,
            total_docs: doc_lengths.total_docs(),
            avgdl: doc_lengths.avgdl(),
            bm25: Bm25Params::default(),
        }
    }

    pub fn from_loaded(loaded: &'a LoadedIndex) -> Self {
        Self::new(&loaded.lexicon, &loaded.index, &loaded.doc_lengths)
    }

    pub fn with_bm25_params(mut self, params: Bm25Params) -> Self {
        self.bm25 = params;
        self
    }

    pub fn total_docs(&self) -> usize {
        self.total_docs
    }

    pub fn avgdl(&self) -> f64 {
        self.avgdl
    }

    /// Map terms to ids, dropping out-of-vocabulary ones. Repeats are kept.
    pub fn resolve_terms<S: AsRef<str>>(&self, terms: &[S]) -> Vec<TermId> {
        terms.iter().filter_map(|t| self.lexicon.get(t.as_ref())).collect()
    }

    /// Candidate documents, ascending doc id.
    pub fn candidates(&self, term_ids: &[TermId], mode: BooleanMode) -> Vec<DocId> {
        match mode {
            BooleanMode::And => self.intersect(term_ids),
            BooleanMode::Or => {
                let mut docs = BTreeSet::new();
                for list in term_ids.iter().filter_map(|&t| self.index.postings(t)) {
                    docs.extend(list.doc_ids());
                }
                docs.into_iter().collect()
            }
        }
    }

    fn intersect(&self, term_ids: &[TermId]) -> Vec<DocId> {
        if term_ids.is_empty() {
            return Vec::new();
        }
        let mut lists: Vec<&PostingsList> = Vec::with_capacity(term_ids.len());
        for &tid in term_ids {
            match self.index.postings(tid) {
                Some(list) => lists.push(list),
                None => {
                    tracing::warn!(term_id = tid, "lexicon term has no postings");
                    return Vec::new();
                }
            }
        }
        lists.sort_by_key(|l| l.doc_freq());
        let Some((smallest, rest)) = lists.split_first() else {
            return Vec::new();
        };
        smallest.doc_ids().filter(|&d| rest.iter().all(|l| l.tf(d) > 0)).collect()
    }

    fn term_score(&self, ranking: RankingMode, list: &PostingsList, doc_id: DocId) -> f64 {
        let tf = list.tf(doc_id);
        if tf == 0 {
            return 0.0;
        }
        match ranking {
            RankingMode::TfIdf => tfidf_score(tf, list.doc_freq(), self.total_docs),
            RankingMode::Bm25 => {
                let doc_len = self.doc_lengths.get(doc_id).map(f64::from).unwrap_or(self.avgdl);
                bm25_score(tf, list.doc_freq(), self.total_docs, doc_len, self.avgdl, &self.bm25)
            }
        }
    }

    fn score_doc(&self, ranking: RankingMode, lists: &[&PostingsList], doc_id: DocId) -> ScoredDoc {
        let score = lists.iter().map(|l| self.term_score(ranking, l, doc_id)).sum();
        ScoredDoc { doc_id, score }
    }

    /// Rank documents for already-normalized `terms`, best first; equal
    /// scores are ordered by ascending doc id.
    pub fn process_query<S: AsRef<str>>(&self, terms: &[S], ranking: RankingMode, boolean: BooleanMode) -> Vec<ScoredDoc> {
        let term_ids = self.resolve_terms(terms);
        if ranking == RankingMode::Bm25 && self.avgdl == 0.0 {
            return Vec::new();
        }
        let candidates = self.candidates(&term_ids, boolean);
        if candidates.is_empty() {
            return Vec::new();
        }
        // every query occurrence contributes, matching a per-term sum
        let lists: Vec<&PostingsList> = term_ids.iter().filter_map(|&t| self.index.postings(t)).collect();

        let mut scored: Vec<ScoredDoc> = if candidates.len() >= PARALLEL_SCORING_THRESHOLD {
            candidates.par_iter().map(|&d| self.score_doc(ranking, &lists, d)).collect()
        } else {
            candidates.iter().map(|&d| self.score_doc(ranking, &lists, d)).collect()
        };
        scored.sort_by(rank_order);
        tracing::debug!(terms = term_ids.len(), candidates = scored.len(), %ranking, %boolean, "query scored");
        scored
    }
}

/// Descending score, then ascending doc id.
pub fn rank_order(a: &ScoredDoc, b: &ScoredDoc) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.doc_id.cmp(&b.doc_id))
}

pub fn top_k(mut results: Vec<ScoredDoc>, k: usize) -> Vec<ScoredDoc> {
    results.truncate(k);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Corpus;
    use crate::index::{BuiltIndex, IndexBuilder};
    use proptest::prelude::*;

    fn build(records: &[&str]) -> BuiltIndex {
        IndexBuilder::new().build(&Corpus::from_records(records.iter().copied()).unwrap())
    }

    fn engine(b: &BuiltIndex) -> QueryEngine<'_> {
        QueryEngine::new(&b.lexicon, &b.index, &b.doc_lengths)
    }

    fn ids(results: &[ScoredDoc]) -> Vec<DocId> {
        results.iter().map(|r| r.doc_id).collect()
    }

    #[test]
    fn parses_modes() {
        assert_eq!("BM25".parse::<RankingMode>().unwrap(), RankingMode::Bm25);
        assert_eq!("tf-idf".parse::<RankingMode>().unwrap(), RankingMode::TfIdf);
        assert_eq!(" And ".parse::<BooleanMode>().unwrap(), BooleanMode::And);
        let err = "cosine".parse::<RankingMode>().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("cosine"));
        assert!("xor".parse::<BooleanMode>().unwrap_err().to_string().contains("xor"));
    }

    #[test]
    fn bm25_params_validation() {
        assert!(Bm25Params::new(1.2, 0.75).is_ok());
        assert!(Bm25Params::new(-1.0, 0.75).unwrap_err().is_config());
        assert!(Bm25Params::new(1.2, 1.5).is_err());
        assert!(Bm25Params::new(f64::NAN, 0.5).is_err());
    }

    #[test]
    fn cat_sat_scenario() {
        let b = build(&["1\tcat sat", "2\tdog sat on mat"]);
        let e = engine(&b);
        let and = e.process_query(&["cat", "sat"], RankingMode::TfIdf, BooleanMode::And);
        assert_eq!(ids(&and), vec![1]);
        let or = e.process_query(&["cat", "sat"], RankingMode::TfIdf, BooleanMode::Or);
        assert_eq!(ids(&or), vec![1, 2]);
        assert!((or[0].score - 2f64.ln()).abs() < 1e-12);
        assert_eq!(or[1].score, 0.0);
        let bm = e.process_query(&["cat", "sat"], RankingMode::Bm25, BooleanMode::Or);
        assert_eq!(ids(&bm), vec![1, 2]);
        assert!(bm[0].score > bm[1].score);
    }

    #[test]
    fn out_of_vocabulary_terms_are_dropped() {
        let b = build(&["1\tcat sat", "2\tdog sat on mat"]);
        let e = engine(&b);
        assert!(e.process_query(&["bird"], RankingMode::TfIdf, BooleanMode::Or).is_empty());
        assert!(e.process_query(&["bird"], RankingMode::Bm25, BooleanMode::And).is_empty());
        let empty: [&str; 0] = [];
        assert!(e.process_query(&empty, RankingMode::TfIdf, BooleanMode::And).is_empty());
        assert!(e.process_query(&empty, RankingMode::TfIdf, BooleanMode::Or).is_empty());
        let with_oov = e.process_query(&["bird", "dog"], RankingMode::TfIdf, BooleanMode::And);
        assert_eq!(ids(&with_oov), vec![2]);
    }

    #[test]
    fn ties_break_by_doc_id() {
        let b = build(&["9\tx y", "3\tx y", "5\tx y", "1\tz"]);
        let e = engine(&b);
        let r = e.process_query(&["x"], RankingMode::TfIdf, BooleanMode::Or);
        assert_eq!(ids(&r), vec![3, 5, 9]);
        let r = e.process_query(&["x"], RankingMode::Bm25, BooleanMode::Or);
        assert_eq!(ids(&r), vec![3, 5, 9]);
    }

    #[test]
    fn tfidf_uses_raw_frequency() {
        let b = build(&["1\ta a a b", "2\ta c", "3\tc"]);
        let e = engine(&b);
        let r = e.process_query(&["a"], RankingMode::TfIdf, BooleanMode::Or);
        let idf = (3.0f64 / 2.0).ln();
        assert_eq!(ids(&r), vec![1, 2]);
        assert!((r[0].score - 3.0 * idf).abs() < 1e-12);
        assert!((r[1].score - idf).abs() < 1e-12);
    }

    #[test]
    fn bm25_matches_formula() {
        let b = build(&["1\ta a b", "2\tb c d e f", "3\tc"]);
        let e = engine(&b);
        let avgdl = 9.0 / 3.0;
        let r = e.process_query(&["b"], RankingMode::Bm25, BooleanMode::Or);
        let idf = ((3.0f64 - 2.0 + 0.5) / (2.0 + 0.5) + 1.0).ln();
        let expect1 = idf * (1.0 * 2.5) / (1.0 + 1.5 * (0.25 + 0.75 * (3.0 / avgdl)));
        let expect2 = idf * (1.0 * 2.5) / (1.0 + 1.5 * (0.25 + 0.75 * (5.0 / avgdl)));
        assert_eq!(ids(&r), vec![1, 2]);
        assert!((r[0].score - expect1).abs() < 1e-12);
        assert!((r[1].score - expect2).abs() < 1e-12);
    }

    #[test]
    fn custom_bm25_params_change_scores() {
        let b = build(&["1\ta b", "2\ta c d e f g"]);
        let flat = engine(&b).with_bm25_params(Bm25Params::new(1.5, 0.0).unwrap());
        let r = flat.process_query(&["a"], RankingMode::Bm25, BooleanMode::Or);
        assert_eq!(r[0].score, r[1].score);
        let r = engine(&b).process_query(&["a"], RankingMode::Bm25, BooleanMode::Or);
        assert_eq!(ids(&r), vec![1, 2]);
        assert!(r[0].score > r[1].score);
    }

    #[test]
    fn bm25_on_empty_collection_is_empty() {
        let b = build(&[]);
        let e = engine(&b);
        assert_eq!(e.avgdl(), 0.0);
        assert!(e.process_query(&["a"], RankingMode::Bm25, BooleanMode::Or).is_empty());
    }

    #[test]
    fn repeated_query_terms_add_up() {
        let b = build(&["1\ta b", "2\tb", "3\tc"]);
        let e = engine(&b);
        let once = e.process_query(&["a"], RankingMode::TfIdf, BooleanMode::Or);
        let twice = e.process_query(&["a", "a"], RankingMode::TfIdf, BooleanMode::Or);
        assert!((twice[0].score - 2.0 * once[0].score).abs() < 1e-12);
    }

    #[test]
    fn top_k_truncates() {
        let b = build(&["1\ta", "2\ta", "3\ta"]);
        let r = engine(&b).process_query(&["a"], RankingMode::TfIdf, BooleanMode::Or);
        assert_eq!(ids(&top_k(r.clone(), 2)), vec![1, 2]);
        assert_eq!(top_k(r, 10).len(), 3);
    }

    #[test]
    fn large_candidate_sets_rank_like_small_ones() {
        let records: Vec<String> = (0..5000).map(|i| format!("{i}\tcommon t{}", i % 5)).collect();
        let corpus = Corpus::from_records(&records).unwrap();
        let b = IndexBuilder::new().build(&corpus);
        let e = engine(&b);
        let r = e.process_query(&["common", "t3"], RankingMode::Bm25, BooleanMode::Or);
        assert_eq!(r.len(), 5000);
        assert!(r.windows(2).all(|w| rank_order(&w[0], &w[1]) != Ordering::Greater));
        assert_eq!(r[0].doc_id, 3);
    }

    proptest! {
        #[test]
        fn and_is_subset_of_or(
            docs in prop::collection::vec(prop::collection::vec(0u8..6, 1..8), 1..20),
            query in prop::collection::vec(0u8..8, 0..4),
        ) {
            let records: Vec<String> = docs
                .iter()
                .enumerate()
                .map(|(i, toks)| format!("{i}\t{}", toks.iter().map(|t| format!("w{t}")).collect::<Vec<_>>().join(" ")))
                .collect();
            let b = IndexBuilder::new().build(&Corpus::from_records(&records).unwrap());
            let e = engine(&b);
            let terms: Vec<String> = query.iter().map(|t| format!("w{t}")).collect();
            let term_ids = e.resolve_terms(&terms);
            let and: BTreeSet<DocId> = e.candidates(&term_ids, BooleanMode::And).into_iter().collect();
            let or: BTreeSet<DocId> = e.candidates(&term_ids, BooleanMode::Or).into_iter().collect();
            prop_assert!(and.is_subset(&or));
        }

        #[test]
        fn tfidf_monotone_in_tf(tf in 0u32..10_000, df in 1usize..100, extra in 1usize..1000) {
            let n = df + extra;
            prop_assert!(tfidf_score(tf + 1, df, n) >= tfidf_score(tf, df, n));
        }

        #[test]
        fn bm25_saturates(tf in 0u32..100_000, df in 1usize..100, extra in 0usize..1000, len in 1u32..500, avg in 1.0f64..500.0) {
            let p = Bm25Params::default();
            let n = df + extra;
            let s0 = bm25_score(tf, df, n, f64::from(len), avg, &p);
            let s1 = bm25_score(tf + 1, df, n, f64::from(len), avg, &p);
            let idf = ((n as f64 - df as f64 + 0.5) / (df as f64 + 0.5) + 1.0).ln();
            prop_assert!(s1 >= s0);
            prop_assert!(s1 <= idf * (p.k1 + 1.0) + 1e-9);
        }
    }
}

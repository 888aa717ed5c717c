use gapidx_core::persist::{load_index, save_index, IndexPaths, MetaFile};
use gapidx_core::tokenizer::is_stopword;
use gapidx_core::{BooleanMode, Corpus, IndexBuilder, QueryEngine, RankingMode};
use rayon::prelude::*;
use tempfile::tempdir;

/// Only drops stop words; no stemming, so terms stay as written.
fn strip_the(text: &str) -> String {
    text.split_whitespace().filter(|w| *w != "the").collect::<Vec<_>>().join(" ")
}

fn scenario() -> Corpus {
    let mut corpus = Corpus::new();
    corpus.push("1", strip_the("the cat sat")).unwrap();
    corpus.push("2", strip_the("the dog sat on the mat")).unwrap();
    corpus
}

#[test]
fn cat_sat_end_to_end() {
    assert!(is_stopword("the"));
    let built = IndexBuilder::new().build(&scenario());
    let lex: Vec<(&str, u32)> = built.lexicon.iter().collect();
    assert_eq!(lex, vec![("cat", 0), ("sat", 1), ("dog", 2), ("on", 3), ("mat", 4)]);

    let engine = QueryEngine::new(&built.lexicon, &built.index, &built.doc_lengths);
    for ranking in [RankingMode::TfIdf, RankingMode::Bm25] {
        let and = engine.process_query(&["cat", "sat"], ranking, BooleanMode::And);
        assert_eq!(and.iter().map(|r| r.doc_id).collect::<Vec<_>>(), vec![1]);
        let or = engine.process_query(&["cat", "sat"], ranking, BooleanMode::Or);
        assert_eq!(or.iter().map(|r| r.doc_id).collect::<Vec<_>>(), vec![1, 2]);
    }
}

#[test]
fn persisted_index_answers_identically() {
    let dir = tempdir().unwrap();
    let paths = IndexPaths::new(dir.path());
    let built = IndexBuilder::new().build(&scenario());
    save_index(&paths, &built, &MetaFile::for_index(&built, "now")).unwrap();
    let loaded = load_index(&paths).unwrap();

    assert_eq!(loaded.index.to_compressed(), built.compressed);
    let before = QueryEngine::new(&built.lexicon, &built.index, &built.doc_lengths);
    let after = QueryEngine::from_loaded(&loaded);
    let q = ["mat", "sat", "dog"];
    assert_eq!(
        before.process_query(&q, RankingMode::Bm25, BooleanMode::Or),
        after.process_query(&q, RankingMode::Bm25, BooleanMode::Or)
    );
}

#[test]
fn concurrent_queries_share_one_index() {
    let records: Vec<String> = (0..500).map(|i| format!("{i}\tw{} w{} all", i % 11, i % 17)).collect();
    let built = IndexBuilder::new().with_shard_size(32).build(&Corpus::from_records(&records).unwrap());
    let engine = QueryEngine::new(&built.lexicon, &built.index, &built.doc_lengths);

    let queries: Vec<Vec<String>> = (0..64).map(|i| vec![format!("w{}", i % 11), format!("w{}", i % 17)]).collect();
    let sequential: Vec<_> = queries
        .iter()
        .map(|q| engine.process_query(q, RankingMode::Bm25, BooleanMode::And))
        .collect();
    let parallel: Vec<_> = queries
        .par_iter()
        .map(|q| engine.process_query(q, RankingMode::Bm25, BooleanMode::And))
        .collect();
    assert_eq!(sequential, parallel);
    assert!(sequential.iter().any(|r| !r.is_empty()));
}

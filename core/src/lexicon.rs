use std::collections::HashMap;

use crate::corpus::Corpus;
use crate::TermId;

/// Dense term <-> id mapping. Ids run from 0 without gaps, in first-occurrence
/// order over the corpus it was built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lexicon {
    ids: HashMap<String, TermId>,
    terms: Vec<String>,
}

impl Lexicon {
    /// Build from the corpus in its parse order, splitting on whitespace only.
    pub fn build(corpus: &Corpus) -> Self {
        let mut builder = LexiconBuilder::new();
        for doc in corpus {
            builder.add_tokens(doc.tokens());
        }
        builder.finish()
    }

    /// `terms[i]` gets id `i`. Callers guarantee the terms are distinct.
    pub(crate) fn from_ordered_terms(terms: Vec<String>) -> Self {
        let ids = terms.iter().enumerate().map(|(i, t)| (t.clone(), i as TermId)).collect();
        Self { ids, terms }
    }

    pub fn get(&self, term: &str) -> Option<TermId> {
        self.ids.get(term).copied()
    }

    pub fn term(&self, id: TermId) -> Option<&str> {
        self.terms.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// `(term, id)` in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, TermId)> {
        self.terms.iter().enumerate().map(|(i, t)| (t.as_str(), i as TermId))
    }
}

/// Append-only id assignment. Single-threaded on purpose: the order terms are
/// first seen is the order ids are handed out.
#[derive(Debug, Default)]
pub struct LexiconBuilder {
    lexicon: Lexicon,
}

impl LexiconBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `term`, assigning the next one if unseen.
    pub fn intern(&mut self, term: &str) -> TermId {
        if let Some(&id) = self.lexicon.ids.get(term) {
            return id;
        }
        let id = self.lexicon.terms.len() as TermId;
        self.lexicon.ids.insert(term.to_string(), id);
        self.lexicon.terms.push(term.to_string());
        id
    }

    pub fn add_tokens<'t>(&mut self, tokens: impl IntoIterator<Item = &'t str>) {
        for token in tokens {
            self.intern(token);
        }
    }

    pub fn finish(self) -> Lexicon {
        tracing::debug!(terms = self.lexicon.len(), "lexicon complete");
        self.lexicon
    }
}

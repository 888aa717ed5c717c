use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::{Error, Result};
use crate::{saturating_u32, DocId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    /// Already-normalized text; tokens are separated by whitespace.
    pub content: String,
}

impl Document {
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.content.split_whitespace()
    }

    /// Token count, clamped to `u32::MAX`.
    pub fn len(&self) -> u32 {
        saturating_u32(self.tokens().count())
    }

    pub fn is_empty(&self) -> bool {
        self.tokens().next().is_none()
    }
}

/// Document collection in parse order. Iteration order drives term id
/// assignment, so it is never reordered.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    docs: Vec<Document>,
    seen: HashSet<DocId>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a document whose external id is a decimal string.
    pub fn push(&mut self, external_id: &str, content: impl Into<String>) -> Result<DocId> {
        let id = parse_doc_id(external_id)?;
        self.push_doc(Document { id, content: content.into() })?;
        Ok(id)
    }

    pub fn push_doc(&mut self, doc: Document) -> Result<()> {
        if !self.seen.insert(doc.id) {
            return Err(Error::DuplicateDocument(doc.id));
        }
        self.docs.push(doc);
        Ok(())
    }

    /// Parse `doc_id<TAB>content` records. Records without a tab are skipped.
    pub fn from_records<I, S>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut corpus = Self::new();
        for record in records {
            corpus.push_record(record.as_ref())?;
        }
        Ok(corpus)
    }

    /// Returns `Ok(false)` when the record has no tab and was skipped.
    pub fn push_record(&mut self, record: &str) -> Result<bool> {
        let record = record.trim_end_matches(|c: char| c == '\r' || c == '\n');
        match record.split_once('\t') {
            Some((id, content)) => {
                self.push(id, content)?;
                Ok(true)
            }
            None => {
                tracing::debug!(len = record.len(), "skipping record without tab");
                Ok(false)
            }
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.docs.iter()
    }

    pub fn documents(&self) -> &[Document] {
        &self.docs
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn doc_lengths(&self) -> DocLengths {
        self.docs.iter().map(|d| (d.id, d.len())).collect()
    }
}

impl<'a> IntoIterator for &'a Corpus {
    type Item = &'a Document;
    type IntoIter = std::slice::Iter<'a, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub fn parse_doc_id(raw: &str) -> Result<DocId> {
    raw.trim().parse::<DocId>().map_err(|_| Error::InvalidDocId(raw.to_string()))
}

/// Token count per document, used for BM25 length normalization. The token
/// total is fixed at construction so `avgdl` is O(1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocLengths {
    lengths: BTreeMap<DocId, u32>,
    total_tokens: u64,
}

impl DocLengths {
    pub fn get(&self, doc_id: DocId) -> Option<u32> {
        self.lengths.get(&doc_id).copied()
    }

    pub fn total_docs(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    /// Mean document length; 0.0 for an empty collection.
    pub fn avgdl(&self) -> f64 {
        if self.lengths.is_empty() {
            return 0.0;
        }
        self.total_tokens as f64 / self.lengths.len() as f64
    }

    /// Ascending doc id order.
    pub fn iter(&self) -> impl Iterator<Item = (DocId, u32)> + '_ {
        self.lengths.iter().map(|(&d, &l)| (d, l))
    }
}

impl FromIterator<(DocId, u32)> for DocLengths {
    fn from_iter<T: IntoIterator<Item = (DocId, u32)>>(iter: T) -> Self {
        let lengths: BTreeMap<DocId, u32> = iter.into_iter().collect();
        let total_tokens = lengths.values().map(|&l| u64::from(l)).sum();
        Self { lengths, total_tokens }
    }
}

//! On-disk layout of a built index.
//!
//! - `lexicon.txt`: `term<TAB>term_id` per line, id order
//! - `doc_lengths.txt`: `doc_id<TAB>length` per line, ascending doc id
//! - `inverted_index.bin`: `vbyte(term_id) vbyte(len) blob[len]` entries until EOF
//! - `meta.json`: counts, creation time and format version

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{create_dir_all, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::corpus::DocLengths;
use crate::error::{Error, Result};
use crate::index::{BuiltIndex, InvertedIndex};
use crate::lexicon::Lexicon;
use crate::postings::CompressedPostings;
use crate::vbyte::{self, StreamValue};
use crate::{saturating_u32, DocId, TermId};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u32,
    pub num_terms: u32,
    pub created_at: String,
    pub version: u32,
}

impl MetaFile {
    pub fn for_index(built: &BuiltIndex, created_at: impl Into<String>) -> Self {
        Self {
            num_docs: saturating_u32(built.num_docs()),
            num_terms: saturating_u32(built.lexicon.len()),
            created_at: created_at.into(),
            version: FORMAT_VERSION,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn lexicon(&self) -> PathBuf { self.root.join("lexicon.txt") }
    pub fn doc_lengths(&self) -> PathBuf { self.root.join("doc_lengths.txt") }
    pub fn inverted_index(&self) -> PathBuf { self.root.join("inverted_index.bin") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
}

/// A fully loaded, read-only index.
#[derive(Debug, Clone)]
pub struct LoadedIndex {
    pub lexicon: Lexicon,
    pub doc_lengths: DocLengths,
    pub index: InvertedIndex,
    pub meta: MetaFile,
}

impl LoadedIndex {
    pub fn num_docs(&self) -> usize {
        self.doc_lengths.total_docs()
    }
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    File::create(path).map(BufWriter::new).map_err(|e| Error::write(path, e))
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path).map(BufReader::new).map_err(|e| Error::io(path, e))
}

fn finish(path: &Path, mut w: BufWriter<File>) -> Result<()> {
    w.flush().map_err(|e| Error::write(path, e))
}

pub fn save_lexicon(paths: &IndexPaths, lexicon: &Lexicon) -> Result<()> {
    let path = paths.lexicon();
    let mut w = create(&path)?;
    for (term, tid) in lexicon.iter() {
        writeln!(w, "{term}\t{tid}").map_err(|e| Error::write(&path, e))?;
    }
    finish(&path, w)
}

pub fn load_lexicon(paths: &IndexPaths) -> Result<Lexicon> {
    let path = paths.lexicon();
    let mut by_id: BTreeMap<TermId, String> = BTreeMap::new();
    let mut seen: HashSet<String> = HashSet::new();
    for_each_record(&path, |line, term, raw_id| {
        let tid: TermId = raw_id.parse().map_err(|_| Error::sidecar(&path, line, format!("term id {raw_id:?} is not an integer")))?;
        if !seen.insert(term.to_string()) {
            return Err(Error::sidecar(&path, line, format!("term {term:?} listed twice")));
        }
        if by_id.insert(tid, term.to_string()).is_some() {
            return Err(Error::sidecar(&path, line, format!("term id {tid} assigned twice")));
        }
        Ok(())
    })?;
    if let Some((&last, _)) = by_id.last_key_value() {
        if last as usize + 1 != by_id.len() {
            return Err(Error::sidecar(&path, by_id.len(), format!("term ids are not contiguous: max id {last} for {} terms", by_id.len())));
        }
    }
    Ok(Lexicon::from_ordered_terms(by_id.into_values().collect()))
}

pub fn save_doc_lengths(paths: &IndexPaths, lengths: &DocLengths) -> Result<()> {
    let path = paths.doc_lengths();
    let mut w = create(&path)?;
    for (doc_id, len) in lengths.iter() {
        writeln!(w, "{doc_id}\t{len}").map_err(|e| Error::write(&path, e))?;
    }
    finish(&path, w)
}

pub fn load_doc_lengths(paths: &IndexPaths) -> Result<DocLengths> {
    let path = paths.doc_lengths();
    let mut lengths: BTreeMap<DocId, u32> = BTreeMap::new();
    for_each_record(&path, |line, raw_doc, raw_len| {
        let doc: DocId = raw_doc.parse().map_err(|_| Error::sidecar(&path, line, format!("doc id {raw_doc:?} is not an integer")))?;
        let len: u32 = raw_len.parse().map_err(|_| Error::sidecar(&path, line, format!("length {raw_len:?} is not an integer")))?;
        if lengths.insert(doc, len).is_some() {
            return Err(Error::sidecar(&path, line, format!("doc id {doc} listed twice")));
        }
        Ok(())
    })?;
    Ok(lengths.into_iter().collect())
}

/// Feed every `key<TAB>value` line to `f` with its 1-based line number.
/// Blank lines are ignored.
fn for_each_record<F>(path: &Path, mut f: F) -> Result<()>
where
    F: FnMut(usize, &str, &str) -> Result<()>,
{
    let reader = open(path)?;
    for (i, line) in reader.lines().enumerate() {
        let line_no = i + 1;
        let line = line.map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData => Error::sidecar(path, line_no, "not valid UTF-8"),
            _ => Error::io(path, e),
        })?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once('\t')
            .ok_or_else(|| Error::sidecar(path, line_no, "missing tab separator"))?;
        f(line_no, key, value)?;
    }
    Ok(())
}

pub fn save_inverted_index(paths: &IndexPaths, compressed: &CompressedPostings) -> Result<()> {
    let path = paths.inverted_index();
    let mut w = create(&path)?;
    write_entries(&mut w, compressed).map_err(|e| Error::write(&path, e))?;
    finish(&path, w)
}

/// Write the entry stream for `compressed` to any sink.
pub fn write_entries<W: Write>(w: &mut W, compressed: &CompressedPostings) -> io::Result<()> {
    let mut header = Vec::with_capacity(2 * vbyte::MAX_ENCODED_LEN);
    for (&tid, blob) in compressed {
        header.clear();
        vbyte::encode(u64::from(tid), &mut header);
        vbyte::encode(blob.len() as u64, &mut header);
        w.write_all(&header)?;
        w.write_all(blob)?;
    }
    Ok(())
}

/// Read the raw blobs without decoding them.
pub fn load_compressed(paths: &IndexPaths) -> Result<CompressedPostings> {
    let path = paths.inverted_index();
    let mut reader = open(&path)?;
    read_entries(&mut reader, &path)
}

/// Parse an entry stream. `path` is only used for error context.
pub fn read_entries<R: Read>(reader: &mut R, path: &Path) -> Result<CompressedPostings> {
    let corrupt = |offset: u64, reason: String| Error::CorruptIndex { path: path.to_path_buf(), offset, reason };
    let stream_err = |offset: u64, what: &str, e: io::Error| match e.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => corrupt(offset, format!("{what}: {e}")),
        _ => Error::io(path, e),
    };

    let mut out = CompressedPostings::new();
    let mut offset: u64 = 0;
    loop {
        let entry_start = offset;
        let tid = match vbyte::read_one(reader).map_err(|e| stream_err(offset, "term id", e))? {
            StreamValue::Eof => break,
            StreamValue::Value(v, n) => {
                offset += n as u64;
                TermId::try_from(v).map_err(|_| corrupt(entry_start, format!("term id {v} out of range")))?
            }
        };
        let len = match vbyte::read_one(reader).map_err(|e| stream_err(offset, "postings length", e))? {
            StreamValue::Eof => return Err(corrupt(offset, format!("entry for term {tid} ends before its length"))),
            StreamValue::Value(v, n) => {
                offset += n as u64;
                v
            }
        };
        let mut blob = Vec::new();
        reader.by_ref().take(len).read_to_end(&mut blob).map_err(|e| Error::io(path, e))?;
        if (blob.len() as u64) < len {
            return Err(corrupt(
                offset,
                format!("postings for term {tid} declare {len} bytes, only {} present", blob.len()),
            ));
        }
        if out.insert(tid, blob).is_some() {
            return Err(corrupt(entry_start, format!("term {tid} appears twice")));
        }
        offset += len;
    }
    tracing::debug!(path = %path.display(), terms = out.len(), bytes = offset, "read postings entries");
    Ok(out)
}

/// Decode the binary index. Every term id must belong to `lexicon`; the
/// check runs before the dense table is sized from the largest id.
pub fn load_inverted_index(paths: &IndexPaths, lexicon: &Lexicon) -> Result<InvertedIndex> {
    let compressed = load_compressed(paths)?;
    if let Some(&tid) = compressed.keys().find(|&&t| t as usize >= lexicon.len()) {
        return Err(Error::CorruptIndex {
            path: paths.inverted_index(),
            offset: entry_offset(&compressed, tid),
            reason: format!("term id {tid} is outside the lexicon of {} terms", lexicon.len()),
        });
    }
    InvertedIndex::from_compressed(&compressed).map_err(|(tid, e)| Error::CorruptIndex {
        path: paths.inverted_index(),
        offset: entry_offset(&compressed, tid),
        reason: format!("postings for term {tid}: {e}"),
    })
}

/// Byte offset where the entry for `tid` starts in the written stream.
fn entry_offset(compressed: &CompressedPostings, tid: TermId) -> u64 {
    compressed
        .range(..tid)
        .map(|(&t, blob)| (vbyte::encoded_len(u64::from(t)) + vbyte::encoded_len(blob.len() as u64) + blob.len()) as u64)
        .sum()
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    let path = paths.meta();
    let json = serde_json::to_string_pretty(meta).map_err(|e| Error::write(&path, e.into()))?;
    std::fs::write(&path, json).map_err(|e| Error::write(&path, e))
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let path = paths.meta();
    let reader = open(&path)?;
    serde_json::from_reader(reader).map_err(|e| Error::CorruptMeta { path, source: e })
}

/// Write all four files of a built index under `paths.root`.
pub fn save_index(paths: &IndexPaths, built: &BuiltIndex, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root).map_err(|e| Error::write(&paths.root, e))?;
    save_lexicon(paths, &built.lexicon)?;
    save_doc_lengths(paths, &built.doc_lengths)?;
    save_inverted_index(paths, &built.compressed)?;
    save_meta(paths, meta)?;
    tracing::info!(root = %paths.root.display(), num_docs = meta.num_docs, num_terms = meta.num_terms, "index saved");
    Ok(())
}

/// Every posted document needs a length row; otherwise `doc_freq` can exceed
/// the document count and idf goes negative or infinite.
fn check_doc_lengths(paths: &IndexPaths, index: &InvertedIndex, doc_lengths: &DocLengths) -> Result<()> {
    for (tid, list) in index.iter() {
        if let Some(doc) = list.doc_ids().find(|&d| doc_lengths.get(d).is_none()) {
            return Err(Error::sidecar(
                paths.doc_lengths(),
                0,
                format!("no length for doc {doc}, which is posted under term {tid}"),
            ));
        }
    }
    Ok(())
}

/// Load everything needed to answer queries.
pub fn load_index(paths: &IndexPaths) -> Result<LoadedIndex> {
    let meta = load_meta(paths)?;
    if meta.version > FORMAT_VERSION {
        return Err(Error::Config(format!(
            "index format version {} is newer than supported version {FORMAT_VERSION}",
            meta.version
        )));
    }
    let lexicon = load_lexicon(paths)?;
    let doc_lengths = load_doc_lengths(paths)?;
    let index = load_inverted_index(paths, &lexicon)?;
    check_doc_lengths(paths, &index, &doc_lengths)?;
    if meta.num_docs as usize != doc_lengths.total_docs() {
        tracing::warn!(meta = meta.num_docs, table = doc_lengths.total_docs(), "document count mismatch, using table");
    }
    tracing::info!(
        root = %paths.root.display(),
        num_docs = doc_lengths.total_docs(),
        num_terms = lexicon.len(),
        "index loaded"
    );
    Ok(LoadedIndex { lexicon, doc_lengths, index, meta })
}

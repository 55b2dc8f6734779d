//! Partitioned inverted index: mutable builder and frozen, queryable form.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::bloom::BloomFilter;
use crate::config::BuildOptions;
use crate::error::{Error, Result};
use crate::source::{CsvReader, Document, JsonlReader, SourceOrigin};
use crate::tokenize::Tokenizer;
use crate::vbyte::{encode_postings, PostingCursor};

/// Sentinel recorded for a document whose row bytes cannot be
/// materialized later (malformed source row, or an origin that no longer
/// resolves).
pub const NO_OFFSET: u64 = u64::MAX;

struct PartitionBuilder {
    vocab: HashMap<Box<str>, u32>,
    postings: Vec<Vec<(u64, u32)>>,
    lens: Vec<u32>,
}

impl PartitionBuilder {
    fn new() -> Self {
        Self {
            vocab: HashMap::new(),
            postings: Vec::new(),
            lens: Vec::new(),
        }
    }

    fn intern(&mut self, term: &str) -> u32 {
        if let Some(&id) = self.vocab.get(term) {
            id
        } else {
            let id = self.vocab.len() as u32;
            self.vocab.insert(term.into(), id);
            self.postings.push(Vec::new());
            id
        }
    }

    fn record(&mut self, doc_id: u64, counts: &HashMap<Box<str>, u32>, len: u32) {
        self.lens.push(len);
        for (term, &tf) in counts {
            let term_id = self.intern(term);
            self.postings[term_id as usize].push((doc_id, tf));
        }
    }
}

/// Mutable, single-pass index builder. See [`crate::engine::Bm25Engine`]
/// for the public state machine this sits behind.
pub struct IndexBuilder {
    options: BuildOptions,
    tokenizer: Tokenizer,
    // fields[field_idx][partition_idx]
    fields: Vec<Vec<PartitionBuilder>>,
    num_docs: u64,
    doc_origins: Vec<(u32, u64)>,
    sources: Vec<SourceOrigin>,
    memory_blob: Vec<u8>,
}

impl IndexBuilder {
    /// Construct an empty builder from validated options.
    pub fn new(options: BuildOptions) -> Result<Self> {
        options.validate()?;
        let tokenizer = Tokenizer::new(&options.stopwords);
        let fields = (0..options.fields.len())
            .map(|_| {
                (0..options.num_partitions)
                    .map(|_| PartitionBuilder::new())
                    .collect()
            })
            .collect();
        Ok(Self {
            options,
            tokenizer,
            fields,
            num_docs: 0,
            doc_origins: Vec::new(),
            sources: Vec::new(),
            memory_blob: Vec::new(),
        })
    }

    /// Number of documents indexed so far.
    pub fn num_docs(&self) -> u64 {
        self.num_docs
    }

    fn partition_of(&self, doc_id: u64) -> usize {
        (doc_id % self.options.num_partitions as u64) as usize
    }

    fn source_index(&mut self, origin: SourceOrigin) -> u32 {
        if let Some(pos) = self.sources.iter().position(|s| *s == origin) {
            return pos as u32;
        }
        self.sources.push(origin);
        (self.sources.len() - 1) as u32
    }

    fn index_row(&mut self, memory_idx: u32, doc: &Document, offset: u64) {
        let doc_id = self.num_docs;
        let partition = self.partition_of(doc_id);
        for (field_idx, field_name) in self.options.fields.iter().enumerate() {
            let text = doc.get(field_name).map(String::as_str).unwrap_or("");
            let tokens = self.tokenizer.tokenize(text);
            let mut counts: HashMap<Box<str>, u32> = HashMap::new();
            for tok in &tokens {
                *counts.entry(tok.clone()).or_insert(0) += 1;
            }
            self.fields[field_idx][partition].record(doc_id, &counts, tokens.len() as u32);
        }
        self.doc_origins.push((memory_idx, offset));
        self.num_docs += 1;
    }

    fn skip_malformed(&mut self, source_idx: u32) {
        let doc_id = self.num_docs;
        let partition = self.partition_of(doc_id);
        let empty = HashMap::new();
        for field in &mut self.fields {
            field[partition].record(doc_id, &empty, 0);
        }
        self.doc_origins.push((source_idx, NO_OFFSET));
        self.num_docs += 1;
        warn!(
            doc_id,
            "skipped malformed row, doc-id counter still advanced"
        );
    }

    /// Stream a CSV or JSON-lines file, indexing `search_cols` and
    /// retaining every column for later row materialization. Dispatch by
    /// file extension (`.csv` vs `.jsonl`/`.json`/`.ndjson`).
    pub fn index_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let is_jsonl = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("jsonl") | Some("ndjson") | Some("json")
        );
        if is_jsonl {
            self.index_jsonl(path)
        } else {
            self.index_csv(path)
        }
    }

    fn index_csv(&mut self, path: &Path) -> Result<usize> {
        let origin = SourceOrigin::Csv(path.to_path_buf());
        let source_idx = self.source_index(origin);
        let mut reader = CsvReader::open(path)?;
        let mut indexed = 0;
        for (offset, row) in reader.rows() {
            match row {
                Ok(doc) => {
                    self.index_row(source_idx, &doc, offset);
                    indexed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "malformed CSV row");
                    self.skip_malformed(source_idx);
                }
            }
        }
        debug!(path = %path.display(), indexed, "indexed CSV file");
        Ok(indexed)
    }

    fn index_jsonl(&mut self, path: &Path) -> Result<usize> {
        let origin = SourceOrigin::Jsonl(path.to_path_buf());
        let source_idx = self.source_index(origin);
        let mut reader = JsonlReader::open(path)?;
        let mut indexed = 0;
        for (offset, row) in reader.rows() {
            match row {
                Ok(doc) => {
                    self.index_row(source_idx, &doc, offset);
                    indexed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "malformed JSON line");
                    self.skip_malformed(source_idx);
                }
            }
        }
        debug!(path = %path.display(), indexed, "indexed JSONL file");
        Ok(indexed)
    }

    /// Index an in-memory ordered sequence of records. Each record is
    /// persisted into a synthetic JSONL blob so it can still be
    /// materialized by `get_topk_docs` after save/load.
    pub fn index_documents(
        &mut self,
        documents: impl IntoIterator<Item = Document>,
    ) -> Result<usize> {
        let source_idx = self.source_index(SourceOrigin::Memory);
        let mut indexed = 0;
        for doc in documents {
            let offset = self.memory_blob.len() as u64;
            let json = serde_json::to_string(&doc).map_err(|e| {
                Error::Format(format!("failed to serialize in-memory document: {e}"))
            })?;
            self.memory_blob.extend_from_slice(json.as_bytes());
            self.memory_blob.push(b'\n');
            self.index_row(source_idx, &doc, offset);
            indexed += 1;
        }
        debug!(indexed, "indexed in-memory documents");
        Ok(indexed)
    }

    /// Compress postings, prune by df, populate Bloom filters, and compute
    /// length statistics. Consumes the builder.
    pub fn freeze(self) -> Result<FrozenIndex> {
        if self.num_docs == 0 {
            return Err(Error::State(
                "cannot freeze an index with zero documents".to_string(),
            ));
        }
        let num_partitions = self.options.num_partitions;
        let mut frozen_fields = Vec::with_capacity(self.fields.len());

        for (field_idx, partitions) in self.fields.into_iter().enumerate() {
            // Corpus-wide df per term string, summed across partitions.
            let mut corpus_df: HashMap<Box<str>, usize> = HashMap::new();
            for partition in &partitions {
                for (term, &term_id) in &partition.vocab {
                    let local_df = partition.postings[term_id as usize].len();
                    if local_df > 0 {
                        *corpus_df.entry(term.clone()).or_insert(0) += local_df;
                    }
                }
            }
            let min_df = self.options.min_df;
            let max_df = self.options.max_df.unwrap_or(usize::MAX);
            let keep = |term: &str| -> bool {
                corpus_df
                    .get(term)
                    .map(|&df| df >= min_df && df <= max_df)
                    .unwrap_or(false)
            };

            let mut total_len: u64 = 0;
            let mut frozen_partitions = Vec::with_capacity(num_partitions);
            for partition in partitions {
                let mut kept_terms: Vec<(&str, u32)> = partition
                    .vocab
                    .iter()
                    .map(|(t, &id)| (t.as_ref(), id))
                    .filter(|(t, _)| keep(t))
                    .collect();
                kept_terms.sort_by(|a, b| a.0.cmp(b.0));

                let mut terms_sorted = Vec::with_capacity(kept_terms.len());
                let mut df = Vec::with_capacity(kept_terms.len());
                let mut global_df = Vec::with_capacity(kept_terms.len());
                let mut doc_bytes_all = Vec::new();
                let mut tf_bytes_all = Vec::new();
                let mut doc_offsets = vec![0u32];
                let mut tf_offsets = vec![0u32];
                let mut bloom_candidates = Vec::new();

                for (term, old_id) in &kept_terms {
                    let postings = &partition.postings[*old_id as usize];
                    let doc_ids: Vec<u64> = postings.iter().map(|(d, _)| *d).collect();
                    let tfs: Vec<u32> = postings.iter().map(|(_, tf)| *tf).collect();
                    let (doc_bytes, tf_bytes) = encode_postings(&doc_ids, &tfs);
                    doc_bytes_all.extend_from_slice(&doc_bytes);
                    tf_bytes_all.extend_from_slice(&tf_bytes);
                    doc_offsets.push(doc_bytes_all.len() as u32);
                    tf_offsets.push(tf_bytes_all.len() as u32);
                    terms_sorted.push(term.to_string().into_boxed_str());
                    df.push(postings.len() as u32);
                    global_df.push(corpus_df.get(*term).copied().unwrap_or(0) as u32);

                    let local_df = postings.len();
                    let within_bloom_threshold = self
                        .options
                        .bloom_df_threshold
                        .map(|t| local_df <= t)
                        .unwrap_or(true);
                    if within_bloom_threshold {
                        bloom_candidates.push(*term);
                    }
                }

                let mut bloom =
                    BloomFilter::with_fpr(bloom_candidates.len().max(1), self.options.bloom_fpr);
                for term in &bloom_candidates {
                    bloom.insert(term);
                }

                total_len += partition.lens.iter().map(|&l| l as u64).sum::<u64>();

                frozen_partitions.push(FrozenPartitionField {
                    terms_sorted,
                    df,
                    global_df,
                    doc_bytes: doc_bytes_all,
                    tf_bytes: tf_bytes_all,
                    doc_offsets,
                    tf_offsets,
                    bloom,
                    lens: partition.lens,
                });
            }

            let avg_len = total_len as f64 / self.num_docs as f64;
            debug!(field = %self.options.fields[field_idx], avg_len, "froze field");
            frozen_fields.push(FrozenField {
                avg_len,
                partitions: frozen_partitions,
            });
        }

        Ok(FrozenIndex {
            options: self.options,
            num_docs: self.num_docs,
            fields: frozen_fields,
            doc_origins: self.doc_origins,
            sources: self.sources,
            memory_blob: self.memory_blob,
        })
    }
}

/// One (field, partition)'s frozen postings, vocabulary, lengths, and
/// Bloom filter.
pub struct FrozenPartitionField {
    pub terms_sorted: Vec<Box<str>>,
    pub df: Vec<u32>,
    /// Corpus-wide document frequency per term (summed across all
    /// partitions at freeze time), used for partition-invariant idf.
    pub global_df: Vec<u32>,
    pub doc_bytes: Vec<u8>,
    pub tf_bytes: Vec<u8>,
    pub doc_offsets: Vec<u32>,
    pub tf_offsets: Vec<u32>,
    pub bloom: BloomFilter,
    pub lens: Vec<u32>,
}

impl FrozenPartitionField {
    /// Binary search the sorted vocabulary for `term`, returning its
    /// partition-local term-id.
    pub fn term_id(&self, term: &str) -> Option<u32> {
        self.terms_sorted
            .binary_search_by(|t| t.as_ref().cmp(term))
            .ok()
            .map(|idx| idx as u32)
    }

    /// Document frequency of a local term-id within this partition.
    pub fn df_of(&self, term_id: u32) -> u32 {
        self.df[term_id as usize]
    }

    /// Corpus-wide document frequency of a local term-id, summed across
    /// every partition. Use this (with the corpus-wide document count) for
    /// idf so scores don't depend on `num_partitions`.
    pub fn global_df_of(&self, term_id: u32) -> u32 {
        self.global_df[term_id as usize]
    }

    /// Open a posting cursor for a local term-id.
    pub fn cursor(&self, term_id: u32) -> Result<PostingCursor<'_>> {
        let i = term_id as usize;
        let doc_slice =
            &self.doc_bytes[self.doc_offsets[i] as usize..self.doc_offsets[i + 1] as usize];
        let tf_slice = &self.tf_bytes[self.tf_offsets[i] as usize..self.tf_offsets[i + 1] as usize];
        PostingCursor::new(doc_slice, tf_slice)
    }

    /// Number of documents in this partition (length of the local length array).
    pub fn num_local_docs(&self) -> usize {
        self.lens.len()
    }
}

/// One field's frozen state: average length plus per-partition data.
pub struct FrozenField {
    pub avg_len: f64,
    pub partitions: Vec<FrozenPartitionField>,
}

/// A read-only, queryable index. Produced by [`IndexBuilder::freeze`] or
/// [`crate::persistence::load`].
pub struct FrozenIndex {
    pub options: BuildOptions,
    pub num_docs: u64,
    pub fields: Vec<FrozenField>,
    pub doc_origins: Vec<(u32, u64)>,
    pub sources: Vec<SourceOrigin>,
    pub memory_blob: Vec<u8>,
}

impl FrozenIndex {
    /// BM25 parameters this index was built with.
    pub fn k1(&self) -> f64 {
        self.options.k1
    }

    /// BM25 parameters this index was built with.
    pub fn b(&self) -> f64 {
        self.options.b
    }

    /// Configured field names in declaration order.
    pub fn field_names(&self) -> &[String] {
        &self.options.fields
    }

    /// Number of partitions.
    pub fn num_partitions(&self) -> usize {
        self.options.num_partitions
    }

    /// Read a document's row back out of its recorded source, returning
    /// every column. Returns `Ok(None)` when the row is unavailable
    /// (malformed at index time, or the backing file has since vanished).
    pub fn materialize(&self, doc_id: u64) -> Result<Option<Document>> {
        let (source_idx, offset) = match self.doc_origins.get(doc_id as usize) {
            Some(pair) => *pair,
            None => return Ok(None),
        };
        if offset == NO_OFFSET {
            return Ok(None);
        }
        match &self.sources[source_idx as usize] {
            SourceOrigin::Csv(path) => read_csv_row_at(path, offset),
            SourceOrigin::Jsonl(path) => read_jsonl_row_at(path, offset),
            SourceOrigin::Memory => read_jsonl_bytes_at(&self.memory_blob, offset),
        }
    }
}

fn read_csv_row_at(path: &PathBuf, offset: u64) -> Result<Option<Document>> {
    let mut reader = match CsvReader::open(path) {
        Ok(r) => r,
        Err(_) => return Ok(None),
    };
    for (row_offset, row) in reader.rows() {
        if row_offset == offset {
            return Ok(row.ok());
        }
    }
    Ok(None)
}

fn read_jsonl_row_at(path: &PathBuf, offset: u64) -> Result<Option<Document>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(_) => return Ok(None),
    };
    read_jsonl_bytes_at(&bytes, offset)
}

fn read_jsonl_bytes_at(bytes: &[u8], offset: u64) -> Result<Option<Document>> {
    let start = offset as usize;
    if start >= bytes.len() {
        return Ok(None);
    }
    let end = bytes[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|i| start + i)
        .unwrap_or(bytes.len());
    let line = std::str::from_utf8(&bytes[start..end])
        .map_err(|e| Error::Format(format!("non-UTF-8 row bytes: {e}")))?;
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| Error::Format(format!("corrupt materialization row: {e}")))?;
    match value {
        serde_json::Value::Object(map) => Ok(Some(
            map.into_iter()
                .map(|(k, v)| (k, json_scalar_to_string(&v)))
                .collect(),
        )),
        _ => Ok(None),
    }
}

fn json_scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

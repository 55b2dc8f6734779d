//! On-disk serialization: a directory of little-endian binary files, one
//! group per (field, partition), plus a `meta.bin` describing the whole
//! index. Every file carries a trailing CRC32 over its own bytes; `load`
//! recomputes and compares before trusting anything it read.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use tracing::debug;

use crate::bloom::BloomFilter;
use crate::config::BuildOptions;
use crate::error::{Error, Result};
use crate::index::{FrozenField, FrozenIndex, FrozenPartitionField};
use crate::source::SourceOrigin;
use crate::tokenize::Stopwords;

/// Format version written to `meta.bin`. Bumped on incompatible layout
/// changes; `load` refuses anything else.
const FORMAT_VERSION: u32 = 1;

/// Write `bytes` to `path`, appending a CRC32 over those same bytes.
fn write_with_crc(path: &Path, bytes: &[u8]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes)?;
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    writer.write_u32::<LittleEndian>(hasher.finalize())?;
    writer.flush()?;
    Ok(())
}

/// Read a file written by [`write_with_crc`], verifying its checksum.
fn read_with_crc(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    if buf.len() < 4 {
        return Err(Error::CorruptIndex {
            message: format!("{} is too short to contain a CRC trailer", path.display()),
            expected: None,
            actual: None,
        });
    }
    let split = buf.len() - 4;
    let stored = u32::from_le_bytes(buf[split..].try_into().unwrap());
    let body = &buf[..split];
    let mut hasher = Hasher::new();
    hasher.update(body);
    let actual = hasher.finalize();
    if stored != actual {
        return Err(Error::CorruptIndex {
            message: format!("CRC mismatch in {}", path.display()),
            expected: Some(stored.to_string()),
            actual: Some(actual.to_string()),
        });
    }
    Ok(body.to_vec())
}

fn group_dir(root: &Path, field: &str, partition: usize) -> PathBuf {
    root.join(format!("field_{field}"))
        .join(format!("part_{partition}"))
}

fn write_u32_vec(out: &mut Vec<u8>, values: &[u32]) {
    for &v in values {
        out.write_u32::<LittleEndian>(v).unwrap();
    }
}

fn read_u32_vec(mut bytes: &[u8]) -> Result<Vec<u32>> {
    let mut out = Vec::with_capacity(bytes.len() / 4);
    while !bytes.is_empty() {
        out.push(bytes.read_u32::<LittleEndian>()?);
    }
    Ok(out)
}

/// Serialize `frozen` into a fresh directory at `db_dir`.
///
/// Refuses to write into a directory that already exists and is
/// non-empty (spec.md §9: "specify refusal" over silent overwrite).
pub fn save(frozen: &FrozenIndex, db_dir: impl AsRef<Path>) -> Result<()> {
    let db_dir = db_dir.as_ref();
    if db_dir.exists() {
        let has_entries = fs::read_dir(db_dir)?.next().is_some();
        if has_entries {
            return Err(Error::State(format!(
                "refusing to save into non-empty directory {}",
                db_dir.display()
            )));
        }
    } else {
        fs::create_dir_all(db_dir)?;
    }

    write_meta(frozen, db_dir)?;

    for (field_idx, field_name) in frozen.field_names().iter().enumerate() {
        let field = &frozen.fields[field_idx];
        for (partition_idx, partition) in field.partitions.iter().enumerate() {
            let dir = group_dir(db_dir, field_name, partition_idx);
            fs::create_dir_all(&dir)?;
            write_partition(&dir, partition)?;
        }
    }

    write_offsets(frozen, db_dir)?;
    write_sources(frozen, db_dir)?;

    debug!(db_dir = %db_dir.display(), "saved index");
    Ok(())
}

fn write_meta(frozen: &FrozenIndex, db_dir: &Path) -> Result<()> {
    let opts = &frozen.options;
    let mut bytes = Vec::new();
    bytes.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    bytes.write_u64::<LittleEndian>(frozen.num_docs)?;
    bytes.write_u32::<LittleEndian>(frozen.num_partitions() as u32)?;
    bytes.write_f64::<LittleEndian>(frozen.k1())?;
    bytes.write_f64::<LittleEndian>(frozen.b())?;

    // Query-affecting build options, so a loaded index reproduces the same
    // results as the engine that built it.
    bytes.write_u64::<LittleEndian>(opts.min_df as u64)?;
    write_optional_u64(&mut bytes, opts.max_df.map(|v| v as u64))?;
    bytes.write_f64::<LittleEndian>(opts.bloom_fpr)?;
    write_optional_u64(&mut bytes, opts.bloom_df_threshold.map(|v| v as u64))?;
    write_stopwords(&mut bytes, &opts.stopwords)?;

    bytes.write_u32::<LittleEndian>(frozen.field_names().len() as u32)?;
    for (name, field) in frozen.field_names().iter().zip(&frozen.fields) {
        bytes.write_u32::<LittleEndian>(name.len() as u32)?;
        bytes.extend_from_slice(name.as_bytes());
        bytes.write_f64::<LittleEndian>(field.avg_len)?;
    }
    write_with_crc(&db_dir.join("meta.bin"), &bytes)
}

fn write_optional_u64(out: &mut Vec<u8>, value: Option<u64>) -> Result<()> {
    match value {
        Some(v) => {
            out.write_u8(1)?;
            out.write_u64::<LittleEndian>(v)?;
        }
        None => out.write_u8(0)?,
    }
    Ok(())
}

fn read_optional_u64(cursor: &mut &[u8]) -> Result<Option<u64>> {
    match cursor.read_u8()? {
        0 => Ok(None),
        _ => Ok(Some(cursor.read_u64::<LittleEndian>()?)),
    }
}

fn write_stopwords(out: &mut Vec<u8>, stopwords: &Stopwords) -> Result<()> {
    match stopwords {
        Stopwords::None => out.write_u8(0)?,
        Stopwords::English => out.write_u8(1)?,
        Stopwords::Custom(set) => {
            out.write_u8(2)?;
            out.write_u32::<LittleEndian>(set.len() as u32)?;
            for word in set {
                out.write_u32::<LittleEndian>(word.len() as u32)?;
                out.extend_from_slice(word.as_bytes());
            }
        }
    }
    Ok(())
}

fn read_stopwords(cursor: &mut &[u8]) -> Result<Stopwords> {
    match cursor.read_u8()? {
        0 => Ok(Stopwords::None),
        1 => Ok(Stopwords::English),
        2 => {
            let n = cursor.read_u32::<LittleEndian>()? as usize;
            let mut set = std::collections::HashSet::with_capacity(n);
            for _ in 0..n {
                let len = cursor.read_u32::<LittleEndian>()? as usize;
                let mut word_bytes = vec![0u8; len];
                cursor.read_exact(&mut word_bytes)?;
                set.insert(
                    String::from_utf8(word_bytes)
                        .map_err(|e| Error::Format(format!("non-UTF-8 stopword: {e}")))?,
                );
            }
            Ok(Stopwords::Custom(set))
        }
        other => Err(Error::CorruptIndex {
            message: format!("unknown stopwords tag {other}"),
            expected: None,
            actual: None,
        }),
    }
}

fn write_partition(dir: &Path, partition: &FrozenPartitionField) -> Result<()> {
    let mut vocab = Vec::new();
    vocab.write_u32::<LittleEndian>(partition.terms_sorted.len() as u32)?;
    for term in &partition.terms_sorted {
        vocab.write_u32::<LittleEndian>(term.len() as u32)?;
        vocab.extend_from_slice(term.as_bytes());
    }
    write_with_crc(&dir.join("vocab.bin"), &vocab)?;

    let mut df = Vec::new();
    write_u32_vec(&mut df, &partition.df);
    write_with_crc(&dir.join("df.bin"), &df)?;

    let mut global_df = Vec::new();
    write_u32_vec(&mut global_df, &partition.global_df);
    write_with_crc(&dir.join("global_df.bin"), &global_df)?;

    write_with_crc(&dir.join("post_doc.bin"), &partition.doc_bytes)?;
    write_with_crc(&dir.join("post_tf.bin"), &partition.tf_bytes)?;

    let mut post_offsets = Vec::new();
    write_u32_vec(&mut post_offsets, &partition.doc_offsets);
    write_u32_vec(&mut post_offsets, &partition.tf_offsets);
    write_with_crc(&dir.join("post_offsets.bin"), &post_offsets)?;

    let mut lens = Vec::new();
    write_u32_vec(&mut lens, &partition.lens);
    write_with_crc(&dir.join("lens.bin"), &lens)?;

    let mut bloom = Vec::new();
    bloom.write_u64::<LittleEndian>(partition.bloom.num_bits())?;
    bloom.write_u32::<LittleEndian>(partition.bloom.num_hashes())?;
    bloom.write_u32::<LittleEndian>(partition.bloom.bits().len() as u32)?;
    for &word in partition.bloom.bits() {
        bloom.write_u64::<LittleEndian>(word)?;
    }
    write_with_crc(&dir.join("bloom.bin"), &bloom)
}

fn write_offsets(frozen: &FrozenIndex, db_dir: &Path) -> Result<()> {
    let mut bytes = Vec::new();
    bytes.write_u64::<LittleEndian>(frozen.doc_origins.len() as u64)?;
    for &(source_idx, offset) in &frozen.doc_origins {
        bytes.write_u32::<LittleEndian>(source_idx)?;
        bytes.write_u64::<LittleEndian>(offset)?;
    }
    write_with_crc(&db_dir.join("offsets.bin"), &bytes)
}

fn write_sources(frozen: &FrozenIndex, db_dir: &Path) -> Result<()> {
    let mut bytes = Vec::new();
    bytes.write_u32::<LittleEndian>(frozen.sources.len() as u32)?;
    for source in &frozen.sources {
        match source {
            SourceOrigin::Csv(path) => {
                bytes.write_u8(0)?;
                let s = path.to_string_lossy();
                bytes.write_u32::<LittleEndian>(s.len() as u32)?;
                bytes.extend_from_slice(s.as_bytes());
            }
            SourceOrigin::Jsonl(path) => {
                bytes.write_u8(1)?;
                let s = path.to_string_lossy();
                bytes.write_u32::<LittleEndian>(s.len() as u32)?;
                bytes.extend_from_slice(s.as_bytes());
            }
            SourceOrigin::Memory => {
                bytes.write_u8(2)?;
            }
        }
    }
    write_with_crc(&db_dir.join("sources.bin"), &bytes)?;
    write_with_crc(&db_dir.join("memory_blob.bin"), &frozen.memory_blob)
}

/// Load a previously [`save`]d index. Fails on a version or CRC mismatch.
pub fn load(db_dir: impl AsRef<Path>) -> Result<FrozenIndex> {
    let db_dir = db_dir.as_ref();
    if !db_dir.exists() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("index directory not found: {}", db_dir.display()),
        )));
    }

    let meta = read_meta(db_dir)?;

    let mut fields = Vec::with_capacity(meta.field_names.len());
    for (field_name, avg_len) in meta.field_names.iter().zip(&meta.avg_lens) {
        let mut partitions = Vec::with_capacity(meta.num_partitions);
        for p in 0..meta.num_partitions {
            let dir = group_dir(db_dir, field_name, p);
            partitions.push(read_partition(&dir)?);
        }
        fields.push(FrozenField {
            avg_len: *avg_len,
            partitions,
        });
    }

    let doc_origins = read_offsets(db_dir)?;
    let (sources, memory_blob) = read_sources(db_dir)?;

    let options = BuildOptions {
        fields: meta.field_names,
        k1: meta.k1,
        b: meta.b,
        num_partitions: meta.num_partitions,
        min_df: meta.min_df,
        max_df: meta.max_df,
        bloom_fpr: meta.bloom_fpr,
        bloom_df_threshold: meta.bloom_df_threshold,
        stopwords: meta.stopwords,
    };

    let num_docs = meta.num_docs;
    debug!(db_dir = %db_dir.display(), num_docs, "loaded index");
    Ok(FrozenIndex {
        options,
        num_docs,
        fields,
        doc_origins,
        sources,
        memory_blob,
    })
}

struct Meta {
    num_docs: u64,
    num_partitions: usize,
    k1: f64,
    b: f64,
    min_df: usize,
    max_df: Option<usize>,
    bloom_fpr: f64,
    bloom_df_threshold: Option<usize>,
    stopwords: Stopwords,
    field_names: Vec<String>,
    avg_lens: Vec<f64>,
}

fn read_meta(db_dir: &Path) -> Result<Meta> {
    let bytes = read_with_crc(&db_dir.join("meta.bin"))?;
    let mut cursor = &bytes[..];
    let version = cursor.read_u32::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(Error::CorruptIndex {
            message: "unsupported index format version".to_string(),
            expected: Some(FORMAT_VERSION.to_string()),
            actual: Some(version.to_string()),
        });
    }
    let num_docs = cursor.read_u64::<LittleEndian>()?;
    let num_partitions = cursor.read_u32::<LittleEndian>()? as usize;
    let k1 = cursor.read_f64::<LittleEndian>()?;
    let b = cursor.read_f64::<LittleEndian>()?;

    let min_df = cursor.read_u64::<LittleEndian>()? as usize;
    let max_df = read_optional_u64(&mut cursor)?.map(|v| v as usize);
    let bloom_fpr = cursor.read_f64::<LittleEndian>()?;
    let bloom_df_threshold = read_optional_u64(&mut cursor)?.map(|v| v as usize);
    let stopwords = read_stopwords(&mut cursor)?;

    let num_fields = cursor.read_u32::<LittleEndian>()? as usize;
    let mut field_names = Vec::with_capacity(num_fields);
    let mut avg_lens = Vec::with_capacity(num_fields);
    for _ in 0..num_fields {
        let len = cursor.read_u32::<LittleEndian>()? as usize;
        let mut name_bytes = vec![0u8; len];
        cursor.read_exact(&mut name_bytes)?;
        let name = String::from_utf8(name_bytes)
            .map_err(|e| Error::Format(format!("non-UTF-8 field name: {e}")))?;
        field_names.push(name);
        avg_lens.push(cursor.read_f64::<LittleEndian>()?);
    }
    Ok(Meta {
        num_docs,
        num_partitions,
        k1,
        b,
        min_df,
        max_df,
        bloom_fpr,
        bloom_df_threshold,
        stopwords,
        field_names,
        avg_lens,
    })
}

fn read_partition(dir: &Path) -> Result<FrozenPartitionField> {
    let vocab_bytes = read_with_crc(&dir.join("vocab.bin"))?;
    let mut cursor = &vocab_bytes[..];
    let num_terms = cursor.read_u32::<LittleEndian>()? as usize;
    let mut terms_sorted = Vec::with_capacity(num_terms);
    for _ in 0..num_terms {
        let len = cursor.read_u32::<LittleEndian>()? as usize;
        let mut term_bytes = vec![0u8; len];
        cursor.read_exact(&mut term_bytes)?;
        let term = String::from_utf8(term_bytes)
            .map_err(|e| Error::Format(format!("non-UTF-8 term: {e}")))?;
        terms_sorted.push(term.into_boxed_str());
    }

    let df = read_u32_vec(&read_with_crc(&dir.join("df.bin"))?)?;
    let global_df = read_u32_vec(&read_with_crc(&dir.join("global_df.bin"))?)?;
    let doc_bytes = read_with_crc(&dir.join("post_doc.bin"))?;
    let tf_bytes = read_with_crc(&dir.join("post_tf.bin"))?;

    let post_offsets_bytes = read_with_crc(&dir.join("post_offsets.bin"))?;
    let expected_len = num_terms + 1;
    if post_offsets_bytes.len() != 8 * expected_len {
        return Err(Error::CorruptIndex {
            message: "post_offsets.bin length does not match vocab size".to_string(),
            expected: Some((8 * expected_len).to_string()),
            actual: Some(post_offsets_bytes.len().to_string()),
        });
    }
    let all_offsets = read_u32_vec(&post_offsets_bytes)?;
    let doc_offsets = all_offsets[..expected_len].to_vec();
    let tf_offsets = all_offsets[expected_len..].to_vec();

    let lens = read_u32_vec(&read_with_crc(&dir.join("lens.bin"))?)?;

    let bloom_bytes = read_with_crc(&dir.join("bloom.bin"))?;
    let mut bcursor = &bloom_bytes[..];
    let num_bits = bcursor.read_u64::<LittleEndian>()?;
    let num_hashes = bcursor.read_u32::<LittleEndian>()?;
    let num_words = bcursor.read_u32::<LittleEndian>()? as usize;
    let mut words = Vec::with_capacity(num_words);
    for _ in 0..num_words {
        words.push(bcursor.read_u64::<LittleEndian>()?);
    }
    let bloom = BloomFilter::from_parts(words, num_bits, num_hashes);

    Ok(FrozenPartitionField {
        terms_sorted,
        df,
        global_df,
        doc_bytes,
        tf_bytes,
        doc_offsets,
        tf_offsets,
        bloom,
        lens,
    })
}

fn read_offsets(db_dir: &Path) -> Result<Vec<(u32, u64)>> {
    let bytes = read_with_crc(&db_dir.join("offsets.bin"))?;
    let mut cursor = &bytes[..];
    let n = cursor.read_u64::<LittleEndian>()? as usize;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let source_idx = cursor.read_u32::<LittleEndian>()?;
        let offset = cursor.read_u64::<LittleEndian>()?;
        out.push((source_idx, offset));
    }
    Ok(out)
}

fn read_sources(db_dir: &Path) -> Result<(Vec<SourceOrigin>, Vec<u8>)> {
    let bytes = read_with_crc(&db_dir.join("sources.bin"))?;
    let mut cursor = &bytes[..];
    let n = cursor.read_u32::<LittleEndian>()? as usize;
    let mut sources = Vec::with_capacity(n);
    for _ in 0..n {
        let tag = cursor.read_u8()?;
        match tag {
            0 | 1 => {
                let len = cursor.read_u32::<LittleEndian>()? as usize;
                let mut path_bytes = vec![0u8; len];
                cursor.read_exact(&mut path_bytes)?;
                let path = PathBuf::from(
                    String::from_utf8(path_bytes)
                        .map_err(|e| Error::Format(format!("non-UTF-8 source path: {e}")))?,
                );
                sources.push(if tag == 0 {
                    SourceOrigin::Csv(path)
                } else {
                    SourceOrigin::Jsonl(path)
                });
            }
            2 => sources.push(SourceOrigin::Memory),
            other => {
                return Err(Error::CorruptIndex {
                    message: format!("unknown source-origin tag {other}"),
                    expected: None,
                    actual: None,
                })
            }
        }
    }
    let memory_blob = read_with_crc(&db_dir.join("memory_blob.bin"))?;
    Ok((sources, memory_blob))
}

//! The content-addressed backup archive: a single file holding every
//! historical backup record steadydns has ever taken, deduplicated at the
//! content-block level and checksummed as a whole.
//!
//! File layout, in write order:
//!   header (172 bytes, fixed)
//!   data region           - concatenated gzip blocks, one per unique
//!                           content hash
//!   metadata region       - one length-prefixed JSON blob per record
//!                           (location recorded in that record's index
//!                           entry, not in the header)
//!   content-block index   - JSON array of [`ContentBlockEntry`]
//!   record index          - JSON array of [`RecordIndexEntry`]
//!
//! Every path that touches this file re-verifies it first (magic,
//! version window, checksum). Corruption is never auto-repaired.

use crate::error::SteadyDnsError;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const MAGIC: &[u8; 16] = b"STEADYDNS_BACKUP";
pub const CURRENT_VERSION: u32 = 1;
pub const MIN_COMPAT_VERSION: u32 = 1;
const HEADER_SIZE: u64 = 172;
const CHECKSUM_OFFSET: u64 = 16 + 4 + 8 + 8 + 8 + 8 + 8 + 8; // 68

#[derive(Debug, Clone)]
struct Header {
    version: u32,
    record_count: u64,
    index_offset: u64,
    index_size: u64,
    content_block_index_offset: u64,
    content_block_index_size: u64,
    data_offset: u64,
    checksum: [u8; 32],
    total_size: u64,
}

impl Header {
    fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(MAGIC)?;
        w.write_u32::<BigEndian>(self.version)?;
        w.write_u64::<BigEndian>(self.record_count)?;
        w.write_u64::<BigEndian>(self.index_offset)?;
        w.write_u64::<BigEndian>(self.index_size)?;
        w.write_u64::<BigEndian>(self.content_block_index_offset)?;
        w.write_u64::<BigEndian>(self.content_block_index_size)?;
        w.write_u64::<BigEndian>(self.data_offset)?;
        w.write_all(&self.checksum)?;
        w.write_all(&[0u8; 64])?; // reserved
        w.write_u64::<BigEndian>(self.total_size)?;
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self, SteadyDnsError> {
        let mut magic = [0u8; 16];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(SteadyDnsError::ArchiveCorrupt(
                "bad magic bytes".to_string(),
            ));
        }
        let version = r.read_u32::<BigEndian>()?;
        if !(MIN_COMPAT_VERSION..=CURRENT_VERSION).contains(&version) {
            return Err(SteadyDnsError::ArchiveCorrupt(format!(
                "unsupported archive version {version}"
            )));
        }
        let record_count = r.read_u64::<BigEndian>()?;
        let index_offset = r.read_u64::<BigEndian>()?;
        let index_size = r.read_u64::<BigEndian>()?;
        let content_block_index_offset = r.read_u64::<BigEndian>()?;
        let content_block_index_size = r.read_u64::<BigEndian>()?;
        let data_offset = r.read_u64::<BigEndian>()?;
        let mut checksum = [0u8; 32];
        r.read_exact(&mut checksum)?;
        let mut reserved = [0u8; 64];
        r.read_exact(&mut reserved)?;
        let total_size = r.read_u64::<BigEndian>()?;
        Ok(Header {
            version,
            record_count,
            index_offset,
            index_size,
            content_block_index_offset,
            content_block_index_size,
            data_offset,
            checksum,
            total_size,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlockEntry {
    pub hash: String,
    pub size: u64,
    pub offset: u64,
    pub length: u64,
    pub ref_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordIndexEntry {
    pub record_id: u64,
    pub metadata_offset: u64,
    pub metadata_size: u64,
    pub operation: String,
    pub domain: String,
    pub timestamp: i64,
    pub expiry: i64,
    pub metadata_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub filename: String,
    pub content_hash: String,
    pub mtime: i64,
}

/// The operation-specific payload embedded in a record's metadata,
/// discriminated by the `operation` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum OperationPayload {
    Create { zone: crate::zones::Zone },
    Update { zone: crate::zones::Zone },
    Delete { domain: String },
    Rollback {
        rollback_record_id: u64,
        rollback_operation: String,
        rollback_domain: String,
        #[serde(default)]
        restore_from_embedded: bool,
    },
}

impl OperationPayload {
    pub fn operation_name(&self) -> &'static str {
        match self {
            OperationPayload::Create { .. } => "create",
            OperationPayload::Update { .. } => "update",
            OperationPayload::Delete { .. } => "delete",
            OperationPayload::Rollback { .. } => "rollback",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub record_id: u64,
    pub domain: String,
    pub created_at: i64,
    pub expiry: i64,
    pub payload: OperationPayload,
    pub files: Vec<FileEntry>,
}

/// An in-memory snapshot of everything in the archive except the bulk
/// content-block bytes: enough to append a new record or answer a lookup.
#[derive(Debug, Clone)]
pub struct Archive {
    version: u32,
    pub content_blocks: HashMap<String, ContentBlockEntry>,
    pub records: Vec<RecordIndexEntry>,
    data_end: u64,
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Recomputes the whole-file SHA-256 with the checksum field's bytes fed
/// as zero, 64KiB at a time.
fn compute_file_checksum(path: &Path) -> Result<[u8; 32], SteadyDnsError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 65536];
    let mut pos: u64 = 0;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let chunk_start = pos;
        let chunk_end = pos + n as u64;
        let zero_start = CHECKSUM_OFFSET.max(chunk_start);
        let zero_end = (CHECKSUM_OFFSET + 32).min(chunk_end);
        if zero_start < zero_end {
            let mut adjusted = buf[..n].to_vec();
            let lo = (zero_start - chunk_start) as usize;
            let hi = (zero_end - chunk_start) as usize;
            for b in &mut adjusted[lo..hi] {
                *b = 0;
            }
            hasher.update(&adjusted);
        } else {
            hasher.update(&buf[..n]);
        }
        pos = chunk_end;
    }
    Ok(hasher.finalize().into())
}

impl Archive {
    /// Opens and loads the archive at `path`. Returns `Ok(None)` if no
    /// archive file exists yet - that's a valid, well-formed state.
    pub fn open(path: &Path) -> Result<Option<Archive>, SteadyDnsError> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        let mut cursor = Cursor::new(&bytes);
        let header = Header::read_from(&mut cursor)?;

        let cb_region = bytes
            .get(
                header.content_block_index_offset as usize
                    ..(header.content_block_index_offset + header.content_block_index_size) as usize,
            )
            .ok_or_else(|| SteadyDnsError::ArchiveCorrupt("content block index out of range".to_string()))?;
        let content_block_list: Vec<ContentBlockEntry> = serde_json::from_slice(cb_region)?;

        let idx_region = bytes
            .get(header.index_offset as usize..(header.index_offset + header.index_size) as usize)
            .ok_or_else(|| SteadyDnsError::ArchiveCorrupt("record index out of range".to_string()))?;
        let records: Vec<RecordIndexEntry> = serde_json::from_slice(idx_region)?;

        if records.len() as u64 != header.record_count {
            return Err(SteadyDnsError::ArchiveCorrupt(format!(
                "header record_count {} != index length {}",
                header.record_count,
                records.len()
            )));
        }

        let mut content_blocks = HashMap::new();
        let mut data_end = header.data_offset;
        for entry in content_block_list {
            data_end = data_end.max(entry.offset + entry.length);
            content_blocks.insert(entry.hash.clone(), entry);
        }

        Ok(Some(Archive {
            version: header.version,
            content_blocks,
            records,
            data_end,
        }))
    }

    /// Recomputes per-record metadata checksums against what's stored,
    /// confirms every referenced content hash exists, and checks
    /// record-count consistency. Never repairs - only reports.
    pub fn verify(path: &Path) -> Result<(), SteadyDnsError> {
        let archive = match Self::open(path)? {
            Some(a) => a,
            None => return Ok(()),
        };
        let expected_checksum = {
            let mut file = std::fs::File::open(path)?;
            let mut header_bytes = [0u8; HEADER_SIZE as usize];
            file.read_exact(&mut header_bytes)?;
            let mut cursor = Cursor::new(&header_bytes[..]);
            Header::read_from(&mut cursor)?.checksum
        };
        let actual_checksum = compute_file_checksum(path)?;
        if expected_checksum != actual_checksum {
            return Err(SteadyDnsError::ArchiveCorrupt(
                "checksum mismatch".to_string(),
            ));
        }

        let bytes = std::fs::read(path)?;
        for record in &archive.records {
            let start = record.metadata_offset as usize;
            let meta_bytes = bytes
                .get(start..)
                .ok_or_else(|| SteadyDnsError::ArchiveCorrupt("metadata offset out of range".to_string()))?;
            let mut cursor = Cursor::new(meta_bytes);
            let len = cursor.read_u64::<BigEndian>()?;
            let body = meta_bytes
                .get(8..8 + len as usize)
                .ok_or_else(|| SteadyDnsError::ArchiveCorrupt("metadata body out of range".to_string()))?;
            let digest = sha256_hex(body);
            if digest != record.metadata_sha256 {
                return Err(SteadyDnsError::ArchiveCorrupt(format!(
                    "metadata checksum mismatch for record {}",
                    record.record_id
                )));
            }
            let metadata: RecordMetadata = serde_json::from_slice(body)?;
            for file in &metadata.files {
                if !archive.content_blocks.contains_key(&file.content_hash) {
                    return Err(SteadyDnsError::ArchiveCorrupt(format!(
                        "record {} references missing content block {}",
                        record.record_id, file.content_hash
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn next_record_id(&self) -> u64 {
        self.records.iter().map(|r| r.record_id).max().unwrap_or(0) + 1
    }

    /// Decodes a content block by hash. On gunzip failure, returns the
    /// raw (still-compressed) bytes best-effort rather than failing the
    /// whole operation.
    pub fn decode_block(&self, path: &Path, hash: &str) -> Result<Vec<u8>, SteadyDnsError> {
        let entry = self
            .content_blocks
            .get(hash)
            .ok_or_else(|| SteadyDnsError::ArchiveCorrupt(format!("missing content block {hash}")))?;
        let mut file = std::fs::File::open(path)?;
        file.seek(SeekFrom::Start(entry.offset))?;
        let mut compressed = vec![0u8; entry.length as usize];
        file.read_exact(&mut compressed)?;

        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut out = Vec::with_capacity(entry.size as usize);
        match decoder.read_to_end(&mut out) {
            Ok(_) => Ok(out),
            Err(err) => {
                log::warn!("gunzip failed for block {hash}, returning raw bytes: {err}");
                Ok(compressed)
            }
        }
    }

    pub fn read_record_metadata(
        &self,
        path: &Path,
        record_id: u64,
    ) -> Result<RecordMetadata, SteadyDnsError> {
        let entry = self
            .records
            .iter()
            .find(|r| r.record_id == record_id)
            .ok_or_else(|| SteadyDnsError::NotFound(format!("no such record {record_id}")))?;
        let bytes = std::fs::read(path)?;
        let start = entry.metadata_offset as usize + 8;
        let end = start + entry.metadata_size as usize;
        let body = bytes
            .get(start..end)
            .ok_or_else(|| SteadyDnsError::ArchiveCorrupt("metadata out of range".to_string()))?;
        Ok(serde_json::from_slice(body)?)
    }
}

/// Appends a new record: writes new content blocks (deduplicating by
/// hash against the existing archive), then metadata, then rewritten
/// indices and header, to a temp file, verifies it, then atomically
/// renames it into place.
#[allow(clippy::too_many_arguments)]
pub fn append_new_record(
    path: &Path,
    operation: &str,
    domain: &str,
    payload: OperationPayload,
    files: &[(String, Vec<u8>)],
    now: i64,
    expiry: i64,
) -> Result<u64, SteadyDnsError> {
    let existing = Archive::open(path)?;
    let (mut content_blocks, mut records, version, old_data_end) = match &existing {
        Some(a) => (a.content_blocks.clone(), a.records.clone(), a.version, a.data_end),
        None => (HashMap::new(), Vec::new(), CURRENT_VERSION, HEADER_SIZE),
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;

    // Reserve the header; it's rewritten with final values at the end.
    tmp.write_all(&[0u8; HEADER_SIZE as usize])?;

    // Copy the existing data region verbatim.
    if let Some(_a) = &existing {
        let mut source = std::fs::File::open(path)?;
        source.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut remaining = old_data_end - HEADER_SIZE;
        let mut buf = [0u8; 65536];
        while remaining > 0 {
            let to_read = remaining.min(buf.len() as u64) as usize;
            source.read_exact(&mut buf[..to_read])?;
            tmp.write_all(&buf[..to_read])?;
            remaining -= to_read as u64;
        }
    }

    let mut write_cursor = old_data_end;
    let mut file_entries = Vec::new();
    for (filename, contents) in files {
        let hash = sha256_hex(contents);
        if !content_blocks.contains_key(&hash) {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(contents).expect("in-memory gzip write");
            let compressed = encoder.finish().expect("in-memory gzip finish");
            let length = compressed.len() as u64;
            tmp.write_all(&compressed)?;
            let offset = write_cursor;
            write_cursor += length;
            content_blocks.insert(
                hash.clone(),
                ContentBlockEntry {
                    hash: hash.clone(),
                    size: contents.len() as u64,
                    offset,
                    length,
                    ref_count: 0,
                },
            );
        }
        content_blocks.get_mut(&hash).unwrap().ref_count += 1;
        file_entries.push(FileEntry {
            filename: filename.clone(),
            content_hash: hash,
            mtime: now,
        });
    }

    // The data region just grew (new content blocks appended above), so any
    // previous record's metadata blob - which lives right after the data
    // region - no longer sits at the offset recorded for it. Re-emit every
    // existing record's metadata verbatim at its new position before adding
    // the new record's own metadata.
    if let Some(_a) = &existing {
        let mut source = std::fs::File::open(path)?;
        for entry in records.iter_mut() {
            source.seek(SeekFrom::Start(entry.metadata_offset))?;
            let mut len_buf = [0u8; 8];
            source.read_exact(&mut len_buf)?;
            let len = u64::from_be_bytes(len_buf);
            let mut body = vec![0u8; len as usize];
            source.read_exact(&mut body)?;

            let new_offset = write_cursor;
            tmp.write_u64::<BigEndian>(len)?;
            tmp.write_all(&body)?;
            write_cursor += 8 + len;

            entry.metadata_offset = new_offset;
        }
    }

    let record_id = records.iter().map(|r| r.record_id).max().unwrap_or(0) + 1;
    let metadata = RecordMetadata {
        record_id,
        domain: domain.to_string(),
        created_at: now,
        expiry,
        payload,
        files: file_entries,
    };
    let metadata_json = serde_json::to_vec(&metadata)?;
    let metadata_sha256 = sha256_hex(&metadata_json);

    let metadata_offset = write_cursor;
    tmp.write_u64::<BigEndian>(metadata_json.len() as u64)?;
    tmp.write_all(&metadata_json)?;
    write_cursor += 8 + metadata_json.len() as u64;

    records.push(RecordIndexEntry {
        record_id,
        metadata_offset,
        metadata_size: metadata_json.len() as u64,
        operation: operation.to_string(),
        domain: domain.to_string(),
        timestamp: now,
        expiry,
        metadata_sha256,
    });

    let content_block_index_offset = write_cursor;
    let content_block_list: Vec<&ContentBlockEntry> = content_blocks.values().collect();
    let cb_json = serde_json::to_vec(&content_block_list)?;
    tmp.write_all(&cb_json)?;
    write_cursor += cb_json.len() as u64;

    let index_offset = write_cursor;
    let idx_json = serde_json::to_vec(&records)?;
    tmp.write_all(&idx_json)?;
    write_cursor += idx_json.len() as u64;

    let total_size = write_cursor;

    let header = Header {
        version,
        record_count: records.len() as u64,
        index_offset,
        index_size: idx_json.len() as u64,
        content_block_index_offset,
        content_block_index_size: cb_json.len() as u64,
        data_offset: HEADER_SIZE,
        checksum: [0u8; 32],
        total_size,
    };
    tmp.seek(SeekFrom::Start(0))?;
    header.write_to(&mut tmp)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;

    let checksum = compute_file_checksum(tmp.path())?;
    let mut header_with_checksum = header;
    header_with_checksum.checksum = checksum;
    tmp.seek(SeekFrom::Start(0))?;
    header_with_checksum.write_to(&mut tmp)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;

    Archive::verify(tmp.path())?;

    tmp.persist(path)
        .map_err(|e| SteadyDnsError::FileError(e.to_string()))?;

    Ok(record_id)
}

/// Rebuilds the archive to contain only the given record ids, dropping
/// every content block that no longer has any live reference. Offsets
/// and ref-counts are recomputed from scratch - this is the authoritative
/// path when ref-count bookkeeping and reality might have drifted.
pub fn rebuild(path: &Path, keep_record_ids: &[u64]) -> Result<(), SteadyDnsError> {
    let archive = match Archive::open(path)? {
        Some(a) => a,
        None => return Ok(()),
    };

    let bytes = std::fs::read(path)?;
    let mut kept_records: Vec<(RecordIndexEntry, RecordMetadata, Vec<u8>)> = Vec::new();
    for entry in &archive.records {
        if !keep_record_ids.contains(&entry.record_id) {
            continue;
        }
        let start = entry.metadata_offset as usize;
        let mut cursor = Cursor::new(&bytes[start..]);
        let len = cursor.read_u64::<BigEndian>()?;
        let body = bytes[start + 8..start + 8 + len as usize].to_vec();
        let metadata: RecordMetadata = serde_json::from_slice(&body)?;
        kept_records.push((entry.clone(), metadata, body));
    }

    if kept_records.is_empty() {
        std::fs::remove_file(path).ok();
        return Ok(());
    }

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(&[0u8; HEADER_SIZE as usize])?;

    let mut new_blocks: HashMap<String, ContentBlockEntry> = HashMap::new();
    let mut write_cursor = HEADER_SIZE;
    let mut new_index = Vec::new();

    for (old_entry, metadata, meta_body) in &kept_records {
        for file in &metadata.files {
            if !new_blocks.contains_key(&file.content_hash) {
                let old_block = archive
                    .content_blocks
                    .get(&file.content_hash)
                    .ok_or_else(|| {
                        SteadyDnsError::ArchiveCorrupt(format!(
                            "rebuild: missing block {}",
                            file.content_hash
                        ))
                    })?;
                let mut source = std::fs::File::open(path)?;
                source.seek(SeekFrom::Start(old_block.offset))?;
                let mut compressed = vec![0u8; old_block.length as usize];
                source.read_exact(&mut compressed)?;
                tmp.write_all(&compressed)?;
                new_blocks.insert(
                    file.content_hash.clone(),
                    ContentBlockEntry {
                        hash: file.content_hash.clone(),
                        size: old_block.size,
                        offset: write_cursor,
                        length: old_block.length,
                        ref_count: 0,
                    },
                );
                write_cursor += old_block.length;
            }
            new_blocks.get_mut(&file.content_hash).unwrap().ref_count += 1;
        }

        let metadata_offset = write_cursor;
        tmp.write_u64::<BigEndian>(meta_body.len() as u64)?;
        tmp.write_all(meta_body)?;
        write_cursor += 8 + meta_body.len() as u64;

        new_index.push(RecordIndexEntry {
            metadata_offset,
            metadata_size: meta_body.len() as u64,
            ..old_entry.clone()
        });
    }

    let content_block_index_offset = write_cursor;
    let cb_list: Vec<&ContentBlockEntry> = new_blocks.values().collect();
    let cb_json = serde_json::to_vec(&cb_list)?;
    tmp.write_all(&cb_json)?;
    write_cursor += cb_json.len() as u64;

    let index_offset = write_cursor;
    let idx_json = serde_json::to_vec(&new_index)?;
    tmp.write_all(&idx_json)?;
    write_cursor += idx_json.len() as u64;

    let header = Header {
        version: CURRENT_VERSION,
        record_count: new_index.len() as u64,
        index_offset,
        index_size: idx_json.len() as u64,
        content_block_index_offset,
        content_block_index_size: cb_json.len() as u64,
        data_offset: HEADER_SIZE,
        checksum: [0u8; 32],
        total_size: write_cursor,
    };
    tmp.seek(SeekFrom::Start(0))?;
    header.write_to(&mut tmp)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;

    let checksum = compute_file_checksum(tmp.path())?;
    let mut header_with_checksum = header;
    header_with_checksum.checksum = checksum;
    tmp.seek(SeekFrom::Start(0))?;
    header_with_checksum.write_to(&mut tmp)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;

    Archive::verify(tmp.path())?;
    tmp.persist(path)
        .map_err(|e| SteadyDnsError::FileError(e.to_string()))?;
    Ok(())
}

pub fn archive_exists(path: &Path) -> bool {
    path.exists()
}

pub fn copy_whole_file(source: &Path, dest: &Path) -> Result<(), SteadyDnsError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(source, dest)?;
    Ok(())
}

pub type ArchivePathBuf = PathBuf;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zones::{Record, RecordType, Soa, Zone};
    use std::path::PathBuf as StdPathBuf;

    fn test_zone() -> crate::zones::Zone {
        Zone {
            domain: "example.com".to_string(),
            file_path: StdPathBuf::from("/tmp/example.com.zone"),
            allow_query: "any".to_string(),
            comment: None,
            soa: Soa::malformed_default("2026073101".to_string()),
            records: vec![Record {
                id: uuid::Uuid::new_v4(),
                name: "@".to_string(),
                rrtype: RecordType::A,
                value: "192.0.2.1".to_string(),
                ttl: 0,
                priority: None,
                comment: None,
            }],
        }
    }

    #[test]
    fn test_append_then_verify() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.record");

        let record_id = append_new_record(
            &path,
            "create",
            "example.com",
            OperationPayload::Create { zone: test_zone() },
            &[("example.com.zone".to_string(), b"zone content".to_vec())],
            1000,
            1000 + 30 * 86400,
        )
        .unwrap();
        assert_eq!(record_id, 1);
        Archive::verify(&path).expect("archive should verify cleanly");

        let archive = Archive::open(&path).unwrap().unwrap();
        assert_eq!(archive.records.len(), 1);
        assert_eq!(archive.content_blocks.len(), 1);
        let block = archive.content_blocks.values().next().unwrap();
        assert_eq!(block.ref_count, 1);
    }

    #[test]
    fn test_dedup_across_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.record");
        let same_content = b"identical rendered zone".to_vec();

        append_new_record(
            &path,
            "create",
            "a.example.com",
            OperationPayload::Create { zone: test_zone() },
            &[("a.example.com.zone".to_string(), same_content.clone())],
            1000,
            2000,
        )
        .unwrap();
        append_new_record(
            &path,
            "create",
            "b.example.com",
            OperationPayload::Create { zone: test_zone() },
            &[("b.example.com.zone".to_string(), same_content.clone())],
            1000,
            2000,
        )
        .unwrap();

        let archive = Archive::open(&path).unwrap().unwrap();
        assert_eq!(archive.content_blocks.len(), 1);
        let block = archive.content_blocks.values().next().unwrap();
        assert_eq!(block.ref_count, 2);
        assert_eq!(archive.records.len(), 2);
    }

    #[test]
    fn test_decode_block_round_trips_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.record");
        let content = b"round trip me please".to_vec();
        append_new_record(
            &path,
            "create",
            "example.com",
            OperationPayload::Create { zone: test_zone() },
            &[("example.com.zone".to_string(), content.clone())],
            1000,
            2000,
        )
        .unwrap();
        let archive = Archive::open(&path).unwrap().unwrap();
        let hash = archive.content_blocks.keys().next().unwrap().clone();
        let decoded = archive.decode_block(&path, &hash).unwrap();
        assert_eq!(decoded, content);
    }

    #[test]
    fn test_rebuild_drops_unreferenced_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.record");
        let id1 = append_new_record(
            &path,
            "create",
            "a.example.com",
            OperationPayload::Create { zone: test_zone() },
            &[("a.example.com.zone".to_string(), b"content a".to_vec())],
            1000,
            2000,
        )
        .unwrap();
        let id2 = append_new_record(
            &path,
            "create",
            "b.example.com",
            OperationPayload::Create { zone: test_zone() },
            &[("b.example.com.zone".to_string(), b"content b".to_vec())],
            1000,
            2000,
        )
        .unwrap();

        rebuild(&path, &[id2]).unwrap();
        let archive = Archive::open(&path).unwrap().unwrap();
        assert_eq!(archive.records.len(), 1);
        assert_eq!(archive.records[0].record_id, id2);
        assert_eq!(archive.content_blocks.len(), 1);
        Archive::verify(&path).unwrap();
        let _ = id1;
    }

    #[test]
    fn test_corrupt_magic_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.record");
        append_new_record(
            &path,
            "create",
            "example.com",
            OperationPayload::Create { zone: test_zone() },
            &[("example.com.zone".to_string(), b"content".to_vec())],
            1000,
            2000,
        )
        .unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = b'X';
        std::fs::write(&path, bytes).unwrap();

        let err = Archive::open(&path).unwrap_err();
        assert!(matches!(err, SteadyDnsError::ArchiveCorrupt(_)));
    }
}

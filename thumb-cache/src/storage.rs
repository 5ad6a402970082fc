//! Crash-safe append-only log backing [`crate::PersistentCache`].
//!
//! `original_source/src/core/persistent_string_cache.cpp` backs the store with
//! leveldb; no crate in this workspace's ecosystem pulls in leveldb bindings, so
//! the primary storage here is a from-scratch length-prefixed append log plus an
//! in-memory index rebuilt by replay on open — the crash-safety and scrub/compact
//! behavior spec.md §4.D describes, expressed with tools already in the stack
//! (`std::fs`) rather than an unused external store.
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

pub const DIRTY_FLAG_FILE: &str = "dirty_flag";
pub const LOG_FILE: &str = "data.log";
pub const SETTINGS_FILE: &str = "settings";

#[derive(Debug, Clone)]
pub enum LogRecord {
    Put { key: Vec<u8>, value: Vec<u8>, metadata: Vec<u8>, atime: i64, etime: i64 },
    Tombstone { key: Vec<u8> },
}

fn checksum(bytes: &[u8]) -> u32 {
    // FNV-1a. Only used to detect truncation/bit-rot, not for security.
    let mut hash: u32 = 0x811c9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

fn write_len_prefixed(w: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    w.write_all(&(bytes.len() as u32).to_le_bytes())?;
    w.write_all(bytes)
}

pub fn serialize_record(rec: &LogRecord) -> Vec<u8> {
    let mut body = Vec::new();
    match rec {
        LogRecord::Put { key, value, metadata, atime, etime } => {
            body.push(0u8);
            write_len_prefixed(&mut body, key).unwrap();
            write_len_prefixed(&mut body, value).unwrap();
            write_len_prefixed(&mut body, metadata).unwrap();
            body.extend_from_slice(&atime.to_le_bytes());
            body.extend_from_slice(&etime.to_le_bytes());
        }
        LogRecord::Tombstone { key } => {
            body.push(1u8);
            write_len_prefixed(&mut body, key).unwrap();
        }
    }
    let mut framed = Vec::with_capacity(body.len() + 8);
    framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
    framed.extend_from_slice(&checksum(&body).to_le_bytes());
    framed.extend_from_slice(&body);
    framed
}

#[derive(Debug)]
pub enum ReplayError {
    /// The log is internally inconsistent (checksum mismatch) — genuine corruption.
    Corrupt(String),
}

/// Replay a log file, returning the records in order. A truncated trailing
/// record (the tail of a write that never completed) is treated as benign —
/// everything up to it is kept. A checksum mismatch on an otherwise complete
/// record is genuine corruption and aborts the whole replay.
pub fn replay(path: &Path) -> Result<Vec<LogRecord>, ReplayError> {
    let Ok(file) = File::open(path) else {
        return Ok(Vec::new());
    };
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(ReplayError::Corrupt(e.to_string())),
        }
        let body_len = u32::from_le_bytes(len_buf) as usize;

        let mut sum_buf = [0u8; 4];
        if reader.read_exact(&mut sum_buf).is_err() {
            break; // truncated mid-header: benign, drop the incomplete tail
        }
        let expected_sum = u32::from_le_bytes(sum_buf);

        let mut body = vec![0u8; body_len];
        if reader.read_exact(&mut body).is_err() {
            break; // truncated mid-body: benign, drop the incomplete tail
        }

        if checksum(&body) != expected_sum {
            return Err(ReplayError::Corrupt(format!(
                "checksum mismatch in {}",
                path.display()
            )));
        }

        records.push(decode_body(&body).map_err(ReplayError::Corrupt)?);
    }
    Ok(records)
}

fn read_len_prefixed(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>, String> {
    if buf.len() < *pos + 4 {
        return Err("truncated length prefix".into());
    }
    let len = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap()) as usize;
    *pos += 4;
    if buf.len() < *pos + len {
        return Err("truncated payload".into());
    }
    let out = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(out)
}

fn decode_body(body: &[u8]) -> Result<LogRecord, String> {
    if body.is_empty() {
        return Err("empty record body".into());
    }
    let tag = body[0];
    let mut pos = 1;
    match tag {
        0 => {
            let key = read_len_prefixed(body, &mut pos)?;
            let value = read_len_prefixed(body, &mut pos)?;
            let metadata = read_len_prefixed(body, &mut pos)?;
            if body.len() < pos + 16 {
                return Err("truncated timestamps".into());
            }
            let atime = i64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
            let etime = i64::from_le_bytes(body[pos + 8..pos + 16].try_into().unwrap());
            Ok(LogRecord::Put { key, value, metadata, atime, etime })
        }
        1 => {
            let key = read_len_prefixed(body, &mut pos)?;
            Ok(LogRecord::Tombstone { key })
        }
        other => Err(format!("unknown record tag {other}")),
    }
}

pub struct Log {
    path: PathBuf,
    file: File,
}

impl Log {
    pub fn open(dir: &Path) -> io::Result<Self> {
        let path = dir.join(LOG_FILE);
        let file = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn append_batch(&mut self, records: &[LogRecord]) -> io::Result<()> {
        for rec in records {
            self.file.write_all(&serialize_record(rec))?;
        }
        self.file.flush()?;
        self.file.sync_all()
    }

    /// Rewrite the log from scratch containing only `records`, reclaiming the
    /// space held by superseded entries and tombstones. Returns bytes reclaimed.
    pub fn compact(&mut self, dir: &Path, records: &[LogRecord]) -> io::Result<u64> {
        let before = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let tmp_path = dir.join(format!("{LOG_FILE}.compact"));
        {
            let mut tmp = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
            for rec in records {
                tmp.write_all(&serialize_record(rec))?;
            }
            tmp.flush()?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().create(true).append(true).read(true).open(&self.path)?;
        let after = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        Ok(before.saturating_sub(after))
    }
}

pub fn set_dirty(dir: &Path) -> io::Result<()> {
    let mut f = OpenOptions::new().create(true).write(true).truncate(true).open(dir.join(DIRTY_FLAG_FILE))?;
    f.write_all(&[1u8])?;
    f.sync_all()
}

pub fn clear_dirty(dir: &Path) -> io::Result<()> {
    let mut f = OpenOptions::new().create(true).write(true).truncate(true).open(dir.join(DIRTY_FLAG_FILE))?;
    f.write_all(&[0u8])?;
    f.sync_all()
}

pub fn is_dirty(dir: &Path) -> bool {
    std::fs::read(dir.join(DIRTY_FLAG_FILE)).map(|b| b.first() == Some(&1)).unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedSettings {
    pub max_size: u64,
    pub policy_is_lru_ttl: bool,
}

pub fn read_settings(dir: &Path) -> Option<PersistedSettings> {
    let contents = std::fs::read_to_string(dir.join(SETTINGS_FILE)).ok()?;
    let mut parts = contents.split_whitespace();
    let max_size = parts.next()?.parse().ok()?;
    let policy_is_lru_ttl = parts.next()? == "1";
    Some(PersistedSettings { max_size, policy_is_lru_ttl })
}

pub fn write_settings(dir: &Path, settings: PersistedSettings) -> io::Result<()> {
    std::fs::write(
        dir.join(SETTINGS_FILE),
        format!("{} {}", settings.max_size, if settings.policy_is_lru_ttl { 1 } else { 0 }),
    )
}

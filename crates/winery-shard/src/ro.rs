//! The RO-shard file format and reader (spec.md §4.4): a self-contained,
//! write-once container with a header, a minimal-perfect-hash index, and a
//! payload region, read back with constant-time keyed lookup via
//! `memmap2` — the same mmap-the-whole-file idiom used for on-disk stores
//! across the broader retrieval pack (`starkware-libs/papyrus`,
//! `rerun-io/rerun`, `jzombie/rust-simd-r-drive`).

use crate::mph::MinimalPerfectHash;
use memmap2::Mmap;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

const MAGIC: [u8; 8] = *b"WNRYRO01";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: u64 = 52;
const SLOT_RECORD_LEN: u64 = 32 + 4 + 8; // key + length + offset

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ro-shard header magic/version mismatch")]
    BadHeader,
    #[error("key verification failed after perfect-hash lookup: the shard file is corrupt")]
    Corrupt,
    #[error("failed to build the perfect hash for this key set")]
    Build(#[from] crate::mph::BuildError),
    #[error("io error")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

struct Header {
    count: u64,
    bucket_count: u64,
    displacement_offset: u64,
    slot_table_offset: u64,
    payload_offset: u64,
}

impl Header {
    fn encode(&self) -> [u8; HEADER_LEN as usize] {
        let mut buf = [0u8; HEADER_LEN as usize];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[12..20].copy_from_slice(&self.count.to_le_bytes());
        buf[20..28].copy_from_slice(&self.bucket_count.to_le_bytes());
        buf[28..36].copy_from_slice(&self.displacement_offset.to_le_bytes());
        buf[36..44].copy_from_slice(&self.slot_table_offset.to_le_bytes());
        buf[44..52].copy_from_slice(&self.payload_offset.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN as usize || buf[0..8] != MAGIC {
            return Err(Error::BadHeader);
        }
        let version = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(Error::BadHeader);
        }
        Ok(Self {
            count: u64::from_le_bytes(buf[12..20].try_into().unwrap()),
            bucket_count: u64::from_le_bytes(buf[20..28].try_into().unwrap()),
            displacement_offset: u64::from_le_bytes(buf[28..36].try_into().unwrap()),
            slot_table_offset: u64::from_le_bytes(buf[36..44].try_into().unwrap()),
            payload_offset: u64::from_le_bytes(buf[44..52].try_into().unwrap()),
        })
    }
}

/// Streams `(key, content)` pairs into an immutable RO-shard file. Memory
/// usage is bounded by the key set (keys + lengths + offsets) plus a small
/// write buffer; payload bytes are written straight through to a scratch
/// file as they arrive, per spec.md §4.6 step 3.
pub struct Builder {
    scratch: tempfile::NamedTempFile,
    keys: Vec<[u8; 32]>,
    lengths: Vec<u32>,
    offsets: Vec<u64>,
    cursor: u64,
}

impl Builder {
    pub fn new() -> Result<Self> {
        Ok(Self {
            scratch: tempfile::NamedTempFile::new()?,
            keys: Vec::new(),
            lengths: Vec::new(),
            offsets: Vec::new(),
            cursor: 0,
        })
    }

    /// Appends one object. `key` must be unique across the stream (the RW-
    /// shard's primary key already guarantees this).
    pub fn push(&mut self, key: [u8; 32], content: &[u8]) -> Result<()> {
        self.scratch.write_all(content)?;
        self.offsets.push(self.cursor);
        self.lengths.push(content.len() as u32);
        self.keys.push(key);
        self.cursor += content.len() as u64;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Builds the perfect hash, writes header + index + payload to a
    /// sibling temp file, then atomically renames it into place — so a
    /// reader never observes a partially-written file under `final_path`
    /// (spec.md §5, cancellation rules).
    pub fn finalize(mut self, final_path: &Path) -> Result<()> {
        let mph = MinimalPerfectHash::build(&self.keys)?;

        let slot_table_offset = HEADER_LEN + mph.displacements.len() as u64 * 4;
        let payload_offset = slot_table_offset + self.keys.len() as u64 * SLOT_RECORD_LEN;

        let header = Header {
            count: self.keys.len() as u64,
            bucket_count: mph.bucket_count,
            displacement_offset: HEADER_LEN,
            slot_table_offset,
            payload_offset,
        };

        let dir = final_path.parent().unwrap_or_else(|| Path::new("."));
        let mut out = tempfile::NamedTempFile::new_in(dir)?;

        out.write_all(&header.encode())?;
        for d in &mph.displacements {
            out.write_all(&d.to_le_bytes())?;
        }

        let mut slot_records: Vec<Option<([u8; 32], u32, u64)>> = vec![None; self.keys.len()];
        for i in 0..self.keys.len() {
            let slot = mph.slot_of_key[i] as usize;
            slot_records[slot] = Some((self.keys[i], self.lengths[i], self.offsets[i]));
        }
        for record in slot_records {
            let (key, length, offset) = record.expect("perfect hash assigns every slot exactly once");
            out.write_all(&key)?;
            out.write_all(&length.to_le_bytes())?;
            out.write_all(&offset.to_le_bytes())?;
        }

        self.scratch.seek(SeekFrom::Start(0))?;
        std::io::copy(&mut self.scratch, out.as_file_mut())?;

        out.persist(final_path)
            .map_err(|persist_err| persist_err.error)?;
        Ok(())
    }
}

/// A read-only, memory-mapped view of a closed RO-shard file.
pub struct Reader {
    mmap: Mmap,
    count: u64,
    bucket_count: u64,
    displacement_offset: u64,
    slot_table_offset: u64,
    payload_offset: u64,
}

impl Reader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let header = Header::decode(&mmap)?;
        Ok(Self {
            mmap,
            count: header.count,
            bucket_count: header.bucket_count,
            displacement_offset: header.displacement_offset,
            slot_table_offset: header.slot_table_offset,
            payload_offset: header.payload_offset,
        })
    }

    /// Decodes a single bucket's displacement without touching the rest of
    /// the table: the reader's O(1) hot path.
    fn displacement(&self, bucket: u64) -> u32 {
        let start = self.displacement_offset as usize + bucket as usize * 4;
        u32::from_le_bytes(self.mmap[start..start + 4].try_into().unwrap())
    }

    fn slot_record(&self, slot: u64) -> ([u8; 32], u32, u64) {
        let start = self.slot_table_offset as usize + slot as usize * SLOT_RECORD_LEN as usize;
        let buf = &self.mmap[start..start + SLOT_RECORD_LEN as usize];
        let mut key = [0u8; 32];
        key.copy_from_slice(&buf[0..32]);
        let length = u32::from_le_bytes(buf[32..36].try_into().unwrap());
        let offset = u64::from_le_bytes(buf[36..44].try_into().unwrap());
        (key, length, offset)
    }

    /// Computes the slot, verifies the stored key, and returns the blob.
    /// Unknown keys return `Ok(None)` rather than an error: the perfect
    /// hash is total, so a key outside the built set still maps *somewhere*
    /// and must be explicitly rejected by the equality check.
    pub fn get(&self, key: &[u8; 32]) -> Result<Option<&[u8]>> {
        if self.count == 0 {
            return Ok(None);
        }

        let bucket = crate::mph::bucket_of(key, self.bucket_count);
        let displacement = self.displacement(bucket);
        let slot = crate::mph::slot_of(key, displacement, self.count);

        let (stored_key, length, offset) = self.slot_record(slot);
        if &stored_key != key {
            return Ok(None);
        }

        let start = self.payload_offset as usize + offset as usize;
        let end = start + length as usize;
        if end > self.mmap.len() {
            return Err(Error::Corrupt);
        }
        Ok(Some(&self.mmap[start..end]))
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Used for mirroring: a lazy, order-unspecified sequence over every
    /// stored `(key, bytes)` (spec.md §4.4).
    pub fn iter(&self) -> impl Iterator<Item = ([u8; 32], &[u8])> + '_ {
        (0..self.count).map(move |slot| {
            let (key, length, offset) = self.slot_record(slot);
            let start = self.payload_offset as usize + offset as usize;
            let end = start + length as usize;
            (key, &self.mmap[start..end])
        })
    }

    /// Re-verifies a handful of keys after finalize, as spec.md §4.6 step 4
    /// requires (the packer samples a subset post-pack).
    pub fn probe(&self, keys: impl IntoIterator<Item = [u8; 32]>) -> Result<()> {
        for key in keys {
            if self.get(&key)?.is_none() {
                return Err(Error::Corrupt);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_for(i: u32) -> [u8; 32] {
        let mut k = [0u8; 32];
        k[0..4].copy_from_slice(&i.to_le_bytes());
        k
    }

    #[test]
    fn round_trips_every_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.ro");

        let mut builder = Builder::new().unwrap();
        for i in 0..64u32 {
            let content = format!("object number {i}");
            builder.push(key_for(i), content.as_bytes()).unwrap();
        }
        builder.finalize(&path).unwrap();

        let reader = Reader::open(&path).unwrap();
        assert_eq!(reader.len(), 64);

        for i in 0..64u32 {
            let got = reader.get(&key_for(i)).unwrap().unwrap();
            assert_eq!(got, format!("object number {i}").as_bytes());
        }

        assert!(reader.get(&key_for(9999)).unwrap().is_none());

        let mut seen = std::collections::HashSet::new();
        for (key, bytes) in reader.iter() {
            assert!(seen.insert(key));
            assert!(!bytes.is_empty());
        }
        assert_eq!(seen.len(), 64);
    }

    #[test]
    fn empty_shard_is_well_formed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.ro");

        Builder::new().unwrap().finalize(&path).unwrap();
        let reader = Reader::open(&path).unwrap();
        assert_eq!(reader.len(), 0);
        assert!(reader.get(&key_for(0)).unwrap().is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.ro");
        std::fs::write(&path, b"not a real shard file at all, just junk bytes").unwrap();
        assert!(matches!(Reader::open(&path), Err(Error::BadHeader)));
    }
}

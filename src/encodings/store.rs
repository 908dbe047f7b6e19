//! Binary storage for face encodings.
//!
//! File format: faces.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of the encoder model name)
//! - dimensions: u16 (little-endian; 0 while the corpus is empty)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - label_len: u16 (little-endian)
//! - label: [u8; label_len] (UTF-8)
//! - vector: [f32; dimensions] (little-endian)
//!
//! A missing or zero-length file is an empty corpus. Anything else that
//! fails to parse is a distinct corruption error, never silently empty.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::encodings::records::{EncodingSet, FaceRecord, RecordError};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum EncodingStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    #[error("version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("model mismatch: file was written by a different encoder model")]
    ModelMismatch,

    #[error("checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Storage manager for the face encoding corpus.
///
/// Constructed with an explicit path and the expected encoder model id;
/// there is no ambient global state. `load` and `append` are the only
/// operations the rest of the crate uses; no delete or update exists.
pub struct EncodingStore {
    path: PathBuf,
    model_id: [u8; 32],
}

impl EncodingStore {
    pub fn new(path: PathBuf, model_id: [u8; 32]) -> Self {
        Self { path, model_id }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the full corpus.
    ///
    /// A missing or zero-length file yields an empty set. A file written by
    /// a different encoder model, a newer format version, or one that fails
    /// checksum/structure validation is an error.
    pub fn load(&self) -> Result<EncodingSet, EncodingStoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(EncodingSet::new());
            }
            Err(err) => return Err(err.into()),
        };

        if file.metadata()?.len() == 0 {
            return Ok(EncodingSet::new());
        }

        let mut reader = BufReader::new(file);

        let header = self.read_header(&mut reader)?;
        if header.model_id != self.model_id {
            return Err(EncodingStoreError::ModelMismatch);
        }
        if header.entry_count > 0 && header.dimensions == 0 {
            return Err(EncodingStoreError::InvalidFormat(
                "non-empty corpus with zero dimensions".to_string(),
            ));
        }

        let mut set = EncodingSet::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let record = Self::read_entry(&mut reader, header.dimensions as usize)?;
            set.push(record)?;
        }

        Ok(set)
    }

    /// Save the full corpus.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(&self, set: &EncodingSet) -> Result<(), EncodingStoreError> {
        let temp_path = self.path.with_extension("tmp");

        let result = self.write_to_file(&temp_path, set);

        if result.is_err() {
            // Clean up temp file on error
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Append one record: load, push, rewrite the whole file.
    ///
    /// The caller is responsible for mutual exclusion around this
    /// read-modify-write cycle (see `FaceService`). Returns the new count.
    pub fn append(&self, record: FaceRecord) -> Result<usize, EncodingStoreError> {
        let mut set = self.load()?;
        set.push(record)?;
        self.save(&set)?;
        Ok(set.len())
    }

    fn write_to_file(&self, path: &Path, set: &EncodingSet) -> Result<(), EncodingStoreError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: self.model_id,
            dimensions: set.dimensions().unwrap_or(0) as u16,
            entry_count: set.len() as u64,
        };
        Self::write_header(&mut writer, &header)?;

        for record in set.iter() {
            Self::write_entry(&mut writer, record)?;
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }

    fn read_header(&self, reader: &mut BufReader<File>) -> Result<Header, EncodingStoreError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        read_exact_or_corrupt(reader, &mut header_bytes, "header")?;

        let version = header_bytes[0];

        // Version check first
        if version > FORMAT_VERSION {
            return Err(EncodingStoreError::VersionMismatch(version, FORMAT_VERSION));
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&header_bytes[1..33]);

        let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);
        let entry_count = u64::from_le_bytes([
            header_bytes[35],
            header_bytes[36],
            header_bytes[37],
            header_bytes[38],
            header_bytes[39],
            header_bytes[40],
            header_bytes[41],
            header_bytes[42],
        ]);
        let stored_checksum = u32::from_le_bytes([
            header_bytes[43],
            header_bytes[44],
            header_bytes[45],
            header_bytes[46],
        ]);

        // Verify checksum (computed over header without checksum field)
        let computed_checksum = crc32fast::hash(&header_bytes[0..43]);
        if stored_checksum != computed_checksum {
            return Err(EncodingStoreError::ChecksumMismatch);
        }

        Ok(Header {
            version,
            model_id,
            dimensions,
            entry_count,
        })
    }

    fn write_header(
        writer: &mut BufWriter<File>,
        header: &Header,
    ) -> Result<(), EncodingStoreError> {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = header.version;
        header_bytes[1..33].copy_from_slice(&header.model_id);
        header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
        header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&header_bytes[0..43]);
        header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

        writer.write_all(&header_bytes)?;
        Ok(())
    }

    fn read_entry(
        reader: &mut BufReader<File>,
        dimensions: usize,
    ) -> Result<FaceRecord, EncodingStoreError> {
        let mut len_bytes = [0u8; 2];
        read_exact_or_corrupt(reader, &mut len_bytes, "entry label length")?;
        let label_len = u16::from_le_bytes(len_bytes) as usize;

        let mut label_bytes = vec![0u8; label_len];
        read_exact_or_corrupt(reader, &mut label_bytes, "entry label")?;
        let label = String::from_utf8(label_bytes)
            .map_err(|_| EncodingStoreError::InvalidFormat("label is not valid UTF-8".to_string()))?;

        let mut vector = Vec::with_capacity(dimensions);
        for _ in 0..dimensions {
            let mut float_bytes = [0u8; 4];
            read_exact_or_corrupt(reader, &mut float_bytes, "entry vector")?;
            vector.push(f32::from_le_bytes(float_bytes));
        }

        Ok(FaceRecord { label, vector })
    }

    fn write_entry(
        writer: &mut BufWriter<File>,
        record: &FaceRecord,
    ) -> Result<(), EncodingStoreError> {
        let label_len = u16::try_from(record.label.len()).map_err(|_| {
            EncodingStoreError::InvalidFormat(format!(
                "label too long to store: {} bytes",
                record.label.len()
            ))
        })?;

        writer.write_all(&label_len.to_le_bytes())?;
        writer.write_all(record.label.as_bytes())?;

        for &value in &record.vector {
            writer.write_all(&value.to_le_bytes())?;
        }

        Ok(())
    }
}

/// read_exact that reports a truncated file as corruption rather than
/// a bare I/O error.
fn read_exact_or_corrupt(
    reader: &mut BufReader<File>,
    buf: &mut [u8],
    what: &str,
) -> Result<(), EncodingStoreError> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            EncodingStoreError::InvalidFormat(format!("truncated file while reading {what}"))
        } else {
            EncodingStoreError::Io(err)
        }
    })
}

#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

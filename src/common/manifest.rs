use crate::common::TransferError;
use crate::crypto::{calculate_file_hash, hash, Nonce, Sha256Digest};
use crate::transfer::chunker::ChunkPlan;
use crate::utils::security::{validate_filename, validate_path};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One file of a transfer, immutable once agreed with the peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub index: u32,
    pub name: String,
    pub relative_path: String,
    pub size: u64,
    #[serde(with = "hex_digest")]
    pub sha256: Sha256Digest,
    pub nonce: Nonce,
    /// Sender side only
    #[serde(skip)]
    pub full_path: Option<PathBuf>,
}

impl FileEntry {
    pub fn total_chunks(&self, chunk_size: u64) -> u32 {
        ChunkPlan::new(self.size, chunk_size).total_chunks()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub files: Vec<FileEntry>,
}

impl Manifest {
    /// Build a manifest from local paths. Directories are walked; their own name
    /// becomes the first component of each relative path.
    pub async fn from_paths(paths: &[PathBuf]) -> Result<Self, TransferError> {
        let mut files = Vec::new();

        for path in paths {
            if path.is_dir() {
                let root_name = file_name_of(path)?;
                let mut entries: Vec<PathBuf> = WalkDir::new(path)
                    .follow_links(false)
                    .into_iter()
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.file_type().is_file())
                    .map(|entry| entry.into_path())
                    .collect();
                entries.sort();

                for file in entries {
                    let rel = file
                        .strip_prefix(path)
                        .map_err(|e| TransferError::protocol(e.to_string()))?;
                    let relative_path = Path::new(&root_name).join(rel);
                    files.push(build_entry(files.len(), &file, &relative_path).await?);
                }
            } else {
                let name = file_name_of(path)?;
                files.push(build_entry(files.len(), path, Path::new(&name)).await?);
            }
        }

        let manifest = Self { files };
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn total_chunks(&self, chunk_size: u64) -> u64 {
        self.files
            .iter()
            .map(|f| f.total_chunks(chunk_size) as u64)
            .sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn get(&self, index: u32) -> Option<&FileEntry> {
        self.files.get(index as usize).filter(|f| f.index == index)
    }

    /// Reject anything that would break nonce uniqueness or escape the destination
    pub fn validate(&self) -> Result<(), TransferError> {
        let mut nonces = HashSet::new();
        let mut paths = HashSet::new();

        for (position, file) in self.files.iter().enumerate() {
            if file.index as usize != position {
                return Err(TransferError::protocol(format!(
                    "file indices must be dense, found {} at position {}",
                    file.index, position
                )));
            }
            if !nonces.insert(file.nonce) {
                return Err(TransferError::protocol(format!(
                    "nonce reused by file {}",
                    file.index
                )));
            }
            validate_filename(&file.name).map_err(|e| {
                TransferError::protocol(format!("file {} name: {e}", file.index))
            })?;
            validate_path(&file.relative_path).map_err(|e| {
                TransferError::protocol(format!("file {} path: {e}", file.index))
            })?;
            if !paths.insert(file.relative_path.as_str()) {
                return Err(TransferError::protocol(format!(
                    "duplicate path {} in manifest",
                    file.relative_path
                )));
            }
        }

        Ok(())
    }
}

async fn build_entry(
    index: usize,
    path: &Path,
    relative_path: &Path,
) -> Result<FileEntry, TransferError> {
    let metadata = tokio::fs::metadata(path).await?;
    let sha256 = calculate_file_hash(path).await?;
    let index = u32::try_from(index)
        .map_err(|_| TransferError::protocol("too many files in manifest"))?;

    Ok(FileEntry {
        index,
        name: file_name_of(path)?,
        relative_path: relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        size: metadata.len(),
        sha256,
        nonce: Nonce::new(),
        full_path: Some(path.to_path_buf()),
    })
}

fn file_name_of(path: &Path) -> Result<String, TransferError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| TransferError::protocol(format!("unusable file name: {}", path.display())))
}

mod hex_digest {
    use super::hash::parse_hex_digest;
    use crate::crypto::Sha256Digest;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(digest: &Sha256Digest, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(digest))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Sha256Digest, D::Error> {
        let encoded = String::deserialize(d)?;
        parse_hex_digest(&encoded).map_err(serde::de::Error::custom)
    }
}

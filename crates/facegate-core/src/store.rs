//! Flat-file record store of enrolled face encodings.
//!
//! Two parallel arrays serialized as one JSON document. The whole file is
//! read on load and rewritten on save; records are never updated or removed
//! in place.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read store {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write store {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed store {path}: {source}")]
    Malformed {
        path: String,
        source: serde_json::Error,
    },
    #[error("store is misaligned: {names} names for {encodings} encodings")]
    Misaligned { names: usize, encodings: usize },
    #[error("encoding has {actual} dimensions, store holds {expected}-dimensional encodings")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Enrolled names and their encodings. `names[i]` labels `encodings[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodingStore {
    encodings: Vec<Vec<f32>>,
    names: Vec<String>,
}

impl EncodingStore {
    /// Load the store from `path`. A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "store file absent, starting empty");
            return Ok(Self::default());
        }

        let raw = std::fs::read(path).map_err(|source| StoreError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let store: Self = serde_json::from_slice(&raw).map_err(|source| StoreError::Malformed {
            path: path.display().to_string(),
            source,
        })?;
        store.check_aligned()?;

        tracing::info!(path = %path.display(), records = store.len(), "loaded encodings");
        Ok(store)
    }

    /// Rewrite the whole store to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        self.check_aligned()?;
        let write_err = |source| StoreError::Write {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let body = serde_json::to_vec(self).map_err(|source| StoreError::Malformed {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::write(path, body).map_err(write_err)?;

        tracing::info!(path = %path.display(), records = self.len(), "saved encodings");
        Ok(())
    }

    /// Append one record.
    pub fn push(&mut self, name: &str, encoding: Vec<f32>) -> Result<(), StoreError> {
        if let Some(expected) = self.dim() {
            if encoding.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: encoding.len(),
                });
            }
        }
        self.encodings.push(encoding);
        self.names.push(name.to_string());
        Ok(())
    }

    pub fn clear(&mut self) {
        self.encodings.clear();
        self.names.clear();
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn encodings(&self) -> &[Vec<f32>] {
        &self.encodings
    }

    /// Dimension shared by all encodings, if any are stored.
    pub fn dim(&self) -> Option<usize> {
        self.encodings.first().map(Vec::len)
    }

    /// (name, encoding) pairs in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.encodings.iter().map(Vec::as_slice))
    }

    /// Number of records per name, in first-enrolled order.
    pub fn name_counts(&self) -> Vec<(&str, usize)> {
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for name in &self.names {
            match counts.iter_mut().find(|(n, _)| n == name) {
                Some((_, count)) => *count += 1,
                None => counts.push((name.as_str(), 1)),
            }
        }
        counts
    }

    fn check_aligned(&self) -> Result<(), StoreError> {
        if self.names.len() != self.encodings.len() {
            return Err(StoreError::Misaligned {
                names: self.names.len(),
                encodings: self.encodings.len(),
            });
        }
        Ok(())
    }
}

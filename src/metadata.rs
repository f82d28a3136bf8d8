//! Collection metadata index
//!
//! Loaded wholesale at run start and keyed by edition number.

use crate::error::PipelineError;
use crate::types::NftMetadata;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct MetadataIndex {
    by_edition: HashMap<u32, NftMetadata>,
}

impl MetadataIndex {
    pub fn from_records(records: Vec<NftMetadata>) -> Self {
        let mut by_edition = HashMap::with_capacity(records.len());
        for record in records {
            if let Some(prev) = by_edition.insert(record.edition, record) {
                warn!(edition = prev.edition, "Duplicate edition in metadata, keeping last");
            }
        }
        Self { by_edition }
    }

    /// Read a JSON array of `{edition, attributes}` records
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let json = fs::read_to_string(path).map_err(|source| PipelineError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let records: Vec<NftMetadata> =
            serde_json::from_str(&json).map_err(|source| PipelineError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        let index = Self::from_records(records);
        info!(
            path = %path.display(),
            editions = index.len(),
            "Loaded collection metadata"
        );
        Ok(index)
    }

    pub fn get(&self, edition: u32) -> Option<&NftMetadata> {
        self.by_edition.get(&edition)
    }

    pub fn len(&self) -> usize {
        self.by_edition.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_edition.is_empty()
    }
}

/// Edition number from an NFT display name.
///
/// Takes the digits after the last `#` ("Farmer #0123" -> 123); without a
/// `#`, falls back to trailing digits ("Farmer 77" -> 77).
pub fn parse_edition(name: &str) -> Option<u32> {
    let name = name.trim();
    let tail = match name.rfind('#') {
        Some(pos) => name[pos + 1..].trim_start(),
        None => {
            let start = name
                .char_indices()
                .rev()
                .take_while(|(_, c)| c.is_ascii_digit())
                .last()
                .map(|(i, _)| i)?;
            &name[start..]
        }
    };

    let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

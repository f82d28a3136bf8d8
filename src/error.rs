//! Error types for the ingestion pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Run-aborting failures. Nothing is persisted once one of these is raised.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("marketplace returned {status} for page {page}: {body}")]
    Api {
        status: u16,
        page: u32,
        body: String,
    },

    #[error("marketplace request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("another run holds the lock at {}", .0.display())]
    Locked(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid CSV in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a single trade (or backfill row) was left out of the statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Error)]
pub enum SkipReason {
    #[error("no NFT item on either side")]
    NoNft,
    #[error("no payment item on the non-NFT side")]
    NoPayment,
    #[error("NFT belongs to another collection")]
    ForeignCollection,
    #[error("no edition number in NFT name")]
    NoEdition,
    #[error("edition missing from metadata index")]
    UnknownEdition,
    #[error("unrecognized payment currency")]
    UnknownCurrency,
    #[error("payment converted to zero")]
    ZeroValuation,
    #[error("non-positive payment amount")]
    InvalidAmount,
    #[error("offer has no completion date")]
    NoCompletionDate,
    #[error("offer record could not be decoded")]
    Undecodable,
    #[error("edition has no attributes in metadata")]
    NoAttributes,
    #[error("trade already recorded")]
    Duplicate,
    #[error("malformed backfill row")]
    MalformedRow,
}

impl SkipReason {
    /// Short label used in log fields and reports
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::NoNft => "no_nft",
            SkipReason::NoPayment => "no_payment",
            SkipReason::ForeignCollection => "foreign_collection",
            SkipReason::NoEdition => "no_edition",
            SkipReason::UnknownEdition => "unknown_edition",
            SkipReason::UnknownCurrency => "unknown_currency",
            SkipReason::ZeroValuation => "zero_valuation",
            SkipReason::InvalidAmount => "invalid_amount",
            SkipReason::NoCompletionDate => "no_completion_date",
            SkipReason::Undecodable => "undecodable",
            SkipReason::NoAttributes => "no_attributes",
            SkipReason::Duplicate => "duplicate",
            SkipReason::MalformedRow => "malformed_row",
        }
    }
}

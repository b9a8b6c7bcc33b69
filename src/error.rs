use std::path::PathBuf;
use thiserror::Error;

/// Failures scoped to a single archive. The batch logs these and moves on.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("no tabular entry found in {archive}")]
    NoTabularEntry { archive: String },

    #[error("corrupt archive {archive}: {source}")]
    Corrupt {
        archive: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("unparseable content in {archive}: {reason}")]
    Unparseable { archive: String, reason: String },

    #[error("no <quarter>T<year> token in archive name {archive}")]
    NoPeriod { archive: String },
}

impl ArchiveError {
    pub fn archive(&self) -> &str {
        match self {
            ArchiveError::NoTabularEntry { archive }
            | ArchiveError::Corrupt { archive, .. }
            | ArchiveError::Unparseable { archive, .. }
            | ArchiveError::NoPeriod { archive } => archive,
        }
    }
}

/// Stage-level failures surfaced to the pipeline caller.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required directory or file is absent; the stage produces nothing.
    #[error("missing input {}: {hint}", path.display())]
    MissingInput { path: PathBuf, hint: String },

    #[error(transparent)]
    PerArchive(#[from] ArchiveError),

    /// Listing or registry fetch failed; only the dependent stage is aborted.
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// Registry file present but not readable as a registry; aborts enrichment only.
    #[error("unreadable registry {}: {reason}", path.display())]
    UnreadableRegistry { path: PathBuf, reason: String },
}

impl PipelineError {
    pub fn missing(path: impl Into<PathBuf>, hint: impl Into<String>) -> Self {
        PipelineError::MissingInput {
            path: path.into(),
            hint: hint.into(),
        }
    }

    pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

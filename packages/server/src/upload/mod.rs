//! Staging, committing and reading files of a sharing group.

mod commit;
mod content;
mod files;
mod staging;

pub(crate) use content::discard_staged_content;
pub use commit::{CommitOutcome, CommitRequest, CommitService, CommitSummary};
pub use files::{DownloadedFile, FileService, IndexSnapshot};
pub use staging::{BatchKey, StageUpload, StagingStore};

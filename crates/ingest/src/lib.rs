//! Dataset ingestion: remote archive fetch, safe extraction, and the stage that ties them together.

pub mod checksum;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod ingestion;
pub mod lock;

pub use error::{IngestError, StageError};
pub use extract::{ArchiveExtractor, ArchiveFormat, ExtractResult};
pub use fetch::{
    ArchiveFetcher, FetchOptions, FetchResult, HttpFetcher, ObjectStoreFetcher, RemoteFetcher,
};
pub use ingestion::DataIngestion;
pub use lock::RunLock;

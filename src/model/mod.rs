pub mod batch;
pub mod file;
pub mod file_kind;
pub mod upload_context;

pub use batch::{Batch, BatchId};
pub use file::{File, FileId, UploadState};
pub use file_kind::FileKind;
pub use upload_context::{UploadContext, UploadKind};

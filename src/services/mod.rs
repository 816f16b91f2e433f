pub mod transport;
pub mod upload_manager;

pub use transport::{LocalFileTransport, ProgressSink, Transport};
pub use upload_manager::{LocalUploadManager, UploadManager};

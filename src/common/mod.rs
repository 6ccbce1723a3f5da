pub mod config;
pub mod errors;
pub mod manifest;

pub use config::TransferConfig;
pub use errors::{ErrorKind, FileError, TransferError};
pub use manifest::{FileEntry, Manifest};

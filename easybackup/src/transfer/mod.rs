//! Transfer output handling.

pub mod progress;

pub use progress::{classify, ProgressCallback, ProgressEvent, TransferProgress};

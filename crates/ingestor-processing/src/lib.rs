//! Ingestor Processing Library
//!
//! Pure, I/O-free classification of archive entries: the noise filter, the
//! extension/MIME table, magic-byte signature inspection and the security
//! validator that combines them.

pub mod filter;
pub mod mime;
pub mod signature;
pub mod validator;

pub use filter::EntryFilter;
pub use signature::{detect, Signature};
pub use validator::SecurityValidator;

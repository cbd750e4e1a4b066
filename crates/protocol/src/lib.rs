//! # rootfm Protocol Library
//!
//! This crate defines the request/response contract between the rootfm
//! daemon and its clients.
//!
//! ## Overview
//!
//! - **Requests**: list, read, write, rename, delete, bulk move/copy,
//!   folder creation and indexing, archive create/extract, upload, download
//! - **Responses**: typed payloads per operation, or an `ErrorMessage`
//!   carrying an `ErrorKind`
//! - **Envelope**: versioned wrapper with a sequence number, encoded as one
//!   JSON object per line
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Envelope, Request};
//!
//! let envelope = Envelope::new(1, Request::List { path: "docs".to_string() });
//! let line = envelope.to_json().unwrap();
//! let decoded = Envelope::<Request>::from_json(&line).unwrap();
//! assert_eq!(decoded, envelope);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Request, response and record definitions
//! - [`error`]: Error kinds and codec errors

pub mod error;
pub mod messages;

pub use error::{ErrorKind, ErrorMessage, ProtocolError, Result};
pub use messages::{
    ArchiveFormat, BulkItemResult, BulkOperation, BulkReport, Envelope, FileContent, FileRecord,
    ItemOutcome, ReadMode, Request, Response, PROTOCOL_VERSION,
};

//! MongoDB storage for examdesk

pub mod mongo;
pub mod schemas;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutMetadata, Schema};

use mongodb::error::{ErrorKind, WriteFailure};

/// Server error code for a unique index violation
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Whether a driver error is a unique-index violation
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY_CODE,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY_CODE,
        _ => err.to_string().contains("E11000"),
    }
}

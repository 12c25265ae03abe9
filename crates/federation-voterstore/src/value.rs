//! Store value variants. Grounded on
//! `original_source/.../VoterStore.h`'s `VoterStoreSequenceEntry` and
//! `VoterStoreWStringEntry`, the two concrete entry kinds the original
//! supports; everything else in that file is serialization plumbing this
//! crate's `serde` derives replace.

use federation_core::error::ErrorCode;
use federation_core::{FederationError, Result};
use serde::{Deserialize, Serialize};

/// A voter-store value. Closed to the two kinds the overlay actually
/// needs: a monotonic counter (epochs, sequence watermarks) and an owned
/// string (serialized small records such as a gap-set snapshot).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StoreValue {
    Sequence(i64),
    Text(String),
}

impl StoreValue {
    /// Replaces `self` with `incoming`, as long as both are the same
    /// variant. A write that changes a key's variant is a caller bug, not
    /// a legitimate update, so it's rejected rather than silently
    /// overwriting the type.
    pub fn update(&mut self, incoming: StoreValue) -> Result<()> {
        match (&self, &incoming) {
            (StoreValue::Sequence(_), StoreValue::Sequence(_)) | (StoreValue::Text(_), StoreValue::Text(_)) => {
                *self = incoming;
                Ok(())
            }
            _ => Err(FederationError::new(
                ErrorCode::InvalidArgument,
                "write changed the stored value's variant",
            )),
        }
    }

    pub fn as_sequence(&self) -> Option<i64> {
        match self {
            StoreValue::Sequence(v) => Some(*v),
            StoreValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            StoreValue::Text(v) => Some(v),
            StoreValue::Sequence(_) => None,
        }
    }
}

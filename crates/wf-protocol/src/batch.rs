// SPDX-License-Identifier: MIT OR Apache-2.0
//! Batch processing of multiple envelopes at once, used by the master when
//! flushing queued `TaskUpdate`/`MetricsReport` envelopes in one HTTP call.

use serde::{Deserialize, Serialize};

use crate::Envelope;

/// Maximum number of envelopes allowed in a single batch.
pub const MAX_BATCH_SIZE: usize = 1000;

/// A batch of envelopes to process together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Unique identifier for this batch request.
    pub id: String,
    /// The envelopes to process, in order.
    pub envelopes: Vec<Envelope>,
}

/// The result of processing an entire batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Identifier of the originating [`BatchRequest`].
    pub request_id: String,
    /// Per-envelope results, one for each input envelope.
    pub results: Vec<BatchResult>,
}

/// Outcome for a single envelope within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// Zero-based index of the envelope in the original request.
    pub index: usize,
    /// Whether this item succeeded or failed.
    pub status: BatchItemStatus,
}

/// Status of a single item in a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchItemStatus {
    /// The envelope was processed successfully.
    Success,
    /// The envelope could not be processed.
    Failed {
        /// Human-readable error description.
        error: String,
    },
}

/// A problem found while validating a [`BatchRequest`] as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchValidationError {
    /// The batch contains no envelopes.
    EmptyBatch,
    /// The batch exceeds [`MAX_BATCH_SIZE`].
    TooManyItems {
        /// Actual number of items submitted.
        count: usize,
        /// Maximum allowed.
        max: usize,
    },
}

/// Check size invariants for `request` before accepting it.
///
/// # Errors
///
/// Returns [`BatchValidationError`] if the batch is empty or oversized.
pub fn validate_batch_size(request: &BatchRequest) -> Result<(), BatchValidationError> {
    if request.envelopes.is_empty() {
        return Err(BatchValidationError::EmptyBatch);
    }
    if request.envelopes.len() > MAX_BATCH_SIZE {
        return Err(BatchValidationError::TooManyItems {
            count: request.envelopes.len(),
            max: MAX_BATCH_SIZE,
        });
    }
    Ok(())
}

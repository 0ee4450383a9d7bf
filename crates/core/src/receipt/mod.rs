//! Delivery receipt ingestion.
//!
//! Receipts are validated and queued on a bounded channel; a background
//! router feeds them to the batch aggregator. Posting a receipt never waits
//! on storage.

mod callback;
mod ingestor;
mod router;
mod types;

pub use callback::IngestCallback;
pub use ingestor::ReceiptIngestor;
pub use router::{create_receipt_pipeline, ReceiptRouter};
pub use types::{ReceiptAck, ReceiptEnvelope, ReceiptError, ReceiptPayload};

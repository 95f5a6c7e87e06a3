//! Shared data model for the Revision editing pipeline: request inputs,
//! stage outputs, the failure taxonomy, and the artifacts written around a
//! request (JSONL events and receipts).

pub mod events;
pub mod failure;
pub mod models;
pub mod pipeline;
pub mod receipts;

//! In-memory work queues for the two delivery pipelines.
//!
//! This module provides:
//! - Work item types (`Submission`, `Invitation`) and their retry envelope
//! - A bounded FIFO queue split into a cloneable `Producer` and a `Consumer`
//!
//! ## Architecture
//!
//! ```text
//! HTTP handlers → Producer → [bounded queue] → Consumer → Worker
//!                    ↑                                      │
//!                    └──────────── retry (tail) ────────────┘
//! ```

pub mod bounded;
pub mod types;

pub use bounded::{bounded, AdmissionError, Consumer, Producer, QUEUE_CAPACITY};
pub use types::{Envelope, Invitation, Submission, WorkItem, METADATA_FIELDS};

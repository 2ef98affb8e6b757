//! A P4Runtime client for table and counter management.
//!
//! A [`Session`] arbitrates for primacy on one device and loads its pipeline
//! catalog; an [`EntryRepository`] builds table and counter entries by name;
//! a [`BatchExecutor`] submits many entries and reports each outcome.

pub mod batch;
pub mod bench;
pub mod entity;
pub mod error;
pub mod p4rt;
pub mod representation;
pub mod sim;
pub mod util;

pub use batch::{BatchExecutor, BatchReport, EntryOutcome, FailurePolicy, SubmitMode};
pub use entity::{CounterEntry, CounterRecord, CounterValue, EntryRepository, TableEntry, TableEntryBuilder};
pub use error::{CodecError, Error, Result};
pub use p4rt::pipeconf::{FwdPipeConfig, PipelineCatalog};
pub use p4rt::session::{ConnectionOption, Session};
pub use representation::{ElectionId, SessionState};

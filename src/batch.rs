use crate::entity::{TableEntry, ToEntity, UpdateType};
use crate::error::{Error, Result};
use crate::p4rt::pure::new_update;
use crate::p4rt::session::Session;
use crossbeam::atomic::AtomicCell;
use futures::StreamExt;
use log::{debug, info, warn};
use std::time::{Duration, Instant};

/// How entries of a batch are put on the wire.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SubmitMode {
    /// One write at a time; the next is sent after the previous one is answered.
    #[default]
    Sequential,
    /// Up to `depth` writes in flight. Outcomes are still recorded in entry order.
    Pipelined { depth: usize },
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum FailurePolicy {
    /// Entries after the first failure are not sent. They are `Skipped`, or
    /// `Failed(LostPrimacy)` when the session lost primacy.
    #[default]
    Abort,
    Continue,
}

/// Why a batch under [`FailurePolicy::Abort`] stopped sending.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Halt {
    Running,
    Failed,
    LostPrimacy,
}

#[derive(Debug)]
pub enum EntryOutcome {
    Applied,
    Failed(Error),
    Skipped,
}

impl EntryOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, EntryOutcome::Applied)
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            EntryOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// One outcome per submitted entry, in submission order.
#[derive(Debug)]
pub struct BatchReport {
    pub update: UpdateType,
    pub outcomes: Vec<EntryOutcome>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_applied()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error().is_some()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, EntryOutcome::Skipped))
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.applied() == self.outcomes.len()
    }

    pub fn first_failure(&self) -> Option<(usize, &Error)> {
        self.outcomes
            .iter()
            .enumerate()
            .find_map(|(i, o)| o.error().map(|e| (i, e)))
    }
}

#[derive(Clone, Debug)]
pub struct BatchExecutor {
    session: Session,
    mode: SubmitMode,
    policy: FailurePolicy,
}

impl BatchExecutor {
    pub fn new(session: &Session) -> BatchExecutor {
        BatchExecutor {
            session: session.clone(),
            mode: SubmitMode::default(),
            policy: FailurePolicy::default(),
        }
    }

    pub fn mode(mut self, mode: SubmitMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn insert_all(&self, entries: &[TableEntry]) -> BatchReport {
        self.run(UpdateType::Insert, entries).await
    }

    pub async fn modify_all(&self, entries: &[TableEntry]) -> BatchReport {
        self.run(UpdateType::Modify, entries).await
    }

    pub async fn delete_all(&self, entries: &[TableEntry]) -> BatchReport {
        self.run(UpdateType::Delete, entries).await
    }

    async fn submit(&self, index: usize, entry: &TableEntry, update: UpdateType) -> Result<()> {
        let entity = entry.to_proto_entity(self.session.catalog())?;
        self.session
            .write(vec![new_update(update, entity)])
            .await
            .map_err(|e| e.at_entry(index))
    }

    fn record(&self, index: usize, entry: &TableEntry, result: Result<()>) -> EntryOutcome {
        match result {
            Ok(()) => EntryOutcome::Applied,
            Err(e) => {
                warn!(target: "batch", "entry {} ({}) failed: {}", index, entry, e);
                EntryOutcome::Failed(e)
            }
        }
    }

    fn halt_after(&self, outcome: &EntryOutcome) -> Halt {
        match outcome.error() {
            _ if self.policy == FailurePolicy::Continue => Halt::Running,
            None => Halt::Running,
            Some(e) if e.is_lost_primacy() => Halt::LostPrimacy,
            Some(_) => Halt::Failed,
        }
    }

    /// Outcome of an entry that was not sent, or `None` to send it.
    fn halted(&self, halt: Halt) -> Option<EntryOutcome> {
        match halt {
            Halt::Running => None,
            Halt::Failed => Some(EntryOutcome::Skipped),
            Halt::LostPrimacy => Some(EntryOutcome::Failed(Error::LostPrimacy {
                device_id: self.session.device_id(),
            })),
        }
    }

    /// Submits every entry with `update`, one write RPC per entry.
    pub async fn run(&self, update: UpdateType, entries: &[TableEntry]) -> BatchReport {
        debug!(target: "batch", "{:?} of {} entries, {:?}, {:?}", update, entries.len(), self.mode, self.policy);
        let start = Instant::now();
        let outcomes = match self.mode {
            SubmitMode::Sequential => {
                let mut outcomes = Vec::with_capacity(entries.len());
                let mut halt = Halt::Running;
                for (index, entry) in entries.iter().enumerate() {
                    if let Some(outcome) = self.halted(halt) {
                        outcomes.push(outcome);
                        continue;
                    }
                    let outcome = self.record(index, entry, self.submit(index, entry, update).await);
                    halt = self.halt_after(&outcome);
                    outcomes.push(outcome);
                }
                outcomes
            }
            SubmitMode::Pipelined { depth } => {
                let halt = AtomicCell::new(Halt::Running);
                let halt = &halt;
                futures::stream::iter(entries.iter().enumerate())
                    .map(|(index, entry)| async move {
                        if let Some(outcome) = self.halted(halt.load()) {
                            return outcome;
                        }
                        let outcome = self.record(index, entry, self.submit(index, entry, update).await);
                        let next = self.halt_after(&outcome);
                        if next != Halt::Running {
                            // the first failure decides how later entries are reported
                            let _ = halt.compare_exchange(Halt::Running, next);
                        }
                        outcome
                    })
                    .buffered(depth.max(1))
                    .collect::<Vec<_>>()
                    .await
            }
        };
        let report = BatchReport {
            update,
            outcomes,
            elapsed: start.elapsed(),
        };
        info!(
            target: "batch",
            "{:?} of {} entries: {} applied, {} failed, {} skipped in {:?}",
            update,
            entries.len(),
            report.applied(),
            report.failed(),
            report.skipped(),
            report.elapsed
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p4rt::session::ConnectionOption;
    use crate::sim::{program, SimDevice};
    use std::sync::Arc;
    use tonic::Code;

    fn entries(session: &Session, range: std::ops::Range<usize>) -> Vec<TableEntry> {
        let repo = session.repository();
        range
            .map(|i| {
                repo.table_entry("egress.tbl_vlan_egress", "strip_vlan")
                    .unwrap()
                    .with_match("istd.egress_port", &i.to_string())
                    .unwrap()
                    .build()
                    .unwrap()
            })
            .collect()
    }

    async fn session(device: &SimDevice) -> Session {
        Session::setup(Arc::new(device.clone()), &ConnectionOption::default(), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_abort_skips_after_first_failure() {
        let device = SimDevice::with_pipeline(1, program::p4info());
        let session = session(&device).await;
        let batch = entries(&session, 0..5);
        batch[2].insert(&session).await.unwrap();

        let report = BatchExecutor::new(&session).insert_all(&batch).await;
        assert_eq!(report.applied(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 2);
        match report.first_failure() {
            Some((2, Error::WriteRejected { index: 2, code: Code::AlreadyExists, .. })) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(device.table_len("egress.tbl_vlan_egress"), 3);
        session.teardown().await;
    }

    #[tokio::test]
    async fn test_continue_records_every_entry() {
        let device = SimDevice::with_pipeline(1, program::p4info());
        let session = session(&device).await;
        let batch = entries(&session, 0..4);
        let report = BatchExecutor::new(&session)
            .policy(FailurePolicy::Continue)
            .delete_all(&batch[..2])
            .await;
        assert_eq!(report.failed(), 2);
        assert!(matches!(
            report.outcomes[1].error(),
            Some(Error::WriteRejected { index: 1, code: Code::NotFound, .. })
        ));

        let executor = BatchExecutor::new(&session);
        assert!(executor.insert_all(&batch).await.is_success());
        assert!(executor.modify_all(&batch).await.is_success());
        session.teardown().await;
    }

    #[tokio::test]
    async fn test_pipelined_keeps_attribution() {
        let device = SimDevice::with_pipeline(1, program::p4info());
        let session = session(&device).await;
        let batch = entries(&session, 0..20);
        batch[7].insert(&session).await.unwrap();
        batch[13].insert(&session).await.unwrap();

        let report = BatchExecutor::new(&session)
            .mode(SubmitMode::Pipelined { depth: 4 })
            .policy(FailurePolicy::Continue)
            .insert_all(&batch)
            .await;
        assert_eq!(report.outcomes.len(), 20);
        assert_eq!(report.applied(), 18);
        for (i, outcome) in report.outcomes.iter().enumerate() {
            match (i, outcome) {
                (7, EntryOutcome::Failed(Error::WriteRejected { index: 7, .. })) => {}
                (13, EntryOutcome::Failed(Error::WriteRejected { index: 13, .. })) => {}
                (_, EntryOutcome::Applied) if i != 7 && i != 13 => {}
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(device.table_len("egress.tbl_vlan_egress"), 20);
        session.teardown().await;
    }

    #[tokio::test]
    async fn test_abort_on_lost_primacy_fails_remaining_entries() {
        let device = SimDevice::with_pipeline(1, program::p4info());
        let session = session(&device).await;
        let batch = entries(&session, 0..6);
        device.preempt_after_writes(3);

        let report = BatchExecutor::new(&session).insert_all(&batch).await;
        assert_eq!(report.applied(), 3);
        assert_eq!(report.skipped(), 0);
        for outcome in report.outcomes[3..].iter() {
            assert!(outcome.error().map_or(false, Error::is_lost_primacy), "{:?}", outcome);
        }
        assert_eq!(device.table_len("egress.tbl_vlan_egress"), 3);

        let report = BatchExecutor::new(&session)
            .mode(SubmitMode::Pipelined { depth: 2 })
            .delete_all(&batch[..3])
            .await;
        assert_eq!(report.applied(), 0);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.error().map_or(false, Error::is_lost_primacy)));
        session.teardown().await;
    }

    #[tokio::test]
    async fn test_closed_session_fails_entries() {
        let device = SimDevice::with_pipeline(1, program::p4info());
        let session = session(&device).await;
        let batch = entries(&session, 0..3);
        session.teardown().await;
        let report = BatchExecutor::new(&session).insert_all(&batch).await;
        assert!(matches!(report.outcomes[0], EntryOutcome::Failed(Error::SessionClosed)));
        assert_eq!(report.skipped(), 2);
    }
}

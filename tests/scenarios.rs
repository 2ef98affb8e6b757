use futures::StreamExt;
use rusty_p4_shell::batch::{BatchExecutor, EntryOutcome, FailurePolicy, SubmitMode};
use rusty_p4_shell::bench::{run_insert_delete, BenchLog, Scenario};
use rusty_p4_shell::entity::CounterRecord;
use rusty_p4_shell::sim::{program, SimDevice};
use rusty_p4_shell::{ConnectionOption, Error, Session, SessionState};
use std::sync::Arc;
use tonic::Code;

async fn setup(device: &SimDevice) -> Session {
    Session::setup(Arc::new(device.clone()), &ConnectionOption::default(), None)
        .await
        .unwrap()
}

#[tokio::test]
async fn switching_insert_read_delete_1000() {
    let device = SimDevice::with_pipeline(1, program::p4info());
    device.set_read_chunk(100);
    let session = setup(&device).await;
    let entries = Scenario::switching(1000)
        .build_entries(&session.repository())
        .unwrap();

    let executor = BatchExecutor::new(&session);
    let report = executor.insert_all(&entries).await;
    assert!(report.is_success());
    assert_eq!(report.outcomes.len(), 1000);
    assert_eq!(device.table_len("ingress.tbl_switching"), 1000);

    let filter = session
        .repository()
        .table_entry_without_action("ingress.tbl_switching")
        .unwrap()
        .allow_partial_match()
        .build()
        .unwrap();
    let read = filter.read_all(&session).await.unwrap();
    assert_eq!(read.len(), 1000);
    for entry in entries.iter() {
        assert!(read.contains(entry), "{} was not read back", entry);
    }

    // reading again issues a fresh RPC
    assert_eq!(filter.read(&session).count().await, 1000);

    let report = executor.delete_all(&entries).await;
    assert!(report.is_success());
    assert_eq!(device.table_len("ingress.tbl_switching"), 0);
    assert!(filter.read_all(&session).await.unwrap().is_empty());
    session.teardown().await;
}

#[tokio::test]
async fn wildcard_read_filters_on_set_fields() {
    let device = SimDevice::with_pipeline(1, program::p4info());
    let session = setup(&device).await;
    let repo = session.repository();
    for (port, valid) in [(1, "1"), (2, "1"), (3, "0")] {
        repo.table_entry("ingress.tbl_ingress_vlan", "push_vlan")
            .unwrap()
            .with_match("standard_metadata.ingress_port", &port.to_string())
            .unwrap()
            .with_match("headers.vlan_tag.$valid$", valid)
            .unwrap()
            .build()
            .unwrap()
            .insert(&session)
            .await
            .unwrap();
    }
    let filter = repo
        .table_entry_without_action("ingress.tbl_ingress_vlan")
        .unwrap()
        .with_match("headers.vlan_tag.$valid$", "1")
        .unwrap()
        .allow_partial_match()
        .build()
        .unwrap();
    let read = filter.read_all(&session).await.unwrap();
    assert_eq!(read.len(), 2);
    assert!(read
        .iter()
        .all(|e| e.action.as_ref().map(|a| a.name.as_str()) == Some("ingress.push_vlan")));
    session.teardown().await;
}

#[tokio::test]
async fn counter_read_without_index_returns_every_cell() {
    let device = SimDevice::with_pipeline(1, program::p4info());
    device.bump_counter("ingress.in_pkts", 0, 1, 64);
    device.bump_counter("ingress.in_pkts", 3, 2, 128);
    let session = setup(&device).await;

    let mut records: Vec<CounterRecord> = vec![];
    let count = session
        .repository()
        .counter_entry("ingress.in_pkts")
        .unwrap()
        .read(&session, |r| records.push(r))
        .await
        .unwrap();
    assert_eq!(count, 4);
    assert_eq!(records.len(), 4);
    let indices: Vec<_> = records.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![Some(0), Some(1), Some(2), Some(3)]);
    assert_eq!(records[0].value.packets, 1);
    assert_eq!(records[3].value.bytes, 128);
    assert_eq!(records[1].value.packets, 0);
    session.teardown().await;
}

#[tokio::test]
async fn lost_primacy_rejects_every_later_write() {
    let device = SimDevice::with_pipeline(1, program::p4info());
    let session = setup(&device).await;
    let entries = Scenario::egress_vlan(10)
        .build_entries(&session.repository())
        .unwrap();
    device.preempt_after_writes(4);

    let report = BatchExecutor::new(&session)
        .policy(FailurePolicy::Continue)
        .insert_all(&entries)
        .await;
    assert_eq!(report.applied(), 4);
    for outcome in report.outcomes[4..].iter() {
        assert!(outcome.error().map_or(false, Error::is_lost_primacy), "{:?}", outcome);
    }
    assert_eq!(device.table_len("egress.tbl_vlan_egress"), 4);

    let mut state = session.watch_state();
    while *state.borrow_and_update() != SessionState::Standby {
        state.changed().await.unwrap();
    }
    // reads stay allowed in standby
    let counters = session
        .repository()
        .counter_entry("in_pkts")
        .unwrap()
        .read_all(&session)
        .await
        .unwrap();
    assert_eq!(counters.len(), 4);
    session.teardown().await;
}

#[tokio::test]
async fn duplicate_insert_is_rejected_at_its_index() {
    let device = SimDevice::with_pipeline(1, program::p4info());
    let session = setup(&device).await;
    let mut entries = Scenario::ingress_vlan(5)
        .build_entries(&session.repository())
        .unwrap();
    entries.push(entries[1].clone());

    let report = BatchExecutor::new(&session).insert_all(&entries).await;
    assert_eq!(report.applied(), 5);
    match report.first_failure() {
        Some((5, Error::WriteRejected { index, code, .. })) => {
            assert_eq!(*index, 5);
            assert_eq!(*code, Code::AlreadyExists);
        }
        other => panic!("unexpected {:?}", other),
    }
    session.teardown().await;
}

#[tokio::test]
async fn pipelined_scenario_leaves_the_table_empty() {
    let device = SimDevice::with_pipeline(1, program::p4info());
    device.set_write_delay(Some(std::time::Duration::from_millis(1)));
    let session = setup(&device).await;
    let result = run_insert_delete(
        &session,
        &Scenario::ingress_vlan(200),
        SubmitMode::Pipelined { depth: 16 },
        None,
    )
    .await
    .unwrap();
    assert_eq!(result.insert.applied(), 200);
    assert_eq!(result.delete.applied(), 200);
    assert!(result
        .insert
        .outcomes
        .iter()
        .all(|o| matches!(o, EntryOutcome::Applied)));
    assert_eq!(device.table_len("ingress.tbl_ingress_vlan"), 0);
    session.teardown().await;
}

#[tokio::test]
async fn bench_log_appends_one_line_per_run() {
    let dir = tempfile::tempdir().unwrap();
    let log = BenchLog::new(dir.path().join("tests.csv"));
    let device = SimDevice::with_pipeline(1, program::p4info());
    let session = setup(&device).await;

    for _ in 0..2 {
        run_insert_delete(&session, &Scenario::egress_vlan(50), SubmitMode::Sequential, Some(&log))
            .await
            .unwrap();
    }
    let text = std::fs::read_to_string(log.path()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let (label, seconds) = line.split_once("; ").unwrap();
        assert_eq!(label, "egress.tbl_vlan_egress");
        assert!(!seconds.contains('.'));
        assert!(seconds.replace(',', ".").parse::<f64>().is_ok());
    }
    assert_eq!(device.table_len("egress.tbl_vlan_egress"), 0);
    session.teardown().await;
}

#[tokio::test]
async fn second_session_on_same_device_is_refused() {
    let device = SimDevice::with_pipeline(1, program::p4info());
    let first = setup(&device).await;
    let err = Session::setup(Arc::new(device.clone()), &ConnectionOption::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Arbitration { .. }));
    assert_eq!(first.state(), SessionState::Active);
    first.teardown().await;
}

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chunkflow_core::{ConflictVerdict, WorkUnitPhase, WorkUnitStatus};
use chunkflow_state::{ConflictAnalysis, StateEvent, StateStore, WorkUnit};

fn store() -> StateStore {
    StateStore::in_memory().unwrap()
}

#[test]
fn create_and_get_round_trip() {
    let store = store();
    let unit = WorkUnit::new("feature", WorkUnitPhase::Implement);
    store.create_work_unit(&unit).unwrap();

    let fetched = store.get_work_unit("feature").unwrap().unwrap();
    assert_eq!(fetched.chunk, "feature");
    assert_eq!(fetched.phase, WorkUnitPhase::Implement);
    assert_eq!(fetched.status, WorkUnitStatus::Ready);
}

#[test]
fn duplicate_create_is_a_conflict() {
    let store = store();
    let unit = WorkUnit::new("feature", WorkUnitPhase::Goal);
    store.create_work_unit(&unit).unwrap();
    let err = store.create_work_unit(&unit).unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

#[test]
fn creation_logs_initial_history_row() {
    let store = store();
    store
        .create_work_unit(&WorkUnit::new("feature", WorkUnitPhase::Goal))
        .unwrap();

    let history = store.get_status_history("feature").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].old_status, None);
    assert_eq!(history[0].new_status, WorkUnitStatus::Ready);
}

#[test]
fn every_status_change_appends_exactly_one_row() {
    let store = store();
    let mut unit = store
        .create_work_unit(&WorkUnit::new("feature", WorkUnitPhase::Goal))
        .unwrap();

    unit.status = WorkUnitStatus::Running;
    unit = store.update_work_unit(&unit).unwrap();

    // Non-status update: no new row.
    unit.priority = 5;
    unit = store.update_work_unit(&unit).unwrap();

    unit.status = WorkUnitStatus::Done;
    store.update_work_unit(&unit).unwrap();

    let history = store.get_status_history("feature").unwrap();
    let transitions: Vec<_> = history
        .iter()
        .map(|t| (t.old_status, t.new_status))
        .collect();
    assert_eq!(
        transitions,
        vec![
            (None, WorkUnitStatus::Ready),
            (Some(WorkUnitStatus::Ready), WorkUnitStatus::Running),
            (Some(WorkUnitStatus::Running), WorkUnitStatus::Done),
        ]
    );
}

#[test]
fn update_unknown_unit_is_not_found() {
    let store = store();
    let unit = WorkUnit::new("ghost", WorkUnitPhase::Goal);
    assert!(store.update_work_unit(&unit).is_err());
}

#[test]
fn ready_queue_orders_by_priority_then_age() {
    let store = store();
    store
        .create_work_unit(&WorkUnit::new("old_low", WorkUnitPhase::Plan))
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    store
        .create_work_unit(&WorkUnit::new("young_low", WorkUnitPhase::Plan))
        .unwrap();
    store
        .create_work_unit(&WorkUnit::new("high", WorkUnitPhase::Plan).with_priority(10))
        .unwrap();

    let queue = store.get_ready_queue(None).unwrap();
    let names: Vec<_> = queue.iter().map(|u| u.chunk.as_str()).collect();
    assert_eq!(names, vec!["high", "old_low", "young_low"]);

    let limited = store.get_ready_queue(Some(2)).unwrap();
    assert_eq!(limited.len(), 2);
}

#[test]
fn ready_queue_excludes_other_statuses() {
    let store = store();
    let mut unit = store
        .create_work_unit(&WorkUnit::new("busy", WorkUnitPhase::Implement))
        .unwrap();
    unit.status = WorkUnitStatus::Running;
    unit.worktree = Some("/tmp/wt".to_string());
    store.update_work_unit(&unit).unwrap();

    assert!(store.get_ready_queue(None).unwrap().is_empty());
}

#[test]
fn attention_queue_orders_by_blockers_then_wait() {
    let store = store();

    let mut lonely = store
        .create_work_unit(&WorkUnit::new("lonely", WorkUnitPhase::Plan))
        .unwrap();
    lonely.status = WorkUnitStatus::NeedsAttention;
    lonely.attention_reason = Some("agent failed".to_string());
    store.update_work_unit(&lonely).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(5));

    let mut blocker = store
        .create_work_unit(&WorkUnit::new("blocker", WorkUnitPhase::Plan))
        .unwrap();
    blocker.status = WorkUnitStatus::NeedsAttention;
    blocker.attention_reason = Some("question".to_string());
    store.update_work_unit(&blocker).unwrap();

    let mut blocked = store
        .create_work_unit(&WorkUnit::new("blocked", WorkUnitPhase::Plan))
        .unwrap();
    blocked.status = WorkUnitStatus::Blocked;
    blocked.blocked_by = vec!["blocker".to_string()];
    store.update_work_unit(&blocked).unwrap();

    let queue = store.get_attention_queue().unwrap();
    assert_eq!(queue.len(), 2);
    // "blocker" blocks one unit, so it outranks the older "lonely".
    assert_eq!(queue[0].0.chunk, "blocker");
    assert_eq!(queue[0].1, 1);
    assert_eq!(queue[1].0.chunk, "lonely");
    assert_eq!(queue[1].1, 0);
}

#[test]
fn list_blocked_by_finds_dependents() {
    let store = store();
    store
        .create_work_unit(&WorkUnit::new("base", WorkUnitPhase::Plan))
        .unwrap();
    let mut dependent = store
        .create_work_unit(&WorkUnit::new("dependent", WorkUnitPhase::Plan))
        .unwrap();
    dependent.status = WorkUnitStatus::Blocked;
    dependent.blocked_by = vec!["base".to_string()];
    store.update_work_unit(&dependent).unwrap();

    let blocked = store.list_blocked_by("base").unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].chunk, "dependent");
}

#[test]
fn delete_removes_unit() {
    let store = store();
    store
        .create_work_unit(&WorkUnit::new("doomed", WorkUnitPhase::Goal))
        .unwrap();
    assert!(store.delete_work_unit("doomed").unwrap());
    assert!(store.get_work_unit("doomed").unwrap().is_none());
    assert!(!store.delete_work_unit("doomed").unwrap());
}

#[test]
fn events_fan_out_on_writes() {
    let store = store();
    let mut rx = store.subscribe();

    store
        .create_work_unit(&WorkUnit::new("feature", WorkUnitPhase::Goal))
        .unwrap();
    match rx.try_recv().unwrap() {
        StateEvent::WorkUnitUpdate { chunk, status, .. } => {
            assert_eq!(chunk, "feature");
            assert_eq!(status, "READY");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let mut unit = store.get_work_unit("feature").unwrap().unwrap();
    unit.status = WorkUnitStatus::NeedsAttention;
    unit.attention_reason = Some("Question: Which DB?".to_string());
    store.update_work_unit(&unit).unwrap();

    // Update event, then attention-added event.
    assert!(matches!(
        rx.try_recv().unwrap(),
        StateEvent::WorkUnitUpdate { .. }
    ));
    match rx.try_recv().unwrap() {
        StateEvent::AttentionUpdate { chunk, reason, .. } => {
            assert_eq!(chunk, "feature");
            assert_eq!(reason.as_deref(), Some("Question: Which DB?"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn delete_broadcasts_deleted_status() {
    let store = store();
    store
        .create_work_unit(&WorkUnit::new("feature", WorkUnitPhase::Goal))
        .unwrap();
    let mut rx = store.subscribe();
    store.delete_work_unit("feature").unwrap();

    match rx.try_recv().unwrap() {
        StateEvent::WorkUnitUpdate { status, phase, .. } => {
            assert_eq!(status, "DELETED");
            assert!(phase.is_empty());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn conflict_verdicts_round_trip_on_unit() {
    let store = store();
    let mut unit = store
        .create_work_unit(&WorkUnit::new("feature", WorkUnitPhase::Plan))
        .unwrap();
    unit.conflict_verdicts
        .insert("other".to_string(), ConflictVerdict::AskOperator);
    unit.conflict_override = Some(ConflictVerdict::Independent);
    store.update_work_unit(&unit).unwrap();

    let fetched = store.get_work_unit("feature").unwrap().unwrap();
    assert_eq!(
        fetched.conflict_verdicts.get("other"),
        Some(&ConflictVerdict::AskOperator)
    );
    assert_eq!(fetched.conflict_override, Some(ConflictVerdict::Independent));
}

#[test]
fn conflicts_table_canonical_upsert() {
    let store = store();
    let analysis = ConflictAnalysis::new("zeta", "alpha", ConflictVerdict::Serialize, "overlap");
    store.upsert_conflict(&analysis).unwrap();

    // Lookup works in either order.
    let fetched = store.get_conflict("alpha", "zeta").unwrap().unwrap();
    assert_eq!(fetched.chunk_a, "alpha");
    assert_eq!(fetched.verdict, ConflictVerdict::Serialize);
    assert!(store.get_conflict("zeta", "alpha").unwrap().is_some());

    // Re-analysis replaces, never duplicates.
    let updated = ConflictAnalysis::new("alpha", "zeta", ConflictVerdict::Independent, "refined");
    store.upsert_conflict(&updated).unwrap();
    assert_eq!(store.list_all_conflicts(None).unwrap().len(), 1);
    assert_eq!(
        store.get_conflict("alpha", "zeta").unwrap().unwrap().verdict,
        ConflictVerdict::Independent
    );
}

#[test]
fn conflicts_filter_and_clear() {
    let store = store();
    store
        .upsert_conflict(&ConflictAnalysis::new(
            "a_chunk",
            "b_chunk",
            ConflictVerdict::Serialize,
            "files overlap",
        ))
        .unwrap();
    store
        .upsert_conflict(&ConflictAnalysis::new(
            "a_chunk",
            "c_chunk",
            ConflictVerdict::Independent,
            "no overlap",
        ))
        .unwrap();

    assert_eq!(
        store
            .list_all_conflicts(Some(ConflictVerdict::Serialize))
            .unwrap()
            .len(),
        1
    );
    assert_eq!(store.list_conflicts_for_chunk("a_chunk").unwrap().len(), 2);
    assert_eq!(store.list_conflicts_for_chunk("b_chunk").unwrap().len(), 1);

    let cleared = store.clear_conflicts_for_chunk("a_chunk").unwrap();
    assert_eq!(cleared, 2);
    assert!(store.list_all_conflicts(None).unwrap().is_empty());
}

#[test]
fn config_defaults_and_overrides() {
    let store = store();
    let config = store.load_config().unwrap();
    assert_eq!(config.max_agents, 2);

    store.set_config("max_agents", "4").unwrap();
    store.set_config("dispatch_interval_seconds", "0.25").unwrap();
    store.set_config("base_branch", "develop").unwrap();

    let config = store.load_config().unwrap();
    assert_eq!(config.max_agents, 4);
    assert!((config.dispatch_interval_seconds - 0.25).abs() < f64::EPSILON);
    assert_eq!(config.base_branch, "develop");

    // Garbage values fall back to defaults.
    store.set_config("max_agents", "not-a-number").unwrap();
    assert_eq!(store.load_config().unwrap().max_agents, 2);
}

#[test]
fn open_on_disk_persists() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("orchestrator").join("state.db");

    {
        let store = StateStore::open(&db_path).unwrap();
        store
            .create_work_unit(&WorkUnit::new("persistent", WorkUnitPhase::Goal))
            .unwrap();
    }

    let store = StateStore::open(&db_path).unwrap();
    assert!(store.get_work_unit("persistent").unwrap().is_some());
}

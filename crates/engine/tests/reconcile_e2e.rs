//! End-to-end poll cycles over the in-memory store
//!
//! Drives the full Poller -> WorkerPool -> Reconciler -> ActivitySource path
//! with a scripted document transport.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use huntbot_core::{
    BotConfig, DocumentActivityMode, EditEvent, Puzzle, PuzzleId, PuzzleStatus, Round, RoundId,
    Solver, SolverId, StaticConfigSource,
};
use huntbot_engine::activity::{ActivityTransport, DocumentMetadata, RevisionPage, TransportError};
use huntbot_engine::stats::keys;
use huntbot_engine::{
    ActivitySource, AssignmentStore, InMemoryAssignmentStore, InMemoryStatsReporter, Poller,
    Reconciler, SchedulerContext, WorkerPool,
};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Per-document edit lists, swapped between cycles
#[derive(Default)]
struct ScriptedDocuments {
    edits: Mutex<HashMap<String, Vec<EditEvent>>>,
}

impl ScriptedDocuments {
    fn set(&self, document: &str, edits: Vec<EditEvent>) {
        self.edits.lock().insert(document.to_string(), edits);
    }
}

#[async_trait]
impl ActivityTransport for ScriptedDocuments {
    async fn fetch_metadata(&self, document: &str) -> Result<DocumentMetadata, TransportError> {
        Ok(DocumentMetadata {
            edits: self.edits.lock().get(document).cloned().unwrap_or_default(),
            segment_count: Some(1),
        })
    }

    async fn list_revisions(
        &self,
        _: &str,
        _: Option<&str>,
    ) -> Result<RevisionPage, TransportError> {
        Ok(RevisionPage::default())
    }

    async fn segment_count(&self, _: &str) -> Result<Option<u32>, TransportError> {
        Ok(Some(1))
    }
}

struct Hunt {
    store: Arc<InMemoryAssignmentStore>,
    documents: Arc<ScriptedDocuments>,
    stats: Arc<InMemoryStatsReporter>,
    poller: Poller,
    _shutdown: watch::Sender<bool>,
}

fn hunt(now: DateTime<Utc>) -> Hunt {
    let store = Arc::new(InMemoryAssignmentStore::new());
    store.insert_round(Round::new(RoundId(1), "Ocean"));
    for (id, name) in [(1, "Whale Song"), (2, "Kelp Forest")] {
        store.insert_puzzle(
            Puzzle::new(PuzzleId(id), name, RoundId(1))
                .with_document(format!("doc-{id}"))
                .with_activity_mode(DocumentActivityMode::Metadata),
        );
    }
    store.insert_solver(Solver::new(SolverId(10), "alice"));
    store.insert_solver(Solver::new(SolverId(11), "bob"));

    let config = StaticConfigSource::default()
        .with("worker_count", "2")
        .with("puzzle_pause_ms", "0")
        .with("cycle_pause_secs", "1")
        .with("auto_assign", "true")
        .with("quota_qpm", "6000");
    let ctx = Arc::new(SchedulerContext::new(BotConfig::default(), Arc::new(config)));

    let documents = Arc::new(ScriptedDocuments::default());
    let source = ActivitySource::new(documents.clone(), ctx.clone());
    let reconciler = Reconciler::new(store.clone(), source, ctx.clone())
        .with_clock(Arc::new(move || now));

    let (shutdown, shutdown_rx) = watch::channel(false);
    let pool = WorkerPool::new(Arc::new(reconciler), shutdown_rx.clone());
    let stats = Arc::new(InMemoryStatsReporter::new());
    let poller = Poller::new(ctx, store.clone(), pool, stats.clone(), shutdown_rx);

    Hunt {
        store,
        documents,
        stats,
        poller,
        _shutdown: shutdown,
    }
}

#[tokio::test]
async fn test_new_edit_assigns_and_stale_replay_is_ignored() {
    let h = hunt(at(200));
    h.documents.set("doc-1", vec![EditEvent::new("alice", at(100))]);

    let report = h.poller.run_once().await.unwrap();
    assert_eq!(report.puzzle_count, 2);
    assert_eq!(report.stats.recorded, 1);
    assert_eq!(report.stats.assigned, 1);

    let puzzle = h.store.get_puzzle(PuzzleId(1)).await.unwrap();
    assert_eq!(puzzle.status, PuzzleStatus::BeingWorked);
    assert!(puzzle.current_solvers.contains(&SolverId(10)));
    assert!(puzzle.solver_history.contains(&SolverId(10)));
    assert_eq!(puzzle.watermark(), Some(at(100)));
    assert_eq!(
        h.store.get_solver(SolverId(10)).await.unwrap().current_puzzle,
        Some(PuzzleId(1))
    );

    // An older edit shows up later; it is below the watermark
    h.documents.set(
        "doc-1",
        vec![EditEvent::new("alice", at(100)), EditEvent::new("bob", at(50))],
    );
    let report = h.poller.run_once().await.unwrap();
    assert_eq!(report.stats.recorded, 0);
    assert_eq!(h.store.activities_for(PuzzleId(1)).len(), 1);
    assert_eq!(
        h.store.get_solver(SolverId(11)).await.unwrap().current_puzzle,
        None
    );
    assert_eq!(h.stats.get(keys::LOOP_PUZZLE_COUNT), Some(2.0));
}

#[tokio::test]
async fn test_solver_follows_latest_document() {
    let h = hunt(at(300));
    h.documents.set("doc-1", vec![EditEvent::new("alice", at(100))]);
    h.poller.run_once().await.unwrap();

    h.documents.set("doc-2", vec![EditEvent::new("alice", at(150))]);
    h.poller.run_once().await.unwrap();

    let first = h.store.get_puzzle(PuzzleId(1)).await.unwrap();
    let second = h.store.get_puzzle(PuzzleId(2)).await.unwrap();
    assert!(first.current_solvers.is_empty());
    assert!(first.solver_history.contains(&SolverId(10)));
    assert!(second.current_solvers.contains(&SolverId(10)));
    assert_eq!(
        h.store.get_solver(SolverId(10)).await.unwrap().current_puzzle,
        Some(PuzzleId(2))
    );
}

#[tokio::test]
async fn test_unknown_editors_are_skipped() {
    let h = hunt(at(200));
    h.documents.set(
        "doc-2",
        vec![EditEvent::new("mallory", at(90)), EditEvent::new("bob", at(95))],
    );

    let report = h.poller.run_once().await.unwrap();
    assert_eq!(report.stats.recorded, 1);

    let puzzle = h.store.get_puzzle(PuzzleId(2)).await.unwrap();
    assert_eq!(puzzle.current_solvers.iter().copied().collect::<Vec<_>>(), vec![SolverId(11)]);
    assert_eq!(puzzle.watermark(), Some(at(95)));
}

#[tokio::test]
async fn test_concurrent_assignments_keep_one_puzzle_per_solver() {
    let store = Arc::new(InMemoryAssignmentStore::new());
    store.insert_round(Round::new(RoundId(1), "Ocean"));
    for id in 1..=4 {
        store.insert_puzzle(Puzzle::new(PuzzleId(id), format!("p{id}"), RoundId(1)));
    }
    store.insert_solver(Solver::new(SolverId(10), "alice"));

    let mut handles = Vec::new();
    for i in 0..40 {
        let store = Arc::clone(&store);
        let puzzle = PuzzleId(1 + (i % 4));
        handles.push(tokio::spawn(async move {
            store.assign(SolverId(10), puzzle).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let snapshot = store.snapshot().await.unwrap();
    let holding: Vec<_> = snapshot
        .puzzles
        .iter()
        .filter(|p| p.current_solvers.contains(&SolverId(10)))
        .map(|p| p.id)
        .collect();
    assert_eq!(holding.len(), 1);
    assert_eq!(
        store.get_solver(SolverId(10)).await.unwrap().current_puzzle,
        Some(holding[0])
    );
}

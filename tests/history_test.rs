//! Integration tests for the revision searcher and fault isolator against a
//! real temporary Git history. No external compiler needed — the probe reads
//! a marker file committed per revision.

mod common;

use std::sync::Arc;

use buildmend::isolate::{FaultIsolator, IsolationOutcome};
use buildmend::repo::RepoAdapter;
use buildmend::search::RevisionSearcher;

use common::{GitFixture, MarkerProbe};

fn adapter(fixture: &GitFixture) -> Arc<RepoAdapter> {
    Arc::new(RepoAdapter::new(fixture.path.clone(), fixture.scratch()))
}

// ─── Revision searcher ───────────────────────────────────────────────────────

#[tokio::test]
async fn searcher_probes_nearest_first_and_returns_first_clean() {
    let fixture = GitFixture::new();
    // rev-0 … rev-7 build, rev-8 … rev-10 are broken; HEAD is rev-10.
    let ids = fixture.marker_history(10, |i| {
        if i <= 7 {
            format!("rev-{i} ok")
        } else {
            format!("rev-{i} broken")
        }
    });

    let probe = Arc::new(MarkerProbe::new());
    let searcher = RevisionSearcher::new(adapter(&fixture), probe.clone());

    let found = searcher.find_last_good_revision(10).await.unwrap();
    assert_eq!(found.unwrap().id, ids[7]);

    // Nearest-first: rev-9 and rev-8 were probed (and failed) before rev-7.
    assert_eq!(
        probe.seen(),
        vec!["rev-9 broken", "rev-8 broken", "rev-7 ok"]
    );

    // The primary working tree is untouched and no checkout leaked.
    assert_eq!(fixture.head_id(), ids[10]);
    assert_eq!(fixture.read("build.marker").trim(), "rev-10 broken");
    assert_eq!(fixture.scratch_entries(), 0);
}

#[tokio::test]
async fn searcher_exhaustion_is_a_normal_outcome() {
    let fixture = GitFixture::new();
    fixture.marker_history(4, |i| format!("rev-{i} broken"));

    let probe = Arc::new(MarkerProbe::new());
    let searcher = RevisionSearcher::new(adapter(&fixture), probe.clone());

    let found = searcher.find_last_good_revision(3).await.unwrap();
    assert!(found.is_none());
    // Exactly max_depth probes, then stop.
    assert_eq!(probe.seen().len(), 3);
    assert_eq!(fixture.scratch_entries(), 0);
}

#[tokio::test]
async fn searcher_skips_candidates_whose_probe_crashes() {
    let fixture = GitFixture::new();
    // rev-1's probe crashes outright; rev-0 is good.
    let ids = fixture.marker_history(2, |i| match i {
        0 => "rev-0 ok".to_string(),
        1 => "rev-1 error".to_string(),
        _ => format!("rev-{i} broken"),
    });

    let probe = Arc::new(MarkerProbe::new());
    let searcher = RevisionSearcher::new(adapter(&fixture), probe.clone());

    let found = searcher.find_last_good_revision(5).await.unwrap();
    assert_eq!(found.unwrap().id, ids[0]);
    assert_eq!(probe.seen(), vec!["rev-1 error", "rev-0 ok"]);
    assert_eq!(fixture.scratch_entries(), 0);
}

// ─── Fault isolator ──────────────────────────────────────────────────────────

#[tokio::test]
async fn bisection_isolates_the_exact_faulty_revision() {
    let fixture = GitFixture::new();
    // rev-0 … rev-8 build; the fault lands at rev-9 and persists to rev-16.
    let ids = fixture.marker_history(16, |i| {
        if i <= 8 {
            format!("rev-{i} ok")
        } else {
            format!("rev-{i} broken")
        }
    });

    let probe = Arc::new(MarkerProbe::new());
    let isolator = FaultIsolator::new(adapter(&fixture), probe.clone());

    let outcome = isolator
        .isolate_fault(&ids[0], &ids[16], 50)
        .await
        .unwrap();

    let report = match outcome {
        IsolationOutcome::Isolated(report) => report,
        other => panic!("expected isolation, got {other:?}"),
    };

    assert_eq!(report.culprit.id, ids[9]);
    assert_eq!(report.culprit.author, "alice");
    assert!(report.verified, "parent clean + culprit dirty must re-verify");
    // 16 candidates → ⌈log2(16)⌉ = 4 narrowing probes; verification reuses
    // cached results, so at most one extra probe in total.
    assert!(report.iterations <= 4, "iterations = {}", report.iterations);
    assert!(
        probe.seen().len() <= 5,
        "probe invocations = {}",
        probe.seen().len()
    );
    assert_eq!(report.diff.files_changed, 1);

    // Working tree and scratch space untouched.
    assert_eq!(fixture.head_id(), ids[16]);
    assert_eq!(fixture.read("build.marker").trim(), "rev-16 broken");
    assert_eq!(fixture.scratch_entries(), 0);
}

#[tokio::test]
async fn bisection_narrowing_trail_is_strictly_shrinking() {
    let fixture = GitFixture::new();
    let ids = fixture.marker_history(16, |i| {
        if i <= 8 {
            format!("rev-{i} ok")
        } else {
            format!("rev-{i} broken")
        }
    });

    let probe = Arc::new(MarkerProbe::new());
    let isolator = FaultIsolator::new(adapter(&fixture), probe.clone());

    let outcome = isolator.isolate_fault(&ids[0], &ids[16], 50).await.unwrap();
    let IsolationOutcome::Isolated(report) = outcome else {
        panic!("expected isolation");
    };

    // Every narrowing step probed a distinct revision.
    let mut distinct: Vec<&str> = report.trail.iter().map(|t| t.revision.as_str()).collect();
    distinct.dedup();
    assert_eq!(distinct.len(), report.trail.len());
}

#[tokio::test]
async fn bisection_respects_the_iteration_cap() {
    let fixture = GitFixture::new();
    let ids = fixture.marker_history(16, |i| {
        if i <= 8 {
            format!("rev-{i} ok")
        } else {
            format!("rev-{i} broken")
        }
    });

    let probe = Arc::new(MarkerProbe::new());
    let isolator = FaultIsolator::new(adapter(&fixture), probe.clone());

    let outcome = isolator.isolate_fault(&ids[0], &ids[16], 2).await.unwrap();
    match outcome {
        IsolationOutcome::Inconclusive { iterations, trail } => {
            assert_eq!(iterations, 2);
            assert_eq!(trail.len(), 2);
        }
        other => panic!("expected inconclusive, got {other:?}"),
    }
    assert_eq!(fixture.scratch_entries(), 0);
}

#[tokio::test]
async fn empty_interval_is_inconclusive_without_probing() {
    let fixture = GitFixture::new();
    fixture.marker_history(3, |i| format!("rev-{i} ok"));
    let head = fixture.head_id();

    let probe = Arc::new(MarkerProbe::new());
    let isolator = FaultIsolator::new(adapter(&fixture), probe.clone());

    let outcome = isolator.isolate_fault(&head, &head, 50).await.unwrap();
    match outcome {
        IsolationOutcome::Inconclusive { iterations, .. } => assert_eq!(iterations, 0),
        other => panic!("expected inconclusive, got {other:?}"),
    }
    assert!(probe.seen().is_empty());
}

#[tokio::test]
async fn single_revision_interval_needs_no_narrowing() {
    let fixture = GitFixture::new();
    let ids = fixture.marker_history(3, |i| {
        if i <= 2 {
            format!("rev-{i} ok")
        } else {
            format!("rev-{i} broken")
        }
    });

    let probe = Arc::new(MarkerProbe::new());
    let isolator = FaultIsolator::new(adapter(&fixture), probe.clone());

    // Interval (rev-2, rev-3] holds exactly the culprit.
    let outcome = isolator.isolate_fault(&ids[2], &ids[3], 50).await.unwrap();
    let IsolationOutcome::Isolated(report) = outcome else {
        panic!("expected isolation");
    };
    assert_eq!(report.culprit.id, ids[3]);
    assert_eq!(report.iterations, 0);
    assert!(report.verified);
}

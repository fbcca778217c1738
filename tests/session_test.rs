//! Tests for session persistence and report export

mod common;

use common::{session, settings, SimulatedTarget};
use daedalus::engine::{AttackOutcome, Exploiter};
use daedalus::models::{Atom, EngagementReport, TemplateEnvironment};
use daedalus::oracle::classifier::MarkerClassifier;
use daedalus::oracle::retry::FakeClock;
use daedalus::report::json;
use daedalus::resolver::{CallTarget, Capability};
use daedalus::session::{Restore, Session};
use std::sync::Arc;

#[tokio::test]
async fn test_saved_facts_spare_probes_after_restore() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("session.json");
    let target = SimulatedTarget::new();
    target.block_chars("_");

    let first = session(&target, TemplateEnvironment::Jinja2);
    assert!(!first.oracle().is_allowed(&Atom::Char('_')).await);
    assert!(first.oracle().is_allowed(&Atom::Keyword("lipsum".to_string())).await);
    first.save(&file).unwrap();

    let second = session(&target, TemplateEnvironment::Jinja2);
    let restored = second.restore(&file).unwrap();

    assert_eq!(restored, Restore::Loaded(first.oracle().export_facts().len()));
    assert_eq!(second.oracle().export_facts(), first.oracle().export_facts());
    let requests = target.requests();
    assert!(!second.oracle().is_allowed(&Atom::Char('_')).await);
    assert!(second.oracle().is_allowed(&Atom::Char('l')).await);
    assert_eq!(target.requests(), requests);
}

#[tokio::test]
async fn test_restored_session_finds_same_payload_with_fewer_probes() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("session.json");
    let capability = Capability::Call(CallTarget::ShellCommand("id".to_string()));
    let target = SimulatedTarget::new();
    target.block_chars(".");

    let first = session(&target, TemplateEnvironment::Jinja2);
    let outcome = Exploiter::new(&first).exploit(&capability).await;
    let cold_probes = first.oracle().probe_count();
    first.save(&file).unwrap();

    let second = session(&target, TemplateEnvironment::Jinja2);
    second.restore(&file).unwrap();
    let warm = Exploiter::new(&second).exploit(&capability).await;

    assert_eq!(warm.payload(), outcome.payload());
    assert!(outcome.payload().is_some());
    // only the confirmation is sent again
    assert_eq!(second.oracle().probe_count(), 1);
    assert!(cold_probes > 1);
}

#[tokio::test]
async fn test_missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let target = SimulatedTarget::new();
    let session = session(&target, TemplateEnvironment::Jinja2);

    let restored = session.restore(&dir.path().join("absent.json")).unwrap();

    assert_eq!(restored, Restore::Missing);
}

#[tokio::test]
async fn test_corrupt_file_resets_knowledge() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("session.json");
    std::fs::write(&file, "{\"version\": 1, \"facts\": [").unwrap();
    let target = SimulatedTarget::new();
    let session = session(&target, TemplateEnvironment::Jinja2);
    session.oracle().learn(&Atom::Char('x')).await;

    let restored = session.restore(&file).unwrap();

    assert!(matches!(restored, Restore::Corrupt(_)));
    assert!(session.oracle().export_facts().is_empty());
}

#[tokio::test]
async fn test_unknown_atom_id_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("session.json");
    let target = SimulatedTarget::new();
    let session = session(&target, TemplateEnvironment::Jinja2);
    session.oracle().learn(&Atom::Char('x')).await;
    session.save(&file).unwrap();

    let tampered = std::fs::read_to_string(&file)
        .unwrap()
        .replace("char:x", "bogus:x");
    std::fs::write(&file, tampered).unwrap();

    let restored = session.restore(&file).unwrap();
    match restored {
        Restore::Corrupt(reason) => assert!(reason.contains("bogus:x"), "{reason}"),
        other => panic!("Expected corrupt, got {other:?}"),
    }
}

#[tokio::test]
async fn test_foreign_target_file_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("session.json");
    let target = SimulatedTarget::new();
    let original = session(&target, TemplateEnvironment::Jinja2);
    original.oracle().learn(&Atom::Char('x')).await;
    original.save(&file).unwrap();

    let other = Session::with_clock(
        "http://elsewhere.local/#q",
        target.clone(),
        Arc::new(MarkerClassifier::default()),
        Arc::new(FakeClock::new()),
        settings(TemplateEnvironment::Jinja2),
    );
    let restored = other.restore(&file).unwrap();

    assert_eq!(
        restored,
        Restore::ForeignTarget("http://simulated.local/#name".to_string())
    );
    assert!(other.oracle().export_facts().is_empty());
}

#[tokio::test]
async fn test_report_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("report.json");
    let target = SimulatedTarget::new();
    let session = session(&target, TemplateEnvironment::Jinja2);
    let capability = Capability::Literal("abc".to_string());

    let outcome = Exploiter::new(&session).exploit(&capability).await;
    let mut report = EngagementReport::new(session.target(), capability.to_string(), outcome);
    report.total_probes = session.oracle().probe_count();
    report.finish();
    json::export(&report, &file).unwrap();

    let loaded = json::load(&file).unwrap();
    assert_eq!(loaded.engagement_id, report.engagement_id);
    assert_eq!(loaded.outcome, report.outcome);
    assert!(loaded.finished_at.is_some());
    match loaded.outcome {
        AttackOutcome::Confirmed { payload, .. } => assert_eq!(payload, "{{'abc'}}"),
        other => panic!("Expected a confirmed payload, got {other:?}"),
    }
}

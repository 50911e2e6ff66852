//! End-to-end workflow tests
//!
//! Drive agreements through all eight steps against the in-memory and the
//! file-backed stores, with an in-process project intake on the receiving end.

use std::sync::Arc;

use agreement_flow::agreements::{AgreementScan, StepDataUpdate};
use agreement_flow::handoff::{HandoffEmitter, IntakeDelivery, RetryConfig};
use agreement_flow::{
    AgreementError, AgreementFilter, AgreementService, AgreementStatus, AgreementStore,
    FileSystemAgreementStore, InMemoryAgreementStore, InMemoryAttachmentService,
    InMemoryProjectIntake, NewAgreement, PageRequest, FINAL_STEP,
};
use chrono::NaiveDate;
use tempfile::TempDir;

struct Harness {
    service: Arc<AgreementService>,
    store: Arc<dyn AgreementStore>,
    intake: Arc<InMemoryProjectIntake>,
}

fn harness_with(store: Arc<dyn AgreementStore>) -> Harness {
    let intake = Arc::new(InMemoryProjectIntake::new());
    let emitter = HandoffEmitter::new(
        store.clone(),
        Arc::new(IntakeDelivery::new(intake.clone())),
        RetryConfig::default(),
    );
    let service = AgreementService::new(
        store.clone(),
        Arc::new(emitter),
        Arc::new(InMemoryAttachmentService::new()),
    );
    Harness {
        service: Arc::new(service),
        store,
        intake,
    }
}

fn in_memory_harness() -> Harness {
    harness_with(Arc::new(InMemoryAgreementStore::new()))
}

fn acme() -> NewAgreement {
    NewAgreement::new("Acme", "MSA", "Acme MSA")
        .with_period(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
        )
        .with_amount(1200.0)
}

/// Satisfy a step's gate and complete it
async fn pass_step(service: &AgreementService, id: uuid::Uuid, ordinal: u8) {
    match ordinal {
        2 | 6 | 7 | 8 => {
            service
                .upload_attachment(id, ordinal, b"document".to_vec(), &format!("step-{ordinal}.pdf"))
                .await
                .unwrap();
        }
        3 | 5 => {
            service
                .record_step(id, ordinal, StepDataUpdate::new().with_approval(true))
                .await
                .unwrap();
        }
        _ => {}
    }
    service.complete_step(id, ordinal).await.unwrap();
}

async fn walk_to(service: &AgreementService, id: uuid::Uuid, last: u8) {
    for ordinal in 1..=last {
        pass_step(service, id, ordinal).await;
    }
}

#[tokio::test]
async fn test_acme_agreement_runs_to_handoff() {
    let h = in_memory_harness();
    let record = h.service.create_agreement(acme()).await.unwrap();
    assert_eq!(record.current_step, 1);
    assert_eq!(record.status, AgreementStatus::Active);

    walk_to(&h.service, record.id, FINAL_STEP).await;

    let done = h.service.get_agreement(record.id).await.unwrap();
    assert_eq!(done.status, AgreementStatus::Completed);
    assert_eq!(done.current_step, FINAL_STEP);
    assert!(done.transferred);
    assert_eq!(done.completed_steps(), 8);
    done.check_invariants().unwrap();

    let projects = h.intake.projects().await;
    assert_eq!(projects.len(), 1);
    let project = &projects[0];
    assert_eq!(project.source_agreement_id, record.id);
    assert_eq!(project.name, "Acme MSA");
    assert_eq!(project.client, "Acme");
    assert_eq!(project.start_date, NaiveDate::from_ymd_opt(2025, 1, 1));
    assert_eq!(project.end_date, NaiveDate::from_ymd_opt(2025, 12, 31));
    assert!(project.description.contains("1200.00"));
    assert_eq!(done.handoff.project_id.as_deref(), Some(project.id.as_str()));
}

#[tokio::test]
async fn test_file_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let id = {
        let store = Arc::new(FileSystemAgreementStore::open(dir.path()).await.unwrap());
        let h = harness_with(store);
        let record = h.service.create_agreement(acme()).await.unwrap();
        walk_to(&h.service, record.id, 3).await;
        record.id
    };

    let store = Arc::new(FileSystemAgreementStore::open(dir.path()).await.unwrap());
    let h = harness_with(store);
    let reloaded = h.service.get_agreement(id).await.unwrap();
    assert_eq!(reloaded.current_step, 4);
    assert!(reloaded.step(3).completed);
    assert_eq!(reloaded.step(3).approved, Some(true));

    for ordinal in 4..=FINAL_STEP {
        pass_step(&h.service, id, ordinal).await;
    }
    assert!(h.service.get_agreement(id).await.unwrap().transferred);
    assert_eq!(h.intake.projects().await.len(), 1);
}

#[tokio::test]
async fn test_steps_complete_strictly_in_order() {
    let h = in_memory_harness();
    let record = h.service.create_agreement(acme()).await.unwrap();

    let err = h.service.complete_step(record.id, 5).await.unwrap_err();
    assert!(matches!(
        err,
        AgreementError::OutOfOrder { ordinal: 5, current_step: 1 }
    ));

    let err = h.service.complete_step(record.id, 0).await.unwrap_err();
    assert!(matches!(err, AgreementError::InvalidStep { ordinal: 0, .. }));
    let err = h.service.complete_step(record.id, 9).await.unwrap_err();
    assert!(matches!(err, AgreementError::InvalidStep { ordinal: 9, .. }));

    let unchanged = h.service.get_agreement(record.id).await.unwrap();
    assert_eq!(unchanged.current_step, 1);
    assert_eq!(unchanged.version, record.version);
}

#[tokio::test]
async fn test_gated_steps_refuse_completion_until_satisfied() {
    let h = in_memory_harness();
    let record = h.service.create_agreement(acme()).await.unwrap();
    h.service.complete_step(record.id, 1).await.unwrap();

    let err = h.service.complete_step(record.id, 2).await.unwrap_err();
    assert_eq!(err.code(), "INCOMPLETE_PRECONDITION");
    pass_step(&h.service, record.id, 2).await;

    // a rejection does not satisfy an approval step
    h.service
        .record_step(record.id, 3, StepDataUpdate::new().with_approval(false))
        .await
        .unwrap();
    let err = h.service.complete_step(record.id, 3).await.unwrap_err();
    assert!(matches!(err, AgreementError::IncompletePrecondition { ordinal: 3, .. }));

    h.service
        .record_step(record.id, 3, StepDataUpdate::new().with_approval(true))
        .await
        .unwrap();
    let advanced = h.service.complete_step(record.id, 3).await.unwrap();
    assert_eq!(advanced.current_step, 4);
}

#[tokio::test]
async fn test_repeated_completion_is_a_no_op() {
    let h = in_memory_harness();
    let record = h.service.create_agreement(acme()).await.unwrap();

    let first = h.service.complete_step(record.id, 1).await.unwrap();
    let again = h.service.complete_step(record.id, 1).await.unwrap();
    assert_eq!(first.version, again.version);
    assert_eq!(again.current_step, 2);
}

#[tokio::test]
async fn test_step_data_cannot_be_recorded_ahead() {
    let h = in_memory_harness();
    let record = h.service.create_agreement(acme()).await.unwrap();

    let err = h
        .service
        .record_step(record.id, 4, StepDataUpdate::new().with_notes("too early"))
        .await
        .unwrap_err();
    assert!(matches!(err, AgreementError::StepNotOpen { ordinal: 4, current_step: 1 }));

    let noted = h
        .service
        .record_step(record.id, 1, StepDataUpdate::new().with_notes("terms agreed"))
        .await
        .unwrap();
    assert_eq!(noted.step(1).notes.as_deref(), Some("terms agreed"));
}

#[tokio::test]
async fn test_concurrent_final_completion_hands_off_once() {
    let h = in_memory_harness();
    let record = h.service.create_agreement(acme()).await.unwrap();
    walk_to(&h.service, record.id, FINAL_STEP - 1).await;
    h.service
        .upload_attachment(record.id, FINAL_STEP, b"handover".to_vec(), "handover.pdf")
        .await
        .unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let service = h.service.clone();
            tokio::spawn(async move { service.complete_step(record.id, FINAL_STEP).await })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        let record = result.unwrap().unwrap();
        assert_eq!(record.status, AgreementStatus::Completed);
    }

    let done = h.store.get(record.id).await.unwrap();
    assert!(done.transferred);
    assert_eq!(done.completed_steps(), 8);
    assert_eq!(h.intake.projects().await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_updates_of_different_agreements() {
    let h = in_memory_harness();
    let mut ids = Vec::new();
    for i in 0..6 {
        let record = h
            .service
            .create_agreement(NewAgreement::new(format!("Client {i}"), "SOW", format!("SOW {i}")))
            .await
            .unwrap();
        ids.push(record.id);
    }

    let tasks: Vec<_> = ids
        .iter()
        .map(|&id| {
            let service = h.service.clone();
            tokio::spawn(async move { walk_to(&service, id, FINAL_STEP).await })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        result.unwrap();
    }

    assert_eq!(h.intake.projects().await.len(), 6);
    for id in ids {
        assert!(h.service.get_agreement(id).await.unwrap().transferred);
    }
}

#[tokio::test]
async fn test_discard_removes_agreement() {
    let h = in_memory_harness();
    let record = h.service.create_agreement(acme()).await.unwrap();

    assert!(h.service.discard_agreement(record.id).await.unwrap());
    assert!(!h.service.discard_agreement(record.id).await.unwrap());
    assert!(matches!(
        h.service.get_agreement(record.id).await,
        Err(AgreementError::NotFound(_))
    ));
    assert!(matches!(
        h.service.complete_step(record.id, 1).await,
        Err(AgreementError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_creation_requires_identifying_fields() {
    let h = in_memory_harness();
    let err = h
        .service
        .create_agreement(NewAgreement::new("  ", "MSA", "Untitled"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
}

#[tokio::test]
async fn test_listing_pages_through_every_agreement() {
    let h = in_memory_harness();
    let mut created = Vec::new();
    for i in 0..7 {
        let client = if i % 2 == 0 { "Acme" } else { "Globex" };
        let record = h
            .service
            .create_agreement(NewAgreement::new(client, "MSA", format!("Agreement {i}")))
            .await
            .unwrap();
        created.push(record.id);
    }

    let first = h
        .service
        .list_agreements(&AgreementFilter::all(), PageRequest::first(3))
        .await
        .unwrap();
    assert_eq!(first.records.len(), 3);
    assert!(first.next_cursor.is_some());

    let scanned = AgreementScan::new(h.store.as_ref(), AgreementFilter::all(), 3)
        .collect_all()
        .await
        .unwrap();
    let scanned_ids: Vec<_> = scanned.iter().map(|r| r.id).collect();
    assert_eq!(scanned_ids, created);

    let acme = AgreementFilter {
        client_name: Some("acme".to_string()),
        ..Default::default()
    };
    let acme_only = AgreementScan::new(h.store.as_ref(), acme, 2)
        .collect_all()
        .await
        .unwrap();
    assert_eq!(acme_only.len(), 4);
    assert!(acme_only.iter().all(|r| r.client_name == "Acme"));
}

#[tokio::test]
async fn test_scan_resumes_from_saved_cursor() {
    let h = in_memory_harness();
    for i in 0..5 {
        h.service
            .create_agreement(NewAgreement::new("Acme", "MSA", format!("Agreement {i}")))
            .await
            .unwrap();
    }

    let mut scan = AgreementScan::new(h.store.as_ref(), AgreementFilter::all(), 2);
    let first = scan.next_page().await.unwrap().unwrap();
    let cursor = scan.cursor().unwrap();

    let rest = AgreementScan::resume(h.store.as_ref(), AgreementFilter::all(), 2, cursor)
        .collect_all()
        .await
        .unwrap();
    assert_eq!(first.len() + rest.len(), 5);
    assert!(rest.iter().all(|r| !first.iter().any(|f| f.id == r.id)));
}

//! Key ceremony runs with in-process guardians.

use assert_matches::assert_matches;

use std::{sync::Arc, time::Duration};

use crate::{
    assert_ct_eq,
    faults::{CeremonyFault, FaultyCeremonyGuardian},
    guardian_ids, init_tracing, run_ceremony, TEST_TIMEOUT,
};
use guardian_ceremony::{
    ceremony::{CeremonyError, CeremonyState, KeyCeremony, RegistrationError},
    channel::{ChannelError, LocalKeyCeremonyGuardian},
    config::{CeremonyConfig, IdCollisionRule},
    group::{Group, Ristretto},
    guardian::GuardianError,
    record::{self, MemoryPublisher, MemoryTrusteeStore},
};

async fn test_joint_key<G: Group>(guardian_count: usize, quorum: usize) {
    let (result, store) = run_ceremony::<G>(guardian_count, quorum).await;
    assert_eq!(result.guardian_count, guardian_count);
    assert_eq!(result.quorum, quorum);
    result.verify().unwrap();

    let expected = result
        .guardians
        .iter()
        .fold(G::identity(), |acc, guardian| {
            acc + guardian.coefficient_commitments.value_at_zero()
        });
    assert_ct_eq(&result.joint_public_key.as_element(), &expected);

    let x_coordinates: Vec<_> = result.guardians.iter().map(|g| g.x_coordinate).collect();
    let expected_coordinates: Vec<_> = (1..=guardian_count as u32).collect();
    assert_eq!(x_coordinates, expected_coordinates);
    for guardian in &result.guardians {
        assert_eq!(guardian.coefficient_commitments.len(), quorum);
    }
    assert_eq!(store.guardian_ids(), guardian_ids(guardian_count));
}

#[tokio::test]
async fn joint_key_for_single_guardian() {
    init_tracing();
    test_joint_key::<Ristretto>(1, 1).await;
}

#[tokio::test]
async fn joint_key_without_threshold() {
    test_joint_key::<Ristretto>(2, 1).await;
    test_joint_key::<Ristretto>(3, 3).await;
}

#[tokio::test]
async fn joint_key_with_threshold() {
    for (guardian_count, quorum) in [(3, 2), (4, 3), (5, 3), (7, 4)] {
        test_joint_key::<Ristretto>(guardian_count, quorum).await;
    }
}

#[tokio::test]
async fn published_record_matches_result() {
    let config = CeremonyConfig::new(3, 2).unwrap();
    let publisher = Arc::new(MemoryPublisher::new());
    let ceremony = KeyCeremony::<Ristretto>::new(config)
        .unwrap()
        .with_publisher(publisher.clone());
    let store = Arc::new(MemoryTrusteeStore::<Ristretto>::new());
    for id in ["alice", "bob", "carol"] {
        ceremony
            .register(id, |registration| {
                Arc::new(LocalKeyCeremonyGuardian::<Ristretto>::new(registration, store.clone()))
            })
            .unwrap();
    }
    let result = ceremony.run().await.unwrap();

    let published = publisher
        .election_initialized::<Ristretto>()
        .unwrap()
        .expect("no record published");
    assert_eq!(published.key_ceremony.joint_public_key, result.joint_public_key);
    let published_ids: Vec<_> = published.key_ceremony.guardian_ids().collect();
    assert_eq!(published_ids, ["alice", "bob", "carol"]);
    assert_eq!(published.extended_base_hash.len(), 64);
    assert!(published.metadata.contains_key(record::CREATED_ON));
}

#[tokio::test]
async fn ceremony_waits_for_registrations() {
    let config = CeremonyConfig::new(2, 2)
        .unwrap()
        .with_rpc_timeout(TEST_TIMEOUT);
    let ceremony = Arc::new(KeyCeremony::<Ristretto>::new(config).unwrap());
    let store = Arc::new(MemoryTrusteeStore::<Ristretto>::new());

    let run = tokio::spawn({
        let ceremony = Arc::clone(&ceremony);
        async move { ceremony.run().await }
    });
    tokio::task::yield_now().await;
    assert_eq!(ceremony.state(), CeremonyState::Registering);

    for id in ["alice", "bob"] {
        ceremony
            .register(id, |registration| {
                Arc::new(LocalKeyCeremonyGuardian::<Ristretto>::new(registration, store.clone()))
            })
            .unwrap();
    }
    let result = run.await.unwrap().unwrap();
    assert_eq!(result.guardian_count, 2);
    assert_eq!(ceremony.state(), CeremonyState::Published);
}

#[test]
fn colliding_ids_are_rejected() {
    let config = CeremonyConfig::new(3, 2).unwrap();
    let ceremony = KeyCeremony::<Ristretto>::new(config).unwrap();
    let store = Arc::new(MemoryTrusteeStore::<Ristretto>::new());
    let connect = |registration: &_| {
        Arc::new(LocalKeyCeremonyGuardian::<Ristretto>::new(registration, store.clone()))
    };

    let registration = ceremony.register("g1", connect).unwrap();
    assert_eq!(registration.x_coordinate, 1);
    assert_matches!(
        ceremony.register("g1", connect),
        Err(RegistrationError::DuplicateId { existing, .. }) if existing == "g1"
    );
    assert_matches!(
        ceremony.register("G10", connect),
        Err(RegistrationError::DuplicateId { id, existing }) if id == "G10" && existing == "g1"
    );
    assert_matches!(ceremony.register("", connect), Err(RegistrationError::EmptyId));

    let registration = ceremony.register("g2", connect).unwrap();
    assert_eq!(registration.x_coordinate, 2);
    assert_eq!(ceremony.registered().len(), 2);
}

#[test]
fn exact_ids_allow_similar_names() {
    let config = CeremonyConfig::new(2, 1)
        .unwrap()
        .with_id_collision_rule(IdCollisionRule::Exact);
    let ceremony = KeyCeremony::<Ristretto>::new(config).unwrap();
    let store = Arc::new(MemoryTrusteeStore::<Ristretto>::new());
    let connect = |registration: &_| {
        Arc::new(LocalKeyCeremonyGuardian::<Ristretto>::new(registration, store.clone()))
    };

    ceremony.register("g1", connect).unwrap();
    ceremony.register("G10", connect).unwrap();
    let err = ceremony.register("g2", connect).unwrap_err();
    assert_eq!(err, RegistrationError::AlreadyStarted);
}

/// Registers guardians `guardian1..=guardian{n}`; the guardian at `faulty_index` is wrapped
/// with `fault`. Returns the ceremony and the wrapped local guardians.
fn faulty_ceremony(
    guardian_count: usize,
    quorum: usize,
    faulty_index: usize,
    fault: CeremonyFault,
) -> (KeyCeremony<Ristretto>, Vec<Arc<LocalKeyCeremonyGuardian<Ristretto>>>) {
    let config = CeremonyConfig::new(guardian_count, quorum)
        .unwrap()
        .with_rpc_timeout(TEST_TIMEOUT);
    let ceremony = KeyCeremony::<Ristretto>::new(config).unwrap();
    let store = Arc::new(MemoryTrusteeStore::<Ristretto>::new());

    let mut locals = vec![];
    for (i, id) in guardian_ids(guardian_count).into_iter().enumerate() {
        let mut local = None;
        if i == faulty_index {
            ceremony
                .register(&id, |registration| {
                    let inner =
                        LocalKeyCeremonyGuardian::<Ristretto>::new(registration, store.clone());
                    let inner = Arc::new(inner);
                    local = Some(Arc::clone(&inner));
                    Arc::new(FaultyCeremonyGuardian::new(inner, fault))
                })
                .unwrap();
        } else {
            ceremony
                .register(&id, |registration| {
                    let inner =
                        LocalKeyCeremonyGuardian::<Ristretto>::new(registration, store.clone());
                    let inner = Arc::new(inner);
                    local = Some(Arc::clone(&inner));
                    inner
                })
                .unwrap();
        }
        locals.extend(local);
    }
    (ceremony, locals)
}

fn assert_all_failed(locals: &[Arc<LocalKeyCeremonyGuardian<Ristretto>>]) {
    for local in locals {
        assert_eq!(local.finished(), Some(false), "{:?}", local.id());
        assert!(local.is_shut_down());
    }
}

#[tokio::test]
async fn invalid_coefficient_proofs_abort_ceremony() {
    init_tracing();
    let (ceremony, locals) = faulty_ceremony(4, 3, 2, CeremonyFault::ShuffledProofs);

    let err = ceremony.run().await.unwrap_err();
    assert_matches!(
        err,
        CeremonyError::InvalidPublicKeys {
            guardian,
            source: GuardianError::InvalidCoefficientProof { .. },
        } if guardian == "guardian3"
    );
    assert_eq!(ceremony.state(), CeremonyState::Failed);
    assert_all_failed(&locals);
}

#[tokio::test]
async fn guardian_error_aborts_ceremony() {
    let (ceremony, locals) = faulty_ceremony(3, 2, 0, CeremonyFault::RefuseShares);

    let err = ceremony.run().await.unwrap_err();
    assert_matches!(
        err,
        CeremonyError::Channel { guardian, source: ChannelError::Remote(_), .. }
            if guardian == "guardian1"
    );
    assert_eq!(ceremony.state(), CeremonyState::Failed);
    assert_all_failed(&locals);
}

#[tokio::test]
async fn share_with_forged_origin_aborts_ceremony() {
    let (ceremony, locals) = faulty_ceremony(3, 2, 1, CeremonyFault::ForgedShareOrigin);

    let err = ceremony.run().await.unwrap_err();
    assert_matches!(
        err,
        CeremonyError::IdentityMismatch { expected, actual }
            if expected.id == "guardian2" && actual.id == "mallory"
    );
    assert_all_failed(&locals);
}

#[tokio::test]
async fn failed_save_aborts_ceremony() {
    let (ceremony, locals) = faulty_ceremony(3, 2, 2, CeremonyFault::FailSave);
    let publisher = Arc::new(MemoryPublisher::new());
    let ceremony = ceremony.with_publisher(publisher.clone());

    let err = ceremony.run().await.unwrap_err();
    assert_matches!(
        err,
        CeremonyError::Channel { guardian, source: ChannelError::Remote(message), .. }
            if guardian == "guardian3" && message == "disk full"
    );
    assert_eq!(ceremony.state(), CeremonyState::Failed);
    assert!(publisher
        .election_initialized::<Ristretto>()
        .unwrap()
        .is_none());
    assert_all_failed(&locals);
}

#[tokio::test(start_paused = true)]
async fn hanging_guardian_times_out() {
    let (ceremony, locals) = faulty_ceremony(3, 2, 1, CeremonyFault::HangOnPublicKeys);

    let err = ceremony.run().await.unwrap_err();
    assert_matches!(
        err,
        CeremonyError::Channel { guardian, source: ChannelError::Timeout(timeout), .. }
            if guardian == "guardian2" && timeout == TEST_TIMEOUT
    );
    assert_eq!(ceremony.state(), CeremonyState::Failed);
    assert_all_failed(&locals);
}

#[tokio::test(start_paused = true)]
async fn ceremony_without_guardians_never_starts() {
    let config = CeremonyConfig::new(2, 1).unwrap();
    let ceremony = KeyCeremony::<Ristretto>::new(config).unwrap();
    let run = tokio::time::timeout(Duration::from_secs(3_600), ceremony.run()).await;
    assert!(run.is_err());
    assert_eq!(ceremony.state(), CeremonyState::Registering);
}

//! Threshold and compensated decryption after a key ceremony.

use assert_matches::assert_matches;
use rand::thread_rng;

use std::sync::Arc;

use crate::{
    faults::{DecryptionFault, FaultyDecryptingGuardian},
    guardian_ids, init_tracing, run_ceremony, TEST_TIMEOUT,
};
use guardian_ceremony::{
    ceremony::RegistrationError,
    channel::{ChannelError, DecryptingChannel, LocalDecryptingGuardian},
    config::DecryptionConfig,
    decrypt::{
        ContributionKind, DecryptionError, DecryptionResult, Decryptor, EncryptedBallot,
        EncryptedTally, ItemError, ItemRef,
    },
    group::Ristretto,
    record::{KeyCeremonyResult, MemoryPublisher, MemoryTrusteeStore},
};

const MAX_PLAINTEXT: u64 = 100;

struct Rig {
    key_ceremony: KeyCeremonyResult<Ristretto>,
    store: Arc<MemoryTrusteeStore<Ristretto>>,
}

impl Rig {
    async fn new(guardian_count: usize, quorum: usize) -> Self {
        let (key_ceremony, store) = run_ceremony::<Ristretto>(guardian_count, quorum).await;
        Self {
            key_ceremony,
            store,
        }
    }

    fn tally(&self, values: &[u64]) -> EncryptedTally<Ristretto> {
        EncryptedTally {
            tally_id: "tally".to_owned(),
            ciphertexts: self.encrypt(values),
        }
    }

    fn encrypt(&self, values: &[u64]) -> Vec<guardian_ceremony::Ciphertext<Ristretto>> {
        let mut rng = thread_rng();
        let key = &self.key_ceremony.joint_public_key;
        values.iter().map(|&value| key.encrypt(value, &mut rng)).collect()
    }

    fn config(&self, navailable: usize) -> DecryptionConfig {
        let mut config = DecryptionConfig::new(navailable).with_rpc_timeout(TEST_TIMEOUT);
        config.max_plaintext = MAX_PLAINTEXT;
        config
    }

    fn decryptor(&self, navailable: usize) -> Decryptor<Ristretto> {
        Decryptor::new(self.key_ceremony.clone(), self.config(navailable)).unwrap()
    }

    fn local(&self, id: &str) -> Arc<LocalDecryptingGuardian<Ristretto>> {
        Arc::new(LocalDecryptingGuardian::load(self.store.as_ref(), id).unwrap())
    }

    fn register<C>(&self, decryptor: &Decryptor<Ristretto>, id: &str, channel: Arc<C>)
    where
        C: DecryptingChannel<Ristretto> + 'static,
    {
        let record = self.key_ceremony.guardian(id).unwrap();
        decryptor
            .register(id, record.x_coordinate, &record.election_public_key(), channel)
            .unwrap();
    }

    /// Registers well-behaved guardians with the specified ids.
    fn register_all(
        &self,
        decryptor: &Decryptor<Ristretto>,
        ids: &[&str],
    ) -> Vec<Arc<LocalDecryptingGuardian<Ristretto>>> {
        ids.iter()
            .map(|&id| {
                let local = self.local(id);
                self.register(decryptor, id, Arc::clone(&local));
                local
            })
            .collect()
    }

    /// Registers `ids`, wrapping the guardian `faulty_id` with `fault`.
    fn register_with_fault(
        &self,
        decryptor: &Decryptor<Ristretto>,
        ids: &[&str],
        faulty_id: &str,
        fault: DecryptionFault,
    ) -> Vec<Arc<LocalDecryptingGuardian<Ristretto>>> {
        ids.iter()
            .map(|&id| {
                let local = self.local(id);
                if id == faulty_id {
                    let faulty = FaultyDecryptingGuardian::new(Arc::clone(&local), fault);
                    self.register(decryptor, id, Arc::new(faulty));
                } else {
                    self.register(decryptor, id, Arc::clone(&local));
                }
                local
            })
            .collect()
    }
}

fn assert_finished(locals: &[Arc<LocalDecryptingGuardian<Ristretto>>], all_ok: bool) {
    for local in locals {
        assert_eq!(local.finished(), Some(all_ok));
        assert!(local.is_shut_down());
    }
}

fn non_fatal_errors(result: &DecryptionResult) -> Vec<&ItemError> {
    result
        .issues
        .iter()
        .filter(|issue| !issue.fatal)
        .map(|issue| &issue.error)
        .collect()
}

#[tokio::test]
async fn five_guardians_then_two_missing() {
    init_tracing();
    let rig = Rig::new(5, 3).await;
    let tally = rig.tally(&[42, 0, 7, MAX_PLAINTEXT]);

    let ids = guardian_ids(5);
    let ids: Vec<_> = ids.iter().map(String::as_str).collect();
    let decryptor = rig.decryptor(5);
    let locals = rig.register_all(&decryptor, &ids);
    let result = decryptor.decrypt(&tally, &[]).await.unwrap();
    assert!(result.is_complete(), "{:?}", result.issues);
    assert_eq!(result.tally, [Some(42), Some(0), Some(7), Some(MAX_PLAINTEXT)]);
    assert!(result.missing_guardians.is_empty());
    assert_finished(&locals, true);

    let publisher = Arc::new(MemoryPublisher::new());
    let decryptor = rig.decryptor(3).with_publisher(publisher.clone());
    let locals = rig.register_all(&decryptor, &["guardian1", "guardian2", "guardian3"]);
    assert_eq!(decryptor.missing_guardians(), ["guardian4", "guardian5"]);

    let result = decryptor.decrypt(&tally, &[]).await.unwrap();
    assert!(result.is_complete(), "{:?}", result.issues);
    assert!(result.issues.is_empty(), "{:?}", result.issues);
    assert_eq!(result.tally, [Some(42), Some(0), Some(7), Some(MAX_PLAINTEXT)]);
    assert_eq!(result.decrypting_guardians, ["guardian1", "guardian2", "guardian3"]);
    assert_eq!(result.missing_guardians, ["guardian4", "guardian5"]);
    assert_finished(&locals, true);

    let records = publisher.decryptions().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tally, result.tally);
    assert_eq!(records[0].missing_guardians, result.missing_guardians);
}

#[tokio::test]
async fn every_quorum_of_guardians_decrypts() {
    let rig = Rig::new(5, 3).await;
    let ids = guardian_ids(5);
    let tally = rig.tally(&[42, 13]);

    let mut subsets = 0;
    for i in 0..5 {
        for j in (i + 1)..5 {
            for k in (j + 1)..5 {
                let present = [ids[i].as_str(), ids[j].as_str(), ids[k].as_str()];
                let decryptor = rig.decryptor(3);
                rig.register_all(&decryptor, &present);

                let result = decryptor.decrypt(&tally, &[]).await.unwrap();
                assert_eq!(result.tally, [Some(42), Some(13)], "present: {present:?}");
                assert_eq!(result.missing_guardians.len(), 2);
                subsets += 1;
            }
        }
    }
    assert_eq!(subsets, 10);
}

#[tokio::test]
async fn all_guardians_present() {
    let rig = Rig::new(4, 2).await;
    let ids = guardian_ids(4);
    let ids: Vec<_> = ids.iter().map(String::as_str).collect();
    let decryptor = rig.decryptor(4);
    let locals = rig.register_all(&decryptor, &ids);

    let result = decryptor.decrypt(&rig.tally(&[3, 1, 4, 1, 5]), &[]).await.unwrap();
    assert_eq!(result.tally, [Some(3), Some(1), Some(4), Some(1), Some(5)]);
    assert!(result.missing_guardians.is_empty());
    assert_finished(&locals, true);
}

#[tokio::test]
async fn navailable_outside_bounds_is_rejected() {
    let rig = Rig::new(5, 3).await;
    for navailable in [0, 2, 6] {
        let err = Decryptor::new(rig.key_ceremony.clone(), rig.config(navailable)).unwrap_err();
        assert_matches!(
            err,
            DecryptionError::QuorumViolation { navailable: n, quorum: 3, guardian_count: 5 }
                if n == navailable
        );
    }
}

#[tokio::test]
async fn registration_is_checked_against_key_ceremony() {
    let rig = Rig::new(3, 2).await;
    let decryptor = rig.decryptor(2);
    let local = rig.local("guardian1");
    let record = rig.key_ceremony.guardian("guardian1").unwrap();
    let other_key = rig.key_ceremony.guardian("guardian2").unwrap().election_public_key();

    let err = decryptor
        .register("guardian1", 7, &record.election_public_key(), Arc::clone(&local))
        .unwrap_err();
    assert_matches!(err, RegistrationError::RecordMismatch { mismatch: "x-coordinate", .. });
    let err = decryptor
        .register("guardian1", record.x_coordinate, &other_key, Arc::clone(&local))
        .unwrap_err();
    assert_matches!(err, RegistrationError::RecordMismatch { mismatch: "election public key", .. });
    let err = decryptor
        .register("mallory", 9, &other_key, Arc::clone(&local))
        .unwrap_err();
    assert_eq!(err, RegistrationError::UnknownGuardian("mallory".to_owned()));

    rig.register(&decryptor, "guardian1", Arc::clone(&local));
    let err = decryptor
        .register("GUARDIAN1", record.x_coordinate, &record.election_public_key(), local)
        .unwrap_err();
    assert_matches!(err, RegistrationError::DuplicateId { .. });
    assert_eq!(decryptor.registered(), ["guardian1"]);
}

#[tokio::test]
async fn spoiled_ballots_are_decrypted_when_enabled() {
    let rig = Rig::new(3, 2).await;
    let tally = rig.tally(&[2, 1]);
    let spoiled = vec![
        EncryptedBallot {
            ballot_id: "ballot-a".to_owned(),
            ciphertexts: rig.encrypt(&[1, 0]),
        },
        EncryptedBallot {
            ballot_id: "ballot-b".to_owned(),
            ciphertexts: rig.encrypt(&[0, 1]),
        },
    ];

    let decryptor =
        Decryptor::new(rig.key_ceremony.clone(), rig.config(2).with_spoiled(true)).unwrap();
    rig.register_all(&decryptor, &["guardian2", "guardian3"]);
    let result = decryptor.decrypt(&tally, &spoiled).await.unwrap();
    assert_eq!(result.tally, [Some(2), Some(1)]);
    assert_eq!(result.spoiled_ballots.len(), 2);
    assert_eq!(result.spoiled_ballots["ballot-a"], [Some(1), Some(0)]);
    assert_eq!(result.spoiled_ballots["ballot-b"], [Some(0), Some(1)]);

    let decryptor = rig.decryptor(2);
    rig.register_all(&decryptor, &["guardian2", "guardian3"]);
    let result = decryptor.decrypt(&tally, &spoiled).await.unwrap();
    assert_eq!(result.tally, [Some(2), Some(1)]);
    assert!(result.spoiled_ballots.is_empty());
}

#[tokio::test]
async fn tampered_direct_decryption_is_compensated() {
    let rig = Rig::new(5, 3).await;
    let decryptor = rig.decryptor(4);
    let ids = ["guardian1", "guardian2", "guardian3", "guardian4"];
    let locals =
        rig.register_with_fault(&decryptor, &ids, "guardian2", DecryptionFault::TamperDirect);

    let result = decryptor.decrypt(&rig.tally(&[42, 5]), &[]).await.unwrap();
    assert_eq!(result.tally, [Some(42), Some(5)]);
    assert_eq!(result.missing_guardians, ["guardian5"]);
    assert_eq!(result.failures().count(), 0);

    let errors = non_fatal_errors(&result);
    assert_eq!(errors.len(), 2);
    for error in errors {
        assert_matches!(
            error,
            ItemError::InvalidDirectDecryption { guardian, .. } if guardian == "guardian2"
        );
    }
    assert_finished(&locals, true);
}

#[tokio::test]
async fn tampered_direct_decryption_without_spare_guardian() {
    let rig = Rig::new(5, 3).await;
    let decryptor = rig.decryptor(3);
    let ids = ["guardian1", "guardian2", "guardian3"];
    let locals =
        rig.register_with_fault(&decryptor, &ids, "guardian3", DecryptionFault::TamperDirect);

    let result = decryptor.decrypt(&rig.tally(&[42]), &[]).await.unwrap();
    assert!(!result.is_complete());
    assert_eq!(result.tally, [None]);

    let failures: Vec<_> = result.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].item, Some(ItemRef::Tally(0)));
    assert_matches!(
        &failures[0].error,
        ItemError::InsufficientContributions { kind: ContributionKind::Direct, valid: 2, quorum: 3 }
    );
    assert_finished(&locals, false);
}

#[tokio::test]
async fn tampered_compensated_decryption_is_dropped() {
    let rig = Rig::new(5, 3).await;
    let decryptor = rig.decryptor(4);
    let ids = ["guardian1", "guardian2", "guardian3", "guardian4"];
    let locals =
        rig.register_with_fault(&decryptor, &ids, "guardian1", DecryptionFault::TamperCompensated);

    let result = decryptor.decrypt(&rig.tally(&[17]), &[]).await.unwrap();
    assert_eq!(result.tally, [Some(17)]);
    let errors = non_fatal_errors(&result);
    assert_eq!(errors.len(), 1);
    assert_matches!(
        errors[0],
        ItemError::InvalidCompensatedDecryption { guardian, missing, .. }
            if guardian == "guardian1" && missing == "guardian5"
    );
    assert_finished(&locals, true);
}

#[tokio::test]
async fn tampered_compensation_below_quorum_fails() {
    let rig = Rig::new(5, 3).await;
    let decryptor = rig.decryptor(3);
    let ids = ["guardian1", "guardian2", "guardian3"];
    let locals =
        rig.register_with_fault(&decryptor, &ids, "guardian2", DecryptionFault::TamperCompensated);

    let result = decryptor.decrypt(&rig.tally(&[17]), &[]).await.unwrap();
    assert_eq!(result.tally, [None]);
    let failures: Vec<_> = result.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_matches!(
        &failures[0].error,
        ItemError::InsufficientContributions {
            kind: ContributionKind::CompensatingFor(missing),
            valid: 2,
            quorum: 3,
        } if missing == "guardian4"
    );
    assert_finished(&locals, false);
}

#[tokio::test]
async fn truncated_response_is_dropped() {
    let rig = Rig::new(4, 2).await;
    let decryptor = rig.decryptor(3);
    let ids = ["guardian1", "guardian2", "guardian3"];
    let locals =
        rig.register_with_fault(&decryptor, &ids, "guardian3", DecryptionFault::TruncateDirect);

    let result = decryptor.decrypt(&rig.tally(&[1, 2, 3]), &[]).await.unwrap();
    assert_eq!(result.tally, [Some(1), Some(2), Some(3)]);
    let issue = result.issues.iter().find(|issue| issue.item.is_none()).unwrap();
    assert!(!issue.fatal);
    assert_matches!(
        &issue.error,
        ItemError::ResponseLength { guardian, expected: 3, actual: 2 } if guardian == "guardian3"
    );
    assert_finished(&locals, true);
}

#[tokio::test(start_paused = true)]
async fn hanging_guardian_times_out() {
    let rig = Rig::new(3, 2).await;
    let decryptor = rig.decryptor(2);
    let ids = ["guardian1", "guardian3"];
    let locals =
        rig.register_with_fault(&decryptor, &ids, "guardian1", DecryptionFault::HangOnDirect);

    let result = decryptor.decrypt(&rig.tally(&[9]), &[]).await.unwrap();
    assert_eq!(result.tally, [None]);
    let timeout = result
        .issues
        .iter()
        .find(|issue| issue.item.is_none())
        .unwrap();
    assert_matches!(
        &timeout.error,
        ItemError::Channel { guardian, source: ChannelError::Timeout(_), .. }
            if guardian == "guardian1"
    );
    assert_eq!(result.failures().count(), 1);
    assert_finished(&locals, false);
}

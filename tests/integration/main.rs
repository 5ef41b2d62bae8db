//! Integration tests for the key ceremony and decryption coordinators.

use subtle::ConstantTimeEq;
use tracing_subscriber::EnvFilter;

use std::{fmt, sync::Arc, time::Duration};

use guardian_ceremony::{
    ceremony::KeyCeremony,
    channel::LocalKeyCeremonyGuardian,
    config::CeremonyConfig,
    group::Group,
    record::{KeyCeremonyResult, MemoryTrusteeStore},
};

mod ceremony;
mod decryption;
mod faults;

pub fn assert_ct_eq<T: ConstantTimeEq + fmt::Debug>(x: &T, y: &T) {
    assert!(
        bool::from(x.ct_eq(y)),
        "Values are not equal: {:?}, {:?}",
        x,
        y
    );
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

pub fn guardian_ids(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("guardian{i}")).collect()
}

/// Runs a successful ceremony with in-process guardians named `guardian1`, `guardian2`, ….
pub async fn run_ceremony<G: Group>(
    guardian_count: usize,
    quorum: usize,
) -> (KeyCeremonyResult<G>, Arc<MemoryTrusteeStore<G>>) {
    let config = CeremonyConfig::new(guardian_count, quorum)
        .unwrap()
        .with_rpc_timeout(TEST_TIMEOUT);
    let ceremony = KeyCeremony::<G>::new(config).unwrap();
    let store = Arc::new(MemoryTrusteeStore::<G>::new());
    for id in guardian_ids(guardian_count) {
        ceremony
            .register(&id, |registration| {
                Arc::new(LocalKeyCeremonyGuardian::<G>::new(registration, store.clone()))
            })
            .unwrap();
    }
    let result = ceremony.run().await.unwrap();
    (result, store)
}

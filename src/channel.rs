//! Capabilities the coordinators use to talk to guardians.
//!
//! Coordinators never hold guardian secrets; they only call these traits. A remote
//! implementation forwards the calls over a transport, while [`LocalKeyCeremonyGuardian`]
//! and [`LocalDecryptingGuardian`] wrap guardian state machines living in the same process.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand_chacha::ChaChaRng;
use rand_core::SeedableRng;
use thiserror::Error;
use tracing::{debug, info};

use std::{future::Future, sync::Arc, time::Duration};

use crate::{
    ceremony::Registration,
    decryption::{CompensatedDecryptionAndProof, DirectDecryptionAndProof},
    group::Group,
    guardian::{
        DecryptingGuardian, DecryptingTrustee, GuardianError, GuardianId, KeyCeremonyGuardian,
        PublicKeys, SecretKeyShare,
    },
    record::TrusteeStore,
    Ciphertext,
};

/// Errors of a single guardian call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ChannelError {
    /// The guardian did not answer in time.
    #[error("guardian did not respond within {0:?}")]
    Timeout(Duration),
    /// The guardian answered with an error.
    #[error("guardian reported an error: {0}")]
    Remote(String),
    /// The guardian answered with a malformed response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// The channel was shut down.
    #[error("channel is shut down")]
    Closed,
}

impl From<GuardianError> for ChannelError {
    fn from(err: GuardianError) -> Self {
        Self::Remote(err.to_string())
    }
}

/// Runs a guardian call, failing it with [`ChannelError::Timeout`] if it does not
/// complete within `timeout`.
pub(crate) async fn call_with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, ChannelError>>,
) -> Result<T, ChannelError> {
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(ChannelError::Timeout(timeout)))
}

/// Guardian as seen by the key ceremony coordinator.
#[async_trait]
pub trait KeyCeremonyChannel<G: Group>: Send + Sync {
    /// Requests public keys of the guardian.
    async fn send_public_keys(&self) -> Result<PublicKeys<G>, ChannelError>;

    /// Delivers public keys of another guardian.
    async fn receive_public_keys(&self, keys: PublicKeys<G>) -> Result<(), ChannelError>;

    /// Requests a secret key share for the guardian `designated_id`.
    async fn send_secret_key_share(
        &self,
        designated_id: &str,
    ) -> Result<SecretKeyShare<G>, ChannelError>;

    /// Delivers a secret key share generated by another guardian.
    async fn receive_secret_key_share(&self, share: SecretKeyShare<G>) -> Result<(), ChannelError>;

    /// Asks the guardian to persist the state it needs for decryption.
    async fn save_state(&self) -> Result<(), ChannelError>;

    /// Notifies the guardian about the outcome of the ceremony.
    async fn finish(&self, all_ok: bool) -> Result<(), ChannelError>;

    /// Releases transport resources. The channel must not be used afterwards.
    async fn shutdown(&self) {}
}

/// Guardian as seen by the decryption coordinator.
#[async_trait]
pub trait DecryptingChannel<G: Group>: Send + Sync {
    /// Requests partial decryptions of `ciphertexts` with the guardian's own key.
    async fn direct_decrypt(
        &self,
        ciphertexts: &[Ciphertext<G>],
        extended_base_hash: &[u8; 32],
    ) -> Result<Vec<DirectDecryptionAndProof<G>>, ChannelError>;

    /// Requests partial decryptions of `ciphertexts` on behalf of `missing_guardian_id`.
    async fn compensated_decrypt(
        &self,
        missing_guardian_id: &str,
        ciphertexts: &[Ciphertext<G>],
        extended_base_hash: &[u8; 32],
    ) -> Result<Vec<CompensatedDecryptionAndProof<G>>, ChannelError>;

    /// Notifies the guardian about the outcome of decryption.
    async fn finish(&self, all_ok: bool) -> Result<(), ChannelError>;

    /// Releases transport resources. The channel must not be used afterwards.
    async fn shutdown(&self) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Lifecycle {
    finished: Option<bool>,
    shut_down: bool,
}

impl Lifecycle {
    fn check_open(self) -> Result<(), ChannelError> {
        if self.shut_down {
            Err(ChannelError::Closed)
        } else {
            Ok(())
        }
    }
}

struct LocalCeremonyState<G: Group> {
    guardian: KeyCeremonyGuardian<G>,
    rng: ChaChaRng,
    lifecycle: Lifecycle,
}

/// In-process guardian taking part in the key ceremony.
pub struct LocalKeyCeremonyGuardian<G: Group> {
    id: GuardianId,
    state: Mutex<LocalCeremonyState<G>>,
    store: Arc<dyn TrusteeStore<G>>,
}

impl<G: Group> std::fmt::Debug for LocalKeyCeremonyGuardian<G> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("LocalKeyCeremonyGuardian")
            .field("id", &self.id)
            .field("lifecycle", &self.state.lock().lifecycle)
            .finish_non_exhaustive()
    }
}

impl<G: Group> LocalKeyCeremonyGuardian<G> {
    /// Creates a guardian for the specified registration. The guardian state is saved
    /// to `store` on [`KeyCeremonyChannel::save_state()`].
    pub fn new(registration: &Registration, store: Arc<dyn TrusteeStore<G>>) -> Self {
        Self::with_rng(registration, store, ChaChaRng::from_entropy())
    }

    /// Same as [`Self::new()`], but with the specified RNG.
    pub fn with_rng(
        registration: &Registration,
        store: Arc<dyn TrusteeStore<G>>,
        mut rng: ChaChaRng,
    ) -> Self {
        let id = registration.identity();
        let guardian = KeyCeremonyGuardian::new(id.clone(), registration.quorum, &mut rng);
        Self {
            id,
            state: Mutex::new(LocalCeremonyState {
                guardian,
                rng,
                lifecycle: Lifecycle::default(),
            }),
            store,
        }
    }

    /// Returns the identity of this guardian.
    pub fn id(&self) -> &GuardianId {
        &self.id
    }

    /// Returns the ceremony outcome reported via [`KeyCeremonyChannel::finish()`],
    /// or `None` if it was not reported yet.
    pub fn finished(&self) -> Option<bool> {
        self.state.lock().lifecycle.finished
    }

    /// Checks whether the channel was shut down.
    pub fn is_shut_down(&self) -> bool {
        self.state.lock().lifecycle.shut_down
    }
}

#[async_trait]
impl<G: Group> KeyCeremonyChannel<G> for LocalKeyCeremonyGuardian<G> {
    async fn send_public_keys(&self) -> Result<PublicKeys<G>, ChannelError> {
        let state = self.state.lock();
        state.lifecycle.check_open()?;
        Ok(state.guardian.public_keys())
    }

    async fn receive_public_keys(&self, keys: PublicKeys<G>) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        state.lifecycle.check_open()?;
        state.guardian.receive_public_keys(keys)?;
        Ok(())
    }

    async fn send_secret_key_share(
        &self,
        designated_id: &str,
    ) -> Result<SecretKeyShare<G>, ChannelError> {
        let mut state = self.state.lock();
        state.lifecycle.check_open()?;
        let LocalCeremonyState { guardian, rng, .. } = &mut *state;
        Ok(guardian.secret_key_share_for(designated_id, rng)?)
    }

    async fn receive_secret_key_share(&self, share: SecretKeyShare<G>) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        state.lifecycle.check_open()?;
        state.guardian.receive_secret_key_share(share)?;
        Ok(())
    }

    async fn save_state(&self) -> Result<(), ChannelError> {
        let trustee = {
            let state = self.state.lock();
            state.lifecycle.check_open()?;
            state.guardian.decrypting_trustee()?
        };
        self.store
            .save(&trustee)
            .map_err(|err| ChannelError::Remote(err.to_string()))?;
        debug!(guardian = %self.id.id, "saved decrypting trustee state");
        Ok(())
    }

    async fn finish(&self, all_ok: bool) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        state.lifecycle.check_open()?;
        state.lifecycle.finished = Some(all_ok);
        info!(guardian = %self.id.id, all_ok, "key ceremony finished");
        Ok(())
    }

    async fn shutdown(&self) {
        self.state.lock().lifecycle.shut_down = true;
    }
}

/// In-process guardian taking part in decryption.
#[derive(Debug)]
pub struct LocalDecryptingGuardian<G: Group> {
    guardian: DecryptingGuardian<G>,
    rng: Mutex<ChaChaRng>,
    lifecycle: Mutex<Lifecycle>,
}

impl<G: Group> LocalDecryptingGuardian<G> {
    /// Creates a guardian from the state saved at the end of the key ceremony.
    pub fn new(trustee: DecryptingTrustee<G>) -> Self {
        Self {
            guardian: DecryptingGuardian::from(trustee),
            rng: Mutex::new(ChaChaRng::from_entropy()),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Loads the guardian state from `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read or is absent.
    pub fn load(store: &dyn TrusteeStore<G>, guardian_id: &str) -> Result<Self, ChannelError> {
        let trustee = store
            .load(guardian_id)
            .map_err(|err| ChannelError::Remote(err.to_string()))?
            .ok_or_else(|| GuardianError::UnknownGuardian(guardian_id.to_owned()))?;
        Ok(Self::new(trustee))
    }

    /// Returns the underlying guardian.
    pub fn guardian(&self) -> &DecryptingGuardian<G> {
        &self.guardian
    }

    /// Returns the decryption outcome reported via [`DecryptingChannel::finish()`],
    /// or `None` if it was not reported yet.
    pub fn finished(&self) -> Option<bool> {
        self.lifecycle.lock().finished
    }

    /// Checks whether the channel was shut down.
    pub fn is_shut_down(&self) -> bool {
        self.lifecycle.lock().shut_down
    }
}

#[async_trait]
impl<G: Group> DecryptingChannel<G> for LocalDecryptingGuardian<G> {
    async fn direct_decrypt(
        &self,
        ciphertexts: &[Ciphertext<G>],
        extended_base_hash: &[u8; 32],
    ) -> Result<Vec<DirectDecryptionAndProof<G>>, ChannelError> {
        self.lifecycle.lock().check_open()?;
        let mut rng = self.rng.lock();
        Ok(self
            .guardian
            .direct_decrypt(ciphertexts, extended_base_hash, &mut *rng))
    }

    async fn compensated_decrypt(
        &self,
        missing_guardian_id: &str,
        ciphertexts: &[Ciphertext<G>],
        extended_base_hash: &[u8; 32],
    ) -> Result<Vec<CompensatedDecryptionAndProof<G>>, ChannelError> {
        self.lifecycle.lock().check_open()?;
        let mut rng = self.rng.lock();
        let decryptions = self.guardian.compensated_decrypt(
            missing_guardian_id,
            ciphertexts,
            extended_base_hash,
            &mut *rng,
        )?;
        Ok(decryptions)
    }

    async fn finish(&self, all_ok: bool) -> Result<(), ChannelError> {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.check_open()?;
        lifecycle.finished = Some(all_ok);
        info!(guardian = %self.guardian.id().id, all_ok, "decryption finished");
        Ok(())
    }

    async fn shutdown(&self) {
        self.lifecycle.lock().shut_down = true;
    }
}

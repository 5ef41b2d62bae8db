//! Guardian channels misbehaving in controlled ways.

use async_trait::async_trait;

use std::sync::Arc;

use guardian_ceremony::{
    channel::{ChannelError, DecryptingChannel, KeyCeremonyChannel},
    group::Group,
    guardian::{PublicKeys, SecretKeyShare},
    Ciphertext, CompensatedDecryptionAndProof, DirectDecryptionAndProof,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyFault {
    /// Never answers a request for public keys.
    HangOnPublicKeys,
    /// Publishes coefficient proofs in the wrong order.
    ShuffledProofs,
    /// Refuses to issue secret key shares.
    RefuseShares,
    /// Claims shares were generated by another guardian.
    ForgedShareOrigin,
    /// Fails to persist its state after the exchange.
    FailSave,
}

#[derive(Debug)]
pub struct FaultyCeremonyGuardian<C> {
    pub inner: Arc<C>,
    pub fault: CeremonyFault,
}

impl<C> FaultyCeremonyGuardian<C> {
    pub fn new(inner: Arc<C>, fault: CeremonyFault) -> Self {
        Self { inner, fault }
    }
}

#[async_trait]
impl<G: Group, C: KeyCeremonyChannel<G>> KeyCeremonyChannel<G> for FaultyCeremonyGuardian<C> {
    async fn send_public_keys(&self) -> Result<PublicKeys<G>, ChannelError> {
        match self.fault {
            CeremonyFault::HangOnPublicKeys => futures::future::pending().await,
            CeremonyFault::ShuffledProofs => {
                let mut keys = self.inner.send_public_keys().await?;
                keys.coefficient_proofs.reverse();
                Ok(keys)
            }
            _ => self.inner.send_public_keys().await,
        }
    }

    async fn receive_public_keys(&self, keys: PublicKeys<G>) -> Result<(), ChannelError> {
        self.inner.receive_public_keys(keys).await
    }

    async fn send_secret_key_share(
        &self,
        designated_id: &str,
    ) -> Result<SecretKeyShare<G>, ChannelError> {
        match self.fault {
            CeremonyFault::RefuseShares => Err(ChannelError::Remote("out of entropy".to_owned())),
            CeremonyFault::ForgedShareOrigin => {
                let mut share = self.inner.send_secret_key_share(designated_id).await?;
                share.generating_guardian_id = "mallory".to_owned();
                Ok(share)
            }
            _ => self.inner.send_secret_key_share(designated_id).await,
        }
    }

    async fn receive_secret_key_share(&self, share: SecretKeyShare<G>) -> Result<(), ChannelError> {
        self.inner.receive_secret_key_share(share).await
    }

    async fn save_state(&self) -> Result<(), ChannelError> {
        if self.fault == CeremonyFault::FailSave {
            return Err(ChannelError::Remote("disk full".to_owned()));
        }
        self.inner.save_state().await
    }

    async fn finish(&self, all_ok: bool) -> Result<(), ChannelError> {
        self.inner.finish(all_ok).await
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptionFault {
    /// Shifts every direct partial decryption by the group generator.
    TamperDirect,
    /// Shifts every compensated partial decryption by the group generator.
    TamperCompensated,
    /// Returns one partial decryption fewer than requested.
    TruncateDirect,
    /// Never answers a direct decryption request.
    HangOnDirect,
}

#[derive(Debug)]
pub struct FaultyDecryptingGuardian<C> {
    pub inner: Arc<C>,
    pub fault: DecryptionFault,
}

impl<C> FaultyDecryptingGuardian<C> {
    pub fn new(inner: Arc<C>, fault: DecryptionFault) -> Self {
        Self { inner, fault }
    }
}

#[async_trait]
impl<G: Group, C: DecryptingChannel<G>> DecryptingChannel<G> for FaultyDecryptingGuardian<C> {
    async fn direct_decrypt(
        &self,
        ciphertexts: &[Ciphertext<G>],
        extended_base_hash: &[u8; 32],
    ) -> Result<Vec<DirectDecryptionAndProof<G>>, ChannelError> {
        if self.fault == DecryptionFault::HangOnDirect {
            return futures::future::pending().await;
        }
        let mut decryptions = self
            .inner
            .direct_decrypt(ciphertexts, extended_base_hash)
            .await?;
        match self.fault {
            DecryptionFault::TamperDirect => {
                for decryption in &mut decryptions {
                    decryption.partial_decryption = decryption.partial_decryption + G::generator();
                }
            }
            DecryptionFault::TruncateDirect => {
                decryptions.pop();
            }
            _ => { /* no changes */ }
        }
        Ok(decryptions)
    }

    async fn compensated_decrypt(
        &self,
        missing_guardian_id: &str,
        ciphertexts: &[Ciphertext<G>],
        extended_base_hash: &[u8; 32],
    ) -> Result<Vec<CompensatedDecryptionAndProof<G>>, ChannelError> {
        let mut decryptions = self
            .inner
            .compensated_decrypt(missing_guardian_id, ciphertexts, extended_base_hash)
            .await?;
        if self.fault == DecryptionFault::TamperCompensated {
            for decryption in &mut decryptions {
                decryption.partial_decryption = decryption.partial_decryption + G::generator();
            }
        }
        Ok(decryptions)
    }

    async fn finish(&self, all_ok: bool) -> Result<(), ChannelError> {
        self.inner.finish(all_ok).await
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

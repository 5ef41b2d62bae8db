//! Guardian state during decryption.

use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use std::{collections::BTreeMap, fmt};

use crate::{
    decryption::{decryption_transcript, CompensatedDecryptionAndProof, DirectDecryptionAndProof},
    group::Group,
    guardian::{GuardianError, GuardianId},
    proofs::ChaumPedersenProof,
    Ciphertext, Keypair, PublicKey, SecretKey,
};

/// State a guardian saves at the end of a successful key ceremony: its election keys
/// and the polynomial values every other guardian issued to it.
///
/// The serialized form contains secret scalars and must be stored accordingly.
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound = "", into = "TrusteeState<G>", from = "TrusteeState<G>")]
pub struct DecryptingTrustee<G: Group> {
    id: GuardianId,
    election_keys: Keypair<G>,
    received_shares: BTreeMap<String, SecretKey<G>>,
}

impl<G: Group> fmt::Debug for DecryptingTrustee<G> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DecryptingTrustee")
            .field("id", &self.id)
            .field("election_public_key", self.election_keys.public())
            .field("received_shares", &self.received_shares.keys())
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
struct TrusteeState<G: Group> {
    id: GuardianId,
    election_secret_key: SecretKey<G>,
    received_shares: BTreeMap<String, SecretKey<G>>,
}

impl<G: Group> From<DecryptingTrustee<G>> for TrusteeState<G> {
    fn from(trustee: DecryptingTrustee<G>) -> Self {
        Self {
            id: trustee.id,
            election_secret_key: trustee.election_keys.secret().clone(),
            received_shares: trustee.received_shares,
        }
    }
}

impl<G: Group> From<TrusteeState<G>> for DecryptingTrustee<G> {
    fn from(state: TrusteeState<G>) -> Self {
        Self {
            id: state.id,
            election_keys: Keypair::from(state.election_secret_key),
            received_shares: state.received_shares,
        }
    }
}

impl<G: Group> DecryptingTrustee<G> {
    pub(crate) fn new(
        id: GuardianId,
        election_keys: Keypair<G>,
        received_shares: BTreeMap<String, SecretKey<G>>,
    ) -> Self {
        Self {
            id,
            election_keys,
            received_shares,
        }
    }

    /// Returns the identity of the guardian.
    pub fn id(&self) -> &GuardianId {
        &self.id
    }

    /// Returns the election public key of the guardian.
    pub fn election_public_key(&self) -> &PublicKey<G> {
        self.election_keys.public()
    }

    /// Returns ids of the guardians this trustee holds shares from.
    pub fn share_holders(&self) -> impl Iterator<Item = &str> + '_ {
        self.received_shares.keys().map(String::as_str)
    }
}

/// Guardian taking part in decryption.
#[derive(Debug, Clone)]
pub struct DecryptingGuardian<G: Group> {
    trustee: DecryptingTrustee<G>,
}

impl<G: Group> From<DecryptingTrustee<G>> for DecryptingGuardian<G> {
    fn from(trustee: DecryptingTrustee<G>) -> Self {
        Self { trustee }
    }
}

impl<G: Group> DecryptingGuardian<G> {
    /// Returns the identity of this guardian.
    pub fn id(&self) -> &GuardianId {
        &self.trustee.id
    }

    /// Returns the election public key of this guardian.
    pub fn election_public_key(&self) -> &PublicKey<G> {
        self.trustee.election_public_key()
    }

    /// Computes partial decryptions of `ciphertexts` with the guardian's election secret key.
    pub fn direct_decrypt<R: CryptoRng + RngCore>(
        &self,
        ciphertexts: &[Ciphertext<G>],
        extended_base_hash: &[u8; 32],
        rng: &mut R,
    ) -> Vec<DirectDecryptionAndProof<G>> {
        let keys = &self.trustee.election_keys;
        ciphertexts
            .iter()
            .map(|ciphertext| {
                let partial_decryption = *ciphertext.pad() * keys.secret().expose_scalar();
                let mut transcript =
                    decryption_transcript(extended_base_hash, &self.trustee.id.id, None);
                let proof = ChaumPedersenProof::new(
                    ciphertext,
                    keys.secret(),
                    (keys.public().as_element(), partial_decryption),
                    &mut transcript,
                    rng,
                );
                DirectDecryptionAndProof {
                    partial_decryption,
                    proof,
                }
            })
            .collect()
    }

    /// Computes partial decryptions of `ciphertexts` on behalf of the missing guardian
    /// `missing_guardian_id`, using the share that guardian issued to this one.
    ///
    /// # Errors
    ///
    /// Returns an error if this guardian holds no share from `missing_guardian_id`.
    pub fn compensated_decrypt<R: CryptoRng + RngCore>(
        &self,
        missing_guardian_id: &str,
        ciphertexts: &[Ciphertext<G>],
        extended_base_hash: &[u8; 32],
        rng: &mut R,
    ) -> Result<Vec<CompensatedDecryptionAndProof<G>>, GuardianError> {
        let share = self
            .trustee
            .received_shares
            .get(missing_guardian_id)
            .ok_or_else(|| GuardianError::UnknownGuardian(missing_guardian_id.to_owned()))?;
        let recovered_public_key_share = G::mul_generator(share.expose_scalar());

        let decryptions = ciphertexts
            .iter()
            .map(|ciphertext| {
                let partial_decryption = *ciphertext.pad() * share.expose_scalar();
                let mut transcript = decryption_transcript(
                    extended_base_hash,
                    &self.trustee.id.id,
                    Some(missing_guardian_id),
                );
                let proof = ChaumPedersenProof::new(
                    ciphertext,
                    share,
                    (recovered_public_key_share, partial_decryption),
                    &mut transcript,
                    rng,
                );
                CompensatedDecryptionAndProof {
                    partial_decryption,
                    proof,
                    recovered_public_key_share,
                }
            })
            .collect();
        Ok(decryptions)
    }
}

#[cfg(test)]
mod tests {
    use rand::thread_rng;

    use super::*;
    use crate::{group::Ristretto, sharing::SecretPolynomial};

    #[test]
    fn direct_and_compensated_decryptions_verify() {
        let mut rng = thread_rng();
        let hash = [7_u8; 32];
        let own = Keypair::<Ristretto>::generate(&mut rng);
        let missing_polynomial = SecretPolynomial::<Ristretto>::generate(2, &mut rng);
        let missing_commitments = missing_polynomial.commitments();

        let mut shares = BTreeMap::new();
        shares.insert("g2".to_owned(), missing_polynomial.value_at(1));
        let guardian = DecryptingGuardian::from(DecryptingTrustee::new(
            GuardianId::new("g1", 1),
            own.clone(),
            shares,
        ));

        let joint = PublicKey::from_element(
            own.public().as_element() + missing_commitments.value_at_zero(),
        );
        let ciphertexts = [joint.encrypt(1_u64, &mut rng), joint.encrypt(0_u64, &mut rng)];

        let direct = guardian.direct_decrypt(&ciphertexts, &hash, &mut rng);
        for (decryption, ciphertext) in direct.iter().zip(&ciphertexts) {
            decryption
                .verify(ciphertext, own.public().as_element(), "g1", &hash)
                .unwrap();
            assert!(decryption
                .verify(ciphertext, own.public().as_element(), "g1", &[0; 32])
                .is_err());
        }

        let compensated = guardian
            .compensated_decrypt("g2", &ciphertexts, &hash, &mut rng)
            .unwrap();
        let expected_key = missing_commitments.value_at(1);
        for (decryption, ciphertext) in compensated.iter().zip(&ciphertexts) {
            decryption
                .verify(ciphertext, expected_key, "g1", "g2", &hash)
                .unwrap();
            // Proofs are bound to the missing guardian id.
            assert!(decryption
                .verify(ciphertext, expected_key, "g1", "g3", &hash)
                .is_err());
        }

        let err = guardian
            .compensated_decrypt("g3", &ciphertexts, &hash, &mut rng)
            .unwrap_err();
        assert_eq!(err, GuardianError::UnknownGuardian("g3".to_owned()));
    }

    #[test]
    fn trustee_state_roundtrip() {
        let mut rng = thread_rng();
        let keys = Keypair::<Ristretto>::generate(&mut rng);
        let mut shares = BTreeMap::new();
        shares.insert("g2".to_owned(), SecretKey::generate(&mut rng));
        let trustee = DecryptingTrustee::new(GuardianId::new("g1", 1), keys.clone(), shares);

        let json = serde_json::to_value(&trustee).unwrap();
        assert_eq!(json["id"]["id"], "g1");
        let restored: DecryptingTrustee<Ristretto> = serde_json::from_value(json).unwrap();
        assert_eq!(restored.election_public_key(), keys.public());
        assert_eq!(restored.share_holders().collect::<Vec<_>>(), ["g2"]);
    }
}

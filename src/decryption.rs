//! Partial decryptions with proofs, and their combination into a plaintext.

use merlin::Transcript;
use serde::{Deserialize, Serialize};

use crate::{
    group::Group,
    proofs::{ChaumPedersenProof, VerificationError},
    serde::ElementHelper,
    sharing, Ciphertext, DiscreteLogTable,
};

/// Transcript for a partial decryption by `guardian_id`. For compensated decryptions,
/// `missing_guardian_id` names the guardian being compensated for.
pub(crate) fn decryption_transcript(
    extended_base_hash: &[u8; 32],
    guardian_id: &str,
    missing_guardian_id: Option<&str>,
) -> Transcript {
    let mut transcript = Transcript::new(b"guardian_partial_decryption");
    transcript.append_message(b"Q", extended_base_hash);
    transcript.append_message(b"guardian", guardian_id.as_bytes());
    if let Some(missing_id) = missing_guardian_id {
        transcript.append_message(b"missing", missing_id.as_bytes());
    }
    transcript
}

/// Partial decryption `M_i = [s_i]A` of a ciphertext with the guardian's own election
/// secret key, together with a proof of its correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct DirectDecryptionAndProof<G: Group> {
    /// Partial decryption.
    #[serde(with = "ElementHelper::<G>")]
    pub partial_decryption: G::Element,
    /// Proof that the partial decryption uses the secret behind the guardian's
    /// election public key.
    pub proof: ChaumPedersenProof<G>,
}

impl<G: Group> DirectDecryptionAndProof<G> {
    /// Verifies this decryption against the election public key of the guardian `guardian_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the proof does not verify.
    pub fn verify(
        &self,
        ciphertext: &Ciphertext<G>,
        election_public_key: G::Element,
        guardian_id: &str,
        extended_base_hash: &[u8; 32],
    ) -> Result<(), VerificationError> {
        let mut transcript = decryption_transcript(extended_base_hash, guardian_id, None);
        self.proof.verify(
            ciphertext,
            (election_public_key, self.partial_decryption),
            &mut transcript,
        )
    }
}

/// Partial decryption computed by a present guardian on behalf of a missing one, using
/// the secret key share the missing guardian issued to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct CompensatedDecryptionAndProof<G: Group> {
    /// Compensated partial decryption.
    #[serde(with = "ElementHelper::<G>")]
    pub partial_decryption: G::Element,
    /// Proof that the partial decryption uses the secret behind `recovered_public_key_share`.
    pub proof: ChaumPedersenProof<G>,
    /// `[P_M(x)]G`, where `P_M` is the missing guardian's polynomial and `x` is the
    /// x-coordinate of the compensating guardian.
    #[serde(with = "ElementHelper::<G>")]
    pub recovered_public_key_share: G::Element,
}

impl<G: Group> CompensatedDecryptionAndProof<G> {
    /// Verifies this decryption. `expected_key_share` must be computed independently
    /// from the missing guardian's published commitments evaluated at the compensating
    /// guardian's x-coordinate.
    ///
    /// # Errors
    ///
    /// Returns an error if the supplied recovered key share differs from the expected one,
    /// or if the proof does not verify.
    pub fn verify(
        &self,
        ciphertext: &Ciphertext<G>,
        expected_key_share: G::Element,
        guardian_id: &str,
        missing_guardian_id: &str,
        extended_base_hash: &[u8; 32],
    ) -> Result<(), VerificationError> {
        if self.recovered_public_key_share != expected_key_share {
            return Err(VerificationError::PublicKeyMismatch);
        }
        let mut transcript =
            decryption_transcript(extended_base_hash, guardian_id, Some(missing_guardian_id));
        self.proof.verify(
            ciphertext,
            (expected_key_share, self.partial_decryption),
            &mut transcript,
        )
    }
}

/// Reconstructs the partial decryption of a missing guardian from compensated
/// partial decryptions given as `(x-coordinate of compensating guardian, partial)`.
///
/// # Errors
///
/// Returns an error if the coordinates are empty, contain zero or duplicates.
pub fn recover_missing_decryption<G: Group>(
    compensated: &[(u32, G::Element)],
) -> Result<G::Element, sharing::Error> {
    sharing::interpolate_at_zero::<G>(compensated)
}

/// Combines partial decryptions of all guardians and returns `[m]G`.
pub fn combine_partial_decryptions<G: Group>(
    ciphertext: &Ciphertext<G>,
    partial_decryptions: impl IntoIterator<Item = G::Element>,
) -> G::Element {
    let combined = partial_decryptions
        .into_iter()
        .fold(G::identity(), |acc, partial| acc + partial);
    *ciphertext.data() - combined
}

/// Same as [`combine_partial_decryptions()`], with the plaintext looked up in `lookup_table`.
/// Returns `None` if the plaintext is not in the table.
pub fn decrypt_with_partials<G: Group>(
    ciphertext: &Ciphertext<G>,
    partial_decryptions: impl IntoIterator<Item = G::Element>,
    lookup_table: &DiscreteLogTable<G>,
) -> Option<u64> {
    lookup_table.get(&combine_partial_decryptions(ciphertext, partial_decryptions))
}

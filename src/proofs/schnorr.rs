//! [`SchnorrProof`] and related logic.

use merlin::Transcript;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{
    group::Group,
    proofs::{TranscriptForGroup, VerificationError},
    serde::ScalarHelper,
    SecretKey,
};

/// Zero-knowledge proof of knowledge of a discrete log, aka Schnorr proof.
///
/// Guardians attach one such proof to every coefficient commitment `K = [a]G` of their
/// secret polynomial, proving that they know `a`.
///
/// # Construction
///
/// 1. **Commitment:** The prover generates random scalar `r` and commits to `R = [r]G`.
/// 2. **Challenge:** `c` is derived from the transcript containing `K` and `R`.
/// 3. **Response:** `u = r + c * a`.
///
/// The proof is represented as `(c, u)`. The verifier restores `R = [u]G - [c]K`,
/// rederives the challenge and compares it with `c`.
///
/// # Implementation notes
///
/// - Proof generation is constant-time. Verification is **not** constant-time.
/// - The transcript is supplied by the caller, so that the proof is bound to the context
///   (e.g., the guardian id and the coefficient index).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SchnorrProof<G: Group> {
    #[serde(with = "ScalarHelper::<G>")]
    challenge: G::Scalar,
    #[serde(with = "ScalarHelper::<G>")]
    response: G::Scalar,
}

impl<G: Group> SchnorrProof<G> {
    /// Creates a proof of knowledge of `secret` with the corresponding `commitment = [secret]G`.
    pub fn new<R: CryptoRng + RngCore>(
        secret: &SecretKey<G>,
        commitment: &G::Element,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Self {
        transcript.start_proof(b"schnorr");
        transcript.append_element::<G>(b"K", commitment);

        let randomness = SecretKey::<G>::generate(rng);
        transcript.append_element::<G>(b"R", &G::mul_generator(randomness.expose_scalar()));
        let challenge = transcript.challenge_scalar::<G>(b"c");
        let response = *randomness.expose_scalar() + challenge * *secret.expose_scalar();

        Self {
            challenge,
            response,
        }
    }

    /// Verifies this proof against the `commitment`.
    ///
    /// # Errors
    ///
    /// Returns an error if this proof does not verify, or if `commitment` is the group identity.
    pub fn verify(
        &self,
        commitment: &G::Element,
        transcript: &mut Transcript,
    ) -> Result<(), VerificationError> {
        if G::is_identity(commitment) {
            return Err(VerificationError::IdentityElement);
        }

        let random_element =
            G::vartime_double_mul_generator(&-self.challenge, *commitment, &self.response);
        transcript.start_proof(b"schnorr");
        transcript.append_element::<G>(b"K", commitment);
        transcript.append_element::<G>(b"R", &random_element);
        let expected_challenge = transcript.challenge_scalar::<G>(b"c");

        if expected_challenge == self.challenge {
            Ok(())
        } else {
            Err(VerificationError::ChallengeMismatch)
        }
    }

    /// Serializes this proof into bytes as 2 scalars: `(c, u)`.
    pub fn to_bytes(self) -> Vec<u8> {
        let mut bytes = vec![0_u8; 2 * G::SCALAR_SIZE];
        G::serialize_scalar(&self.challenge, &mut bytes[..G::SCALAR_SIZE]);
        G::serialize_scalar(&self.response, &mut bytes[G::SCALAR_SIZE..]);
        bytes
    }

    /// Attempts to parse the proof from `bytes`. Returns `None` if `bytes` do not represent
    /// a well-formed proof.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 2 * G::SCALAR_SIZE {
            return None;
        }
        let challenge = G::deserialize_scalar(&bytes[..G::SCALAR_SIZE])?;
        let response = G::deserialize_scalar(&bytes[G::SCALAR_SIZE..])?;
        Some(Self {
            challenge,
            response,
        })
    }
}

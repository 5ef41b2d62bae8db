//! [`ChaumPedersenProof`] and related logic.

use merlin::Transcript;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{
    group::Group,
    proofs::{TranscriptForGroup, VerificationError},
    serde::ScalarHelper,
    Ciphertext, SecretKey,
};

/// Zero-knowledge proof that a partial decryption of a [`Ciphertext`] was computed with
/// the secret behind a public key, aka Chaum–Pedersen protocol.
///
/// # Construction
///
/// - Prover and verifier know the ciphertext `(A, B)` (pad and data), the public key
///   `K = [s]G` and the partial decryption `M = [s]A`.
/// - Prover additionally knows `s`.
///
/// 1. **Commitment:** The prover generates random scalar `u` and commits to
///    `a = [u]G`, `b = [u]A`.
/// 2. **Challenge:** `c` is derived from the transcript containing `(A, B)`, `K`, `M`,
///    `a` and `b`.
/// 3. **Response:** `v = u + c * s`.
///
/// Verification equations are:
///
/// ```text
/// [v]G ?= a + [c]K;
/// [v]A ?= b + [c]M.
/// ```
///
/// The proof is represented as `(c, v)`; the verifier restores `a` and `b` from
/// the verification equations and compares the rederived challenge with `c`.
///
/// The caller is expected to bind the transcript to the election context; decryption
/// transcripts always include the extended base hash.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ChaumPedersenProof<G: Group> {
    #[serde(with = "ScalarHelper::<G>")]
    challenge: G::Scalar,
    #[serde(with = "ScalarHelper::<G>")]
    response: G::Scalar,
}

fn commit_statement<G: Group>(
    transcript: &mut Transcript,
    ciphertext: &Ciphertext<G>,
    public_key: &G::Element,
    partial_decryption: &G::Element,
) {
    transcript.start_proof(b"chaum_pedersen");
    transcript.append_element::<G>(b"A", ciphertext.pad());
    transcript.append_element::<G>(b"B", ciphertext.data());
    transcript.append_element::<G>(b"K", public_key);
    transcript.append_element::<G>(b"M", partial_decryption);
}

impl<G: Group> ChaumPedersenProof<G> {
    /// Creates a new proof that `partial_decryption = [secret]A` where `A` is the pad
    /// of `ciphertext` and `public_key = [secret]G`.
    ///
    /// It is **not** checked whether the relations hold; if they do not,
    /// the constructed proof will not [`verify`](Self::verify()).
    pub fn new<R: CryptoRng + RngCore>(
        ciphertext: &Ciphertext<G>,
        secret: &SecretKey<G>,
        (public_key, partial_decryption): (G::Element, G::Element),
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Self {
        commit_statement(transcript, ciphertext, &public_key, &partial_decryption);

        let random_scalar = SecretKey::<G>::generate(rng);
        transcript.append_element::<G>(b"a", &G::mul_generator(random_scalar.expose_scalar()));
        transcript.append_element::<G>(
            b"b",
            &(*ciphertext.pad() * random_scalar.expose_scalar()),
        );
        let challenge = transcript.challenge_scalar::<G>(b"c");
        let response = challenge * *secret.expose_scalar() + *random_scalar.expose_scalar();

        Self {
            challenge,
            response,
        }
    }

    /// Verifies this proof for `ciphertext`, `public_key` and `partial_decryption`.
    ///
    /// # Errors
    ///
    /// Returns an error if this proof does not verify or if the public key is the group identity.
    pub fn verify(
        &self,
        ciphertext: &Ciphertext<G>,
        (public_key, partial_decryption): (G::Element, G::Element),
        transcript: &mut Transcript,
    ) -> Result<(), VerificationError> {
        if G::is_identity(&public_key) {
            return Err(VerificationError::IdentityElement);
        }

        let commitments = (
            G::vartime_double_mul_generator(&-self.challenge, public_key, &self.response),
            G::vartime_multi_mul(
                &[-self.challenge, self.response],
                [partial_decryption, *ciphertext.pad()],
            ),
        );

        commit_statement(transcript, ciphertext, &public_key, &partial_decryption);
        transcript.append_element::<G>(b"a", &commitments.0);
        transcript.append_element::<G>(b"b", &commitments.1);
        let expected_challenge = transcript.challenge_scalar::<G>(b"c");

        if expected_challenge == self.challenge {
            Ok(())
        } else {
            Err(VerificationError::ChallengeMismatch)
        }
    }

    /// Serializes this proof into bytes as 2 scalars: `(c, v)`.
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

//! Zero-knowledge proofs used by guardians: Schnorr proofs of possession for polynomial
//! coefficients and Chaum–Pedersen proofs for partial decryptions.

use merlin::Transcript;

use core::fmt;

use crate::group::{Group, RandomBytesProvider};

mod chaum_pedersen;
mod schnorr;

pub use self::{chaum_pedersen::ChaumPedersenProof, schnorr::SchnorrProof};

/// Extension trait for Merlin transcripts used in constructing our proofs.
pub(crate) trait TranscriptForGroup {
    fn start_proof(&mut self, proof_label: &'static [u8]);

    fn append_element_bytes(&mut self, label: &'static [u8], element_bytes: &[u8]);

    fn append_element<G: Group>(&mut self, label: &'static [u8], element: &G::Element);

    fn challenge_scalar<G: Group>(&mut self, label: &'static [u8]) -> G::Scalar;
}

impl TranscriptForGroup for Transcript {
    fn start_proof(&mut self, proof_label: &'static [u8]) {
        self.append_message(b"dom-sep", proof_label);
    }

    fn append_element_bytes(&mut self, label: &'static [u8], element_bytes: &[u8]) {
        self.append_message(label, element_bytes);
    }

    fn append_element<G: Group>(&mut self, label: &'static [u8], element: &G::Element) {
        let bytes = G::element_to_bytes(element);
        self.append_element_bytes(label, &bytes);
    }

    fn challenge_scalar<G: Group>(&mut self, label: &'static [u8]) -> G::Scalar {
        G::scalar_from_random_bytes(RandomBytesProvider::new(self, label))
    }
}

/// Error verifying a [`SchnorrProof`] or a [`ChaumPedersenProof`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VerificationError {
    /// Restored challenge scalar does not match the one provided in the proof.
    ///
    /// This error most likely means that the proof itself is malformed, or that it was created
    /// for a different context than it is being verified for.
    ChallengeMismatch,
    /// A collection (e.g., number of coefficient proofs) has a different size than expected.
    LenMismatch {
        /// Human-readable collection name, such as "coefficient proofs".
        collection: &'static str,
        /// Expected size of the collection.
        expected: usize,
        /// Actual size of the collection.
        actual: usize,
    },
    /// A public element the proof is verified against is the group identity.
    IdentityElement,
    /// Public key supplied together with the proof differs from the independently
    /// computed one.
    PublicKeyMismatch,
}

impl VerificationError {
    pub(crate) fn check_lengths(
        collection: &'static str,
        expected: usize,
        actual: usize,
    ) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::LenMismatch {
                collection,
                expected,
                actual,
            })
        }
    }
}

impl fmt::Display for VerificationError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChallengeMismatch => formatter.write_str(
                "restored challenge scalar does not match the one provided in the proof",
            ),
            Self::LenMismatch {
                collection,
                expected,
                actual,
            } => write!(
                formatter,
                "number of {collection} ({actual}) differs from expected ({expected})"
            ),
            Self::IdentityElement => {
                formatter.write_str("public element of the proof is the group identity")
            }
            Self::PublicKeyMismatch => formatter
                .write_str("public key supplied with the proof differs from the expected one"),
        }
    }
}

impl std::error::Error for VerificationError {}

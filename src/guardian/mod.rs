//! Guardians (aka trustees): independent parties that jointly generate the election key
//! and later decrypt tallies.
//!
//! A guardian lives through two phases, each modelled by its own type:
//!
//! - [`KeyCeremonyGuardian`] generates a secret polynomial, publishes [`PublicKeys`]
//!   and exchanges [`SecretKeyShare`]s with every other guardian.
//! - [`DecryptingGuardian`] is restored from the [`DecryptingTrustee`] state saved at the end
//!   of the ceremony and produces direct and compensated partial decryptions.

use merlin::Transcript;
use serde::{Deserialize, Serialize};

use core::fmt;

use crate::{
    group::Group,
    proofs::{SchnorrProof, VerificationError},
    sharing::PublicPolynomial,
    PublicKey,
};

mod ceremony;
mod decrypting;
mod share;

pub use self::{
    ceremony::KeyCeremonyGuardian,
    decrypting::{DecryptingGuardian, DecryptingTrustee},
    share::{HashedCiphertext, SecretKeyShare},
};

/// Identity of a registered guardian: a human-readable id and the x-coordinate
/// at which other guardians evaluate their polynomials for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuardianId {
    /// Human-readable guardian id, e.g. `"guardian1"`.
    pub id: String,
    /// x-coordinate of the guardian, starting from 1.
    pub x_coordinate: u32,
}

impl GuardianId {
    /// Creates a new guardian identity.
    ///
    /// # Panics
    ///
    /// Panics if `x_coordinate` is zero.
    pub fn new(id: impl Into<String>, x_coordinate: u32) -> Self {
        assert!(x_coordinate > 0, "x-coordinate must be positive");
        Self {
            id: id.into(),
            x_coordinate,
        }
    }
}

impl fmt::Display for GuardianId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} (x = {})", self.id, self.x_coordinate)
    }
}

/// Transcript binding a coefficient proof to its owner and coefficient index.
pub(crate) fn coefficient_transcript(
    guardian_id: &str,
    x_coordinate: u32,
    index: usize,
) -> Transcript {
    let mut transcript = Transcript::new(b"guardian_coefficient");
    transcript.append_message(b"guardian", guardian_id.as_bytes());
    transcript.append_u64(b"x", x_coordinate.into());
    transcript.append_u64(b"j", index as u64);
    transcript
}

/// Public information a guardian broadcasts during the key ceremony: commitments
/// to its polynomial coefficients with a Schnorr proof for each of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PublicKeys<G: Group> {
    /// Id of the owning guardian.
    pub guardian_id: String,
    /// x-coordinate of the owning guardian.
    pub x_coordinate: u32,
    /// Commitments `K_j = [a_j]G` to the polynomial coefficients.
    pub coefficient_commitments: PublicPolynomial<G>,
    /// Schnorr proofs, one per commitment.
    pub coefficient_proofs: Vec<SchnorrProof<G>>,
}

impl<G: Group> PublicKeys<G> {
    /// Returns the election public key of the owning guardian, `K_0`.
    pub fn election_public_key(&self) -> PublicKey<G> {
        self.coefficient_commitments.election_public_key()
    }

    /// Returns the id and x-coordinate of the owner.
    pub fn owner(&self) -> GuardianId {
        GuardianId {
            id: self.guardian_id.clone(),
            x_coordinate: self.x_coordinate,
        }
    }

    /// Checks that there are exactly `quorum` commitments and that every coefficient
    /// proof is valid.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first failed check.
    pub fn validate(&self, quorum: usize) -> Result<(), GuardianError> {
        if self.coefficient_commitments.len() != quorum {
            return Err(GuardianError::QuorumMismatch {
                guardian: self.guardian_id.clone(),
                expected: quorum,
                actual: self.coefficient_commitments.len(),
            });
        }
        if self.x_coordinate == 0 {
            return Err(GuardianError::ZeroCoordinate(self.guardian_id.clone()));
        }

        self.coefficient_commitments
            .verify_coefficients(&self.coefficient_proofs, |j| {
                coefficient_transcript(&self.guardian_id, self.x_coordinate, j)
            })
            .map_err(|source| GuardianError::InvalidCoefficientProof {
                guardian: self.guardian_id.clone(),
                source,
            })
    }
}

/// Errors that can occur in guardian operations.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GuardianError {
    /// Public keys or a share came from the guardian itself.
    SelfMessage(String),
    /// No public keys were received from the specified guardian.
    UnknownGuardian(String),
    /// Different public keys were already received from the specified guardian.
    ConflictingPublicKeys(String),
    /// Number of coefficient commitments differs from the quorum.
    QuorumMismatch {
        /// Owner of the public keys.
        guardian: String,
        /// Expected number of commitments.
        expected: usize,
        /// Actual number of commitments.
        actual: usize,
    },
    /// Public keys specify x-coordinate 0.
    ZeroCoordinate(String),
    /// A coefficient proof does not verify.
    InvalidCoefficientProof {
        /// Owner of the public keys.
        guardian: String,
        /// Verification error.
        source: VerificationError,
    },
    /// A share is designated for another guardian.
    WrongRecipient {
        /// Id of this guardian.
        expected: GuardianId,
        /// Designated guardian specified in the share.
        actual: GuardianId,
    },
    /// A share could not be decrypted.
    ShareDecryption(String),
    /// A decrypted share does not match the generating guardian's commitments.
    InvalidShare(String),
    /// A different share was already received from the specified guardian.
    ConflictingShare(String),
    /// Shares from the specified guardians were not received.
    MissingShares(Vec<String>),
}

impl fmt::Display for GuardianError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfMessage(id) => {
                write!(formatter, "guardian '{id}' received its own message")
            }
            Self::UnknownGuardian(id) => {
                write!(formatter, "no public keys received from guardian '{id}'")
            }
            Self::ConflictingPublicKeys(id) => write!(
                formatter,
                "different public keys were already received from guardian '{id}'"
            ),
            Self::QuorumMismatch {
                guardian,
                expected,
                actual,
            } => write!(
                formatter,
                "guardian '{guardian}' published {actual} coefficient commitments, \
                 expected {expected}"
            ),
            Self::ZeroCoordinate(id) => {
                write!(formatter, "guardian '{id}' uses reserved x-coordinate 0")
            }
            Self::InvalidCoefficientProof { guardian, source } => write!(
                formatter,
                "invalid coefficient proof from guardian '{guardian}': {source}"
            ),
            Self::WrongRecipient { expected, actual } => write!(
                formatter,
                "secret key share is designated for {actual}, not for {expected}"
            ),
            Self::ShareDecryption(id) => write!(
                formatter,
                "cannot decrypt secret key share generated by guardian '{id}'"
            ),
            Self::InvalidShare(id) => write!(
                formatter,
                "secret key share generated by guardian '{id}' does not match its commitments"
            ),
            Self::ConflictingShare(id) => write!(
                formatter,
                "different secret key share was already received from guardian '{id}'"
            ),
            Self::MissingShares(ids) => write!(
                formatter,
                "secret key shares are missing from guardians {ids:?}"
            ),
        }
    }
}

impl std::error::Error for GuardianError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidCoefficientProof { source, .. } => Some(source),
            _ => None,
        }
    }
}

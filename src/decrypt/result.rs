//! Inputs and outputs of the decryption coordinator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::{collections::BTreeMap, fmt};

use crate::{
    channel::ChannelError,
    group::Group,
    proofs::VerificationError,
    record::{DecryptionRecord, Metadata},
    sharing, Ciphertext,
};

/// Encrypted tally: one ciphertext per selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct EncryptedTally<G: Group> {
    /// Tally id.
    pub tally_id: String,
    /// Encrypted selection totals.
    pub ciphertexts: Vec<Ciphertext<G>>,
}

/// Spoiled ballot to decrypt alongside the tally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct EncryptedBallot<G: Group> {
    /// Ballot id.
    pub ballot_id: String,
    /// Encrypted selections.
    pub ciphertexts: Vec<Ciphertext<G>>,
}

/// Reference to a decrypted item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemRef {
    /// Selection of the tally.
    Tally(usize),
    /// Selection of a spoiled ballot.
    Spoiled {
        /// Ballot id.
        ballot_id: String,
        /// Selection index.
        index: usize,
    },
}

impl fmt::Display for ItemRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tally(index) => write!(formatter, "tally selection #{index}"),
            Self::Spoiled { ballot_id, index } => {
                write!(formatter, "selection #{index} of spoiled ballot '{ballot_id}'")
            }
        }
    }
}

/// Kind of contributions to a decrypted item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContributionKind {
    /// Direct partial decryptions of present guardians.
    Direct,
    /// Compensated partial decryptions for the specified missing guardian.
    CompensatingFor(String),
}

impl fmt::Display for ContributionKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => formatter.write_str("direct"),
            Self::CompensatingFor(id) => write!(formatter, "compensated ('{id}')"),
        }
    }
}

/// Problem encountered while decrypting. Problems concerning a single guardian drop
/// that guardian's contribution; the item fails only if the remaining contributions
/// are insufficient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ItemError {
    /// A guardian call failed.
    #[error("guardian '{guardian}' failed to {operation}: {source}")]
    Channel {
        /// Guardian id.
        guardian: String,
        /// Failed operation.
        operation: &'static str,
        /// Call error.
        #[source]
        source: ChannelError,
    },
    /// A guardian returned a wrong number of partial decryptions.
    #[error("guardian '{guardian}' returned {actual} partial decryptions, expected {expected}")]
    ResponseLength {
        /// Guardian id.
        guardian: String,
        /// Number of requested decryptions.
        expected: usize,
        /// Number of returned decryptions.
        actual: usize,
    },
    /// A direct partial decryption does not verify.
    #[error("invalid direct decryption from guardian '{guardian}': {source}")]
    InvalidDirectDecryption {
        /// Guardian id.
        guardian: String,
        /// Verification error.
        #[source]
        source: VerificationError,
    },
    /// A compensated partial decryption does not verify.
    #[error("invalid decryption from guardian '{guardian}' compensating for '{missing}': {source}")]
    InvalidCompensatedDecryption {
        /// Compensating guardian id.
        guardian: String,
        /// Missing guardian id.
        missing: String,
        /// Verification error.
        #[source]
        source: VerificationError,
    },
    /// Too few valid contributions to decrypt an item.
    #[error("only {valid} valid {kind} contributions, quorum is {quorum}")]
    InsufficientContributions {
        /// Kind of contributions.
        kind: ContributionKind,
        /// Number of valid contributions.
        valid: usize,
        /// Quorum.
        quorum: usize,
    },
    /// Compensated decryptions could not be interpolated.
    #[error("cannot reconstruct contribution of guardian '{missing}': {source}")]
    Interpolation {
        /// Missing guardian id.
        missing: String,
        /// Interpolation error.
        #[source]
        source: sharing::Error,
    },
    /// The decrypted value is not in the discrete log lookup table.
    #[error("decrypted value is outside of the lookup table")]
    PlaintextOutOfRange,
}

/// Problem reported in a [`DecryptionResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionIssue {
    /// Affected item, or `None` if the problem concerns all items.
    pub item: Option<ItemRef>,
    /// Whether the affected item failed to decrypt because of this problem.
    pub fatal: bool,
    /// Description of the problem.
    pub error: ItemError,
}

impl fmt::Display for DecryptionIssue {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(item) = &self.item {
            write!(formatter, "{item}: ")?;
        }
        fmt::Display::fmt(&self.error, formatter)
    }
}

/// Outcome of decrypting a tally and spoiled ballots.
#[derive(Debug, Clone)]
pub struct DecryptionResult {
    /// Tally id.
    pub tally_id: String,
    /// Decrypted tally selections; `None` for selections that failed to decrypt.
    pub tally: Vec<Option<u64>>,
    /// Decrypted spoiled ballots by ballot id.
    pub spoiled_ballots: BTreeMap<String, Vec<Option<u64>>>,
    /// Ids of guardians that took part in decryption.
    pub decrypting_guardians: Vec<String>,
    /// Ids of guardians compensated for.
    pub missing_guardians: Vec<String>,
    /// Problems encountered during decryption.
    pub issues: Vec<DecryptionIssue>,
    /// Result metadata.
    pub metadata: Metadata,
}

impl DecryptionResult {
    /// Checks whether every item was decrypted.
    pub fn is_complete(&self) -> bool {
        self.tally.iter().all(Option::is_some)
            && self
                .spoiled_ballots
                .values()
                .flatten()
                .all(Option::is_some)
    }

    /// Returns fatal problems, i.e., the reasons items failed to decrypt.
    pub fn failures(&self) -> impl Iterator<Item = &DecryptionIssue> + '_ {
        self.issues.iter().filter(|issue| issue.fatal)
    }

    /// Converts this result into a publishable record.
    pub fn to_record(&self) -> DecryptionRecord {
        DecryptionRecord {
            tally_id: self.tally_id.clone(),
            tally: self.tally.clone(),
            spoiled_ballots: self.spoiled_ballots.clone(),
            decrypting_guardians: self.decrypting_guardians.clone(),
            missing_guardians: self.missing_guardians.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

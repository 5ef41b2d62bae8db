//! Published records of the key ceremony and decryption, and the stores they are written to.
//!
//! Records are plain serializable data. Writing them anywhere durable is left to
//! [`Publisher`] and [`TrusteeStore`] implementations; in-memory implementations are provided.

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use std::collections::{BTreeMap, HashMap};

use crate::{
    group::Group,
    guardian::{DecryptingTrustee, GuardianError, GuardianId, PublicKeys},
    proofs::SchnorrProof,
    sharing::PublicPolynomial,
    PublicKey,
};

/// Metadata key for the creator of a record.
pub const CREATED_BY: &str = "CreatedBy";
/// Metadata key for the creation timestamp of a record.
pub const CREATED_ON: &str = "CreatedOn";
/// Metadata key for the input location a record was created from.
pub const CREATED_FROM_DIR: &str = "CreatedFromDir";

/// Free-form record metadata.
pub type Metadata = BTreeMap<String, String>;

pub(crate) fn metadata(created_by: &str, created_from: Option<&str>) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(CREATED_BY.to_owned(), created_by.to_owned());
    metadata.insert(
        CREATED_ON.to_owned(),
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    );
    if let Some(dir) = created_from {
        metadata.insert(CREATED_FROM_DIR.to_owned(), dir.to_owned());
    }
    metadata
}

/// Errors verifying a [`KeyCeremonyResult`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecordError {
    /// A guardian record is invalid.
    #[error(transparent)]
    Guardian(#[from] GuardianError),
    /// Number of guardian records differs from the declared guardian count.
    #[error("result declares {expected} guardians, but contains {actual} records")]
    GuardianCount {
        /// Declared number of guardians.
        expected: usize,
        /// Number of guardian records.
        actual: usize,
    },
    /// Two guardian records share an id or an x-coordinate.
    #[error("guardian '{0}' is duplicated or shares an x-coordinate with another guardian")]
    DuplicateGuardian(String),
    /// The joint public key is not the sum of guardians' election public keys.
    #[error("joint public key does not match guardian commitments")]
    JointKeyMismatch,
}

/// Published information about a single guardian.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct GuardianRecord<G: Group> {
    /// Guardian id.
    pub guardian_id: String,
    /// x-coordinate of the guardian.
    pub x_coordinate: u32,
    /// Commitments to the guardian's polynomial coefficients.
    pub coefficient_commitments: PublicPolynomial<G>,
    /// Proofs of knowledge for the coefficients.
    pub coefficient_proofs: Vec<SchnorrProof<G>>,
}

impl<G: Group> From<PublicKeys<G>> for GuardianRecord<G> {
    fn from(keys: PublicKeys<G>) -> Self {
        Self {
            guardian_id: keys.guardian_id,
            x_coordinate: keys.x_coordinate,
            coefficient_commitments: keys.coefficient_commitments,
            coefficient_proofs: keys.coefficient_proofs,
        }
    }
}

impl<G: Group> GuardianRecord<G> {
    /// Returns the identity of the guardian.
    pub fn id(&self) -> GuardianId {
        GuardianId {
            id: self.guardian_id.clone(),
            x_coordinate: self.x_coordinate,
        }
    }

    /// Returns the election public key of the guardian (commitment to `a_0`).
    pub fn election_public_key(&self) -> PublicKey<G> {
        self.coefficient_commitments.election_public_key()
    }

    fn to_public_keys(&self) -> PublicKeys<G> {
        PublicKeys {
            guardian_id: self.guardian_id.clone(),
            x_coordinate: self.x_coordinate,
            coefficient_commitments: self.coefficient_commitments.clone(),
            coefficient_proofs: self.coefficient_proofs.clone(),
        }
    }
}

/// Outcome of a successful key ceremony.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct KeyCeremonyResult<G: Group> {
    /// Total number of guardians.
    pub guardian_count: usize,
    /// Minimum number of guardians needed to decrypt.
    pub quorum: usize,
    /// Joint election public key `K = Σ K_{i,0}`.
    pub joint_public_key: PublicKey<G>,
    /// Guardian records ordered by x-coordinate.
    pub guardians: Vec<GuardianRecord<G>>,
}

impl<G: Group> KeyCeremonyResult<G> {
    /// Assembles the result from guardian records, computing the joint public key.
    pub fn new(quorum: usize, mut guardians: Vec<GuardianRecord<G>>) -> Self {
        guardians.sort_unstable_by_key(|guardian| guardian.x_coordinate);
        let joint_public_key = PublicKey::from_element(Self::joint_element(&guardians));
        Self {
            guardian_count: guardians.len(),
            quorum,
            joint_public_key,
            guardians,
        }
    }

    fn joint_element(guardians: &[GuardianRecord<G>]) -> G::Element {
        guardians
            .iter()
            .map(|guardian| guardian.coefficient_commitments.value_at_zero())
            .fold(G::identity(), |acc, key| acc + key)
    }

    /// Looks up a guardian by id.
    pub fn guardian(&self, id: &str) -> Option<&GuardianRecord<G>> {
        self.guardians.iter().find(|guardian| guardian.guardian_id == id)
    }

    /// Iterates over ids of all guardians.
    pub fn guardian_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.guardians.iter().map(|guardian| guardian.guardian_id.as_str())
    }

    /// Computes the extended base hash binding decryption proofs to this ceremony.
    pub fn extended_base_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"guardian-ceremony/extended-base-hash");
        hasher.update((self.guardian_count as u64).to_be_bytes());
        hasher.update((self.quorum as u64).to_be_bytes());
        hasher.update(self.joint_public_key.as_bytes());
        for guardian in &self.guardians {
            hasher.update((guardian.guardian_id.len() as u64).to_be_bytes());
            hasher.update(guardian.guardian_id.as_bytes());
            hasher.update(guardian.x_coordinate.to_be_bytes());
            for commitment in guardian.coefficient_commitments.commitments() {
                hasher.update(G::element_to_bytes(commitment));
            }
        }
        hasher.finalize().into()
    }

    /// Checks internal consistency: guardian count, uniqueness of ids and coordinates,
    /// coefficient proofs and the joint public key. Results loaded from untrusted storage
    /// should be verified before use.
    ///
    /// # Errors
    ///
    /// Returns the first failed check.
    pub fn verify(&self) -> Result<(), RecordError> {
        if self.guardians.len() != self.guardian_count {
            return Err(RecordError::GuardianCount {
                expected: self.guardian_count,
                actual: self.guardians.len(),
            });
        }
        let mut seen_ids = HashMap::with_capacity(self.guardians.len());
        for guardian in &self.guardians {
            let seen_x = seen_ids.values().any(|&x| x == guardian.x_coordinate);
            if seen_x || seen_ids.insert(&guardian.guardian_id, guardian.x_coordinate).is_some() {
                return Err(RecordError::DuplicateGuardian(guardian.guardian_id.clone()));
            }
            guardian.to_public_keys().validate(self.quorum)?;
        }
        if Self::joint_element(&self.guardians) != self.joint_public_key.as_element() {
            return Err(RecordError::JointKeyMismatch);
        }
        Ok(())
    }
}

/// Record published at the end of a successful key ceremony.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ElectionInitialized<G: Group> {
    /// Ceremony outcome.
    pub key_ceremony: KeyCeremonyResult<G>,
    /// Extended base hash, hex-encoded.
    pub extended_base_hash: String,
    /// Record metadata.
    pub metadata: Metadata,
}

impl<G: Group> ElectionInitialized<G> {
    pub(crate) fn new(key_ceremony: KeyCeremonyResult<G>, metadata: Metadata) -> Self {
        let extended_base_hash = hex::encode(key_ceremony.extended_base_hash());
        Self {
            key_ceremony,
            extended_base_hash,
            metadata,
        }
    }
}

/// Record published at the end of decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionRecord {
    /// Id of the decrypted tally.
    pub tally_id: String,
    /// Decrypted tally values; `None` for selections that failed to decrypt.
    pub tally: Vec<Option<u64>>,
    /// Decrypted spoiled ballots by ballot id.
    pub spoiled_ballots: BTreeMap<String, Vec<Option<u64>>>,
    /// Ids of guardians that took part in decryption.
    pub decrypting_guardians: Vec<String>,
    /// Ids of guardians compensated for.
    pub missing_guardians: Vec<String>,
    /// Record metadata.
    pub metadata: Metadata,
}

/// Error writing or reading a record.
#[derive(Debug, Error)]
#[error("cannot {action} {record}: {message}")]
pub struct StoreError {
    action: &'static str,
    record: String,
    message: String,
}

impl StoreError {
    /// Creates a new error.
    pub fn new(action: &'static str, record: impl Into<String>, message: impl ToString) -> Self {
        Self {
            action,
            record: record.into(),
            message: message.to_string(),
        }
    }
}

/// Sink for published records.
pub trait Publisher<G: Group>: Send + Sync {
    /// Writes the record of a successful key ceremony.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn write_election_initialized(&self, record: &ElectionInitialized<G>) -> Result<(), StoreError>;

    /// Writes the record of a decryption.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn write_decryption(&self, record: &DecryptionRecord) -> Result<(), StoreError>;
}

/// [`Publisher`] keeping JSON-serialized records in memory.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    election_initialized: Mutex<Option<String>>,
    decryptions: Mutex<Vec<String>>,
}

impl MemoryPublisher {
    /// Creates an empty publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads back the last written [`ElectionInitialized`] record.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored JSON cannot be deserialized.
    pub fn election_initialized<G: Group>(
        &self,
    ) -> Result<Option<ElectionInitialized<G>>, StoreError> {
        let json = self.election_initialized.lock();
        json.as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| StoreError::new("read", "election record", err))
    }

    /// Reads back all written decryption records.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored JSON cannot be deserialized.
    pub fn decryptions(&self) -> Result<Vec<DecryptionRecord>, StoreError> {
        self.decryptions
            .lock()
            .iter()
            .map(|json| serde_json::from_str(json))
            .collect::<Result<_, _>>()
            .map_err(|err| StoreError::new("read", "decryption record", err))
    }
}

impl<G: Group> Publisher<G> for MemoryPublisher {
    fn write_election_initialized(
        &self,
        record: &ElectionInitialized<G>,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)
            .map_err(|err| StoreError::new("write", "election record", err))?;
        *self.election_initialized.lock() = Some(json);
        Ok(())
    }

    fn write_decryption(&self, record: &DecryptionRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)
            .map_err(|err| StoreError::new("write", "decryption record", err))?;
        self.decryptions.lock().push(json);
        Ok(())
    }
}

/// Private storage for guardian state between the key ceremony and decryption.
pub trait TrusteeStore<G: Group>: Send + Sync {
    /// Saves the state of a guardian, replacing earlier state with the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be saved.
    fn save(&self, trustee: &DecryptingTrustee<G>) -> Result<(), StoreError>;

    /// Loads the state of the guardian with the specified id.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored state cannot be read.
    fn load(&self, guardian_id: &str) -> Result<Option<DecryptingTrustee<G>>, StoreError>;
}

/// [`TrusteeStore`] keeping guardian states in memory.
#[derive(Debug)]
pub struct MemoryTrusteeStore<G: Group> {
    trustees: Mutex<BTreeMap<String, DecryptingTrustee<G>>>,
}

impl<G: Group> Default for MemoryTrusteeStore<G> {
    fn default() -> Self {
        Self {
            trustees: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<G: Group> MemoryTrusteeStore<G> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns ids of the stored guardians.
    pub fn guardian_ids(&self) -> Vec<String> {
        self.trustees.lock().keys().cloned().collect()
    }
}

impl<G: Group> TrusteeStore<G> for MemoryTrusteeStore<G> {
    fn save(&self, trustee: &DecryptingTrustee<G>) -> Result<(), StoreError> {
        self.trustees
            .lock()
            .insert(trustee.id().id.clone(), trustee.clone());
        Ok(())
    }

    fn load(&self, guardian_id: &str) -> Result<Option<DecryptingTrustee<G>>, StoreError> {
        Ok(self.trustees.lock().get(guardian_id).cloned())
    }
}

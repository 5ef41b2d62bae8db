//! Decryption coordinator.
//!
//! A [`Decryptor`] waits for `navailable` guardians (at least a quorum) to register, then
//! for every ciphertext:
//!
//! 1. collects direct partial decryptions `M_i = [s_i]A` from present guardians and checks
//!    their Chaum–Pedersen proofs against the guardians' published election keys;
//! 2. for every missing guardian `M`, collects compensated partial decryptions from present
//!    guardians, checks each recovered key share against `M`'s published commitments,
//!    and reconstructs `M`'s contribution by Lagrange interpolation;
//! 3. subtracts the sum of all `N` contributions from the ciphertext data and looks up
//!    the plaintext in a discrete log table.
//!
//! Invalid contributions are dropped and reported; an item fails only if the remaining
//! contributions are insufficient. A present guardian whose direct decryption of an item
//! is dropped is compensated for in the same way as a missing one.

use futures::future;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use crate::{
    ceremony::{RegisteredGuardian, RegistrationError, Registry},
    channel::{call_with_timeout, ChannelError, DecryptingChannel},
    config::{ConfigError, DecryptionConfig},
    decryption::{decrypt_with_partials, recover_missing_decryption},
    group::Group,
    guardian::GuardianId,
    record::{self, GuardianRecord, KeyCeremonyResult, Publisher, RecordError, StoreError},
    Ciphertext, DiscreteLogTable, PublicKey,
};

mod result;

pub use self::result::{
    ContributionKind, DecryptionIssue, DecryptionResult, EncryptedBallot, EncryptedTally,
    ItemError, ItemRef,
};

/// Errors preventing decryption from running.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecryptionError {
    /// The number of available guardians is outside `quorum..=N`.
    #[error(
        "decryption needs between {quorum} and {guardian_count} guardians, \
         but {navailable} are configured"
    )]
    QuorumViolation {
        /// Configured number of available guardians.
        navailable: usize,
        /// Quorum of the key ceremony.
        quorum: usize,
        /// Number of guardians in the key ceremony.
        guardian_count: usize,
    },
    /// The configuration is invalid.
    #[error(transparent)]
    Config(ConfigError),
    /// The key ceremony result is inconsistent.
    #[error("invalid key ceremony result: {0}")]
    InvalidKeyCeremony(#[source] RecordError),
    /// Decryption was already run.
    #[error("decryption was already run")]
    AlreadyStarted,
    /// Two spoiled ballots share an id.
    #[error("spoiled ballot '{0}' is supplied more than once")]
    DuplicateBallot(String),
    /// The decryption record could not be published.
    #[error(transparent)]
    Publish(#[from] StoreError),
}

impl From<ConfigError> for DecryptionError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::InvalidAvailable {
                navailable,
                quorum,
                guardian_count,
            } => Self::QuorumViolation {
                navailable,
                quorum,
                guardian_count,
            },
            other => Self::Config(other),
        }
    }
}

#[derive(Clone)]
struct Participant<G: Group> {
    channel: Arc<dyn DecryptingChannel<G>>,
    election_public_key: G::Element,
}

/// Guardian whose contribution has to be reconstructed from compensated decryptions.
struct CompensationTarget<'a, G: Group> {
    record: &'a GuardianRecord<G>,
    /// Index among present guardians, if the guardian is present but some of its
    /// direct decryptions were dropped.
    present_index: Option<usize>,
}

/// Coordinator of threshold decryption.
pub struct Decryptor<G: Group> {
    config: DecryptionConfig,
    key_ceremony: KeyCeremonyResult<G>,
    extended_base_hash: [u8; 32],
    registry: Registry<Participant<G>>,
    lookup_table: DiscreteLogTable<G>,
    started: Mutex<bool>,
    publisher: Option<Arc<dyn Publisher<G>>>,
}

impl<G: Group> std::fmt::Debug for Decryptor<G> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Decryptor")
            .field("config", &self.config)
            .field("guardian_count", &self.key_ceremony.guardian_count)
            .field("quorum", &self.key_ceremony.quorum)
            .field("registered", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl<G: Group> Decryptor<G> {
    /// Creates a decryptor for the outcome of a key ceremony.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptionError::QuorumViolation`] if `navailable` is not in `quorum..=N`,
    /// or an error if the key ceremony result is inconsistent.
    pub fn new(
        key_ceremony: KeyCeremonyResult<G>,
        config: DecryptionConfig,
    ) -> Result<Self, DecryptionError> {
        config.validate(key_ceremony.guardian_count, key_ceremony.quorum)?;
        key_ceremony
            .verify()
            .map_err(DecryptionError::InvalidKeyCeremony)?;

        let registry = Registry::new(config.navailable, config.id_collision_rule);
        let lookup_table = DiscreteLogTable::new(0..=config.max_plaintext);
        Ok(Self {
            extended_base_hash: key_ceremony.extended_base_hash(),
            config,
            key_ceremony,
            registry,
            lookup_table,
            started: Mutex::new(false),
            publisher: None,
        })
    }

    /// Sets the publisher the decryption record is written to.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher<G>>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Returns the extended base hash the decryption proofs are bound to.
    pub fn extended_base_hash(&self) -> &[u8; 32] {
        &self.extended_base_hash
    }

    /// Registers a guardian. The supplied x-coordinate and election public key must match
    /// the key ceremony record of the guardian.
    ///
    /// # Errors
    ///
    /// Returns an error if the guardian is unknown, its data does not match the key ceremony,
    /// it is already registered, or
    /// `navailable` guardians are already registered.
    pub fn register<C>(
        &self,
        id: &str,
        x_coordinate: u32,
        election_public_key: &PublicKey<G>,
        channel: Arc<C>,
    ) -> Result<GuardianId, RegistrationError>
    where
        C: DecryptingChannel<G> + 'static,
    {
        let result = self
            .registry
            .register(id, Some(x_coordinate), |guardian_id| {
                let record = self
                    .key_ceremony
                    .guardian(&guardian_id.id)
                    .ok_or_else(|| RegistrationError::UnknownGuardian(guardian_id.id.clone()))?;
                if record.x_coordinate != x_coordinate {
                    return Err(RegistrationError::RecordMismatch {
                        id: guardian_id.id.clone(),
                        mismatch: "x-coordinate",
                    });
                }
                let expected_key = record.election_public_key();
                if expected_key != *election_public_key {
                    return Err(RegistrationError::RecordMismatch {
                        id: guardian_id.id.clone(),
                        mismatch: "election public key",
                    });
                }
                Ok(Participant {
                    channel,
                    election_public_key: expected_key.as_element(),
                })
            });

        match &result {
            Ok(guardian_id) => info!(
                guardian = %guardian_id.id,
                x = x_coordinate,
                "registered decrypting guardian"
            ),
            Err(err) => warn!(guardian = id, %err, "rejected decrypting guardian"),
        }
        result
    }

    /// Returns ids of guardians registered so far.
    pub fn registered(&self) -> Vec<String> {
        self.registry
            .guardians()
            .into_iter()
            .map(|guardian| guardian.id.id)
            .collect()
    }

    /// Returns ids of key ceremony guardians that are not registered.
    pub fn missing_guardians(&self) -> Vec<String> {
        let present = self.registered();
        self.key_ceremony
            .guardian_ids()
            .filter(|id| !present.iter().any(|present_id| present_id == id))
            .map(str::to_owned)
            .collect()
    }

    /// Waits until `navailable` guardians are registered.
    pub async fn wait_for_guardians(&self) {
        self.registry.wait_until_ready().await;
    }

    /// Decrypts `tally` and, if enabled in the configuration, `spoiled` ballots. Waits for
    /// `navailable` guardians to register first. Every present guardian is notified via
    /// [`DecryptingChannel::finish()`] afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if decryption was already run, spoiled ballot ids are not unique,
    /// or the result cannot be published. Failures of individual items are reported
    /// in [`DecryptionResult::issues`].
    pub async fn decrypt(
        &self,
        tally: &EncryptedTally<G>,
        spoiled: &[EncryptedBallot<G>],
    ) -> Result<DecryptionResult, DecryptionError> {
        if self.config.decrypt_spoiled {
            let mut ballot_ids = BTreeSet::new();
            if let Some(ballot) = spoiled.iter().find(|b| !ballot_ids.insert(&b.ballot_id)) {
                return Err(DecryptionError::DuplicateBallot(ballot.ballot_id.clone()));
            }
        }
        self.wait_for_guardians().await;
        {
            let mut started = self.started.lock();
            if *started {
                return Err(DecryptionError::AlreadyStarted);
            }
            *started = true;
        }
        self.registry.close();

        let present = self.registry.guardians();
        let missing: Vec<_> = self
            .key_ceremony
            .guardians
            .iter()
            .filter(|record| !present.iter().any(|p| p.id.id == record.guardian_id))
            .collect();
        info!(
            present = present.len(),
            missing = missing.len(),
            quorum = self.key_ceremony.quorum,
            "starting decryption"
        );

        let mut items = Vec::with_capacity(tally.ciphertexts.len());
        let mut ciphertexts = tally.ciphertexts.clone();
        items.extend((0..tally.ciphertexts.len()).map(ItemRef::Tally));
        if self.config.decrypt_spoiled {
            for ballot in spoiled {
                items.extend((0..ballot.ciphertexts.len()).map(|index| ItemRef::Spoiled {
                    ballot_id: ballot.ballot_id.clone(),
                    index,
                }));
                ciphertexts.extend_from_slice(&ballot.ciphertexts);
            }
        } else if !spoiled.is_empty() {
            debug!(count = spoiled.len(), "spoiled ballot decryption is disabled");
        }

        let mut issues = vec![];
        let direct = self
            .direct_decryptions(&present, &ciphertexts, &items, &mut issues)
            .await;

        let mut targets: Vec<_> = missing
            .iter()
            .map(|&record| CompensationTarget {
                record,
                present_index: None,
            })
            .collect();
        for (i, guardian) in present.iter().enumerate() {
            if direct[i].iter().any(Option::is_none) {
                let record = self.key_ceremony.guardian(&guardian.id.id);
                targets.extend(record.map(|record| CompensationTarget {
                    record,
                    present_index: Some(i),
                }));
            }
        }
        let compensated = self
            .compensated_decryptions(&present, &targets, &ciphertexts, &items, &mut issues)
            .await;

        let values: Vec<_> = ciphertexts
            .iter()
            .enumerate()
            .map(|(k, ciphertext)| {
                self.combine(k, ciphertext, &direct, &targets, &compensated)
                    .map_err(|error| {
                        warn!(item = %items[k], %error, "cannot decrypt item");
                        issues.push(DecryptionIssue {
                            item: Some(items[k].clone()),
                            fatal: true,
                            error,
                        });
                    })
                    .ok()
            })
            .collect();

        let mut values = values.into_iter();
        let tally_values: Vec<_> = values.by_ref().take(tally.ciphertexts.len()).collect();
        let mut spoiled_ballots = BTreeMap::new();
        if self.config.decrypt_spoiled {
            for ballot in spoiled {
                let ballot_values = values.by_ref().take(ballot.ciphertexts.len()).collect();
                spoiled_ballots.insert(ballot.ballot_id.clone(), ballot_values);
            }
        }

        let result = DecryptionResult {
            tally_id: tally.tally_id.clone(),
            tally: tally_values,
            spoiled_ballots,
            decrypting_guardians: present.iter().map(|p| p.id.id.clone()).collect(),
            missing_guardians: missing.iter().map(|r| r.guardian_id.clone()).collect(),
            issues,
            metadata: record::metadata(
                &self.config.created_by,
                self.config.created_from.as_deref(),
            ),
        };
        let all_ok = result.is_complete();
        info!(
            complete = all_ok,
            issues = result.issues.len(),
            "decryption finished"
        );

        self.finish_all(&present, all_ok).await;
        if let Some(publisher) = &self.publisher {
            publisher.write_decryption(&result.to_record())?;
        }
        Ok(result)
    }

    /// Returns valid direct partial decryptions indexed by present guardian, then by item.
    async fn direct_decryptions(
        &self,
        present: &[RegisteredGuardian<Participant<G>>],
        ciphertexts: &[Ciphertext<G>],
        items: &[ItemRef],
        issues: &mut Vec<DecryptionIssue>,
    ) -> Vec<Vec<Option<G::Element>>> {
        let timeout = self.config.rpc_timeout();
        let calls = present.iter().map(|guardian| {
            call_with_timeout(
                timeout,
                guardian
                    .value
                    .channel
                    .direct_decrypt(ciphertexts, &self.extended_base_hash),
            )
        });
        let responses = future::join_all(calls).await;

        present
            .iter()
            .zip(responses)
            .map(|(guardian, response)| {
                let guardian_id = &guardian.id.id;
                let response =
                    self.check_response(guardian_id, "direct decrypt", response, ciphertexts.len());
                let decryptions = match response {
                    Ok(decryptions) => decryptions,
                    Err(error) => {
                        report(issues, None, error);
                        return vec![None; ciphertexts.len()];
                    }
                };

                decryptions
                    .iter()
                    .zip(ciphertexts)
                    .enumerate()
                    .map(|(k, (decryption, ciphertext))| {
                        let verification = decryption.verify(
                            ciphertext,
                            guardian.value.election_public_key,
                            guardian_id,
                            &self.extended_base_hash,
                        );
                        match verification {
                            Ok(()) => Some(decryption.partial_decryption),
                            Err(source) => {
                                let error = ItemError::InvalidDirectDecryption {
                                    guardian: guardian_id.clone(),
                                    source,
                                };
                                report(issues, Some(&items[k]), error);
                                None
                            }
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Returns valid compensated partial decryptions indexed by target, then by item, as
    /// `(x-coordinate of compensating guardian, partial decryption)` pairs.
    async fn compensated_decryptions(
        &self,
        present: &[RegisteredGuardian<Participant<G>>],
        targets: &[CompensationTarget<'_, G>],
        ciphertexts: &[Ciphertext<G>],
        items: &[ItemRef],
        issues: &mut Vec<DecryptionIssue>,
    ) -> Vec<Vec<Vec<(u32, G::Element)>>> {
        let timeout = self.config.rpc_timeout();
        let calls = targets.iter().enumerate().flat_map(|(t, target)| {
            present
                .iter()
                .filter(move |guardian| guardian.id.id != target.record.guardian_id)
                .map(move |guardian| {
                    let call = guardian.value.channel.compensated_decrypt(
                        &target.record.guardian_id,
                        ciphertexts,
                        &self.extended_base_hash,
                    );
                    async move { (t, guardian, call_with_timeout(timeout, call).await) }
                })
        });
        let responses = future::join_all(calls).await;

        let mut compensated = vec![vec![vec![]; ciphertexts.len()]; targets.len()];
        for (t, guardian, response) in responses {
            let target = &targets[t];
            let guardian_id = &guardian.id.id;
            let missing_id = &target.record.guardian_id;
            let response = self.check_response(
                guardian_id,
                "compensated decrypt",
                response,
                ciphertexts.len(),
            );
            let decryptions = match response {
                Ok(decryptions) => decryptions,
                Err(error) => {
                    report(issues, None, error);
                    continue;
                }
            };

            let x = guardian.id.x_coordinate;
            let expected_key_share = target.record.coefficient_commitments.value_at(x);
            for (k, (decryption, ciphertext)) in decryptions.iter().zip(ciphertexts).enumerate() {
                let verification = decryption.verify(
                    ciphertext,
                    expected_key_share,
                    guardian_id,
                    missing_id,
                    &self.extended_base_hash,
                );
                match verification {
                    Ok(()) => compensated[t][k].push((x, decryption.partial_decryption)),
                    Err(source) => {
                        let error = ItemError::InvalidCompensatedDecryption {
                            guardian: guardian_id.clone(),
                            missing: missing_id.clone(),
                            source,
                        };
                        report(issues, Some(&items[k]), error);
                    }
                }
            }
        }
        compensated
    }

    fn check_response<T>(
        &self,
        guardian_id: &str,
        operation: &'static str,
        response: Result<Vec<T>, ChannelError>,
        expected_len: usize,
    ) -> Result<Vec<T>, ItemError> {
        let decryptions = response.map_err(|source| ItemError::Channel {
            guardian: guardian_id.to_owned(),
            operation,
            source,
        })?;
        if decryptions.len() == expected_len {
            Ok(decryptions)
        } else {
            Err(ItemError::ResponseLength {
                guardian: guardian_id.to_owned(),
                expected: expected_len,
                actual: decryptions.len(),
            })
        }
    }

    fn combine(
        &self,
        k: usize,
        ciphertext: &Ciphertext<G>,
        direct: &[Vec<Option<G::Element>>],
        targets: &[CompensationTarget<'_, G>],
        compensated: &[Vec<Vec<(u32, G::Element)>>],
    ) -> Result<u64, ItemError> {
        let quorum = self.key_ceremony.quorum;
        let mut partials: Vec<_> = direct.iter().filter_map(|row| row[k]).collect();
        if partials.len() < quorum {
            return Err(ItemError::InsufficientContributions {
                kind: ContributionKind::Direct,
                valid: partials.len(),
                quorum,
            });
        }

        for (t, target) in targets.iter().enumerate() {
            if let Some(i) = target.present_index {
                if direct[i][k].is_some() {
                    continue;
                }
            }
            let missing_id = &target.record.guardian_id;
            let contributions = &compensated[t][k];
            if contributions.len() < quorum {
                return Err(ItemError::InsufficientContributions {
                    kind: ContributionKind::CompensatingFor(missing_id.clone()),
                    valid: contributions.len(),
                    quorum,
                });
            }
            let recovered = recover_missing_decryption::<G>(contributions).map_err(|source| {
                ItemError::Interpolation {
                    missing: missing_id.clone(),
                    source,
                }
            })?;
            partials.push(recovered);
        }

        decrypt_with_partials(ciphertext, partials, &self.lookup_table)
            .ok_or(ItemError::PlaintextOutOfRange)
    }

    async fn finish_all(&self, present: &[RegisteredGuardian<Participant<G>>], all_ok: bool) {
        let timeout = self.config.rpc_timeout();
        let notifications = present.iter().map(|guardian| async move {
            let channel = &guardian.value.channel;
            let result = call_with_timeout(timeout, channel.finish(all_ok)).await;
            channel.shutdown().await;
            (guardian, result)
        });
        for (guardian, result) in future::join_all(notifications).await {
            if let Err(err) = result {
                warn!(guardian = %guardian.id.id, %err, "guardian did not finish cleanly");
            }
        }
    }
}

fn report(issues: &mut Vec<DecryptionIssue>, item: Option<&ItemRef>, error: ItemError) {
    match item {
        Some(item) => warn!(%item, %error, "dropped contribution"),
        None => warn!(%error, "dropped guardian response"),
    }
    issues.push(DecryptionIssue {
        item: item.cloned(),
        fatal: false,
        error,
    });
}

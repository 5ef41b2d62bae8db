//! Key ceremony coordinator.
//!
//! The coordinator registers `N` guardians, relays [`PublicKeys`] and secret key shares
//! between every ordered pair of them, asks every guardian to save its state and finally
//! publishes the joint election key. The coordinator never sees secret material: shares
//! travel encrypted for their designated guardians.
//!
//! Any failure (an invalid proof, a guardian error, a timeout) aborts the ceremony.
//! Regardless of the outcome, every registered guardian is notified via
//! [`KeyCeremonyChannel::finish()`] and its channel is shut down.

use futures::future;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use std::{future::Future, sync::Arc};

use crate::{
    channel::{call_with_timeout, ChannelError, KeyCeremonyChannel},
    config::{CeremonyConfig, ConfigError},
    group::Group,
    guardian::{GuardianError, GuardianId, PublicKeys},
    record::{self, ElectionInitialized, GuardianRecord, KeyCeremonyResult, Publisher, StoreError},
};

mod registry;

pub use self::registry::{RegisteredGuardian, RegistrationError, Registry};

/// Response to a successful key ceremony registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Registered guardian id.
    pub guardian_id: String,
    /// Assigned x-coordinate.
    pub x_coordinate: u32,
    /// Quorum of the ceremony; the guardian's polynomial must have this many coefficients.
    pub quorum: usize,
    /// Name of the group used in the ceremony.
    pub group_name: String,
}

impl Registration {
    fn new<G: Group>(id: &GuardianId, quorum: usize) -> Self {
        Self {
            guardian_id: id.id.clone(),
            x_coordinate: id.x_coordinate,
            quorum,
            group_name: G::NAME.to_owned(),
        }
    }

    /// Returns the identity of the registered guardian.
    pub fn identity(&self) -> GuardianId {
        GuardianId::new(self.guardian_id.clone(), self.x_coordinate)
    }
}

/// State of a [`KeyCeremony`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyState {
    /// Guardians are registering.
    Registering,
    /// Public keys and secret key shares are being exchanged.
    Exchanging,
    /// Guardians are saving their state.
    Verifying,
    /// The ceremony has succeeded and its result is published.
    Published,
    /// The ceremony has failed.
    Failed,
}

/// Errors aborting a key ceremony.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CeremonyError {
    /// The ceremony was already run.
    #[error("key ceremony was already run")]
    AlreadyRun,
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
    /// Public keys of a guardian are invalid.
    #[error("invalid public keys from guardian '{guardian}': {source}")]
    InvalidPublicKeys {
        /// Guardian id.
        guardian: String,
        /// Validation error.
        #[source]
        source: GuardianError,
    },
    /// A guardian answered on behalf of someone else.
    #[error("guardian {expected} answered as {actual}")]
    IdentityMismatch {
        /// Registered identity.
        expected: GuardianId,
        /// Identity claimed in the response.
        actual: GuardianId,
    },
    /// The result could not be published.
    #[error(transparent)]
    Publish(#[from] StoreError),
}

type ChannelRef<G> = Arc<dyn KeyCeremonyChannel<G>>;

/// Coordinator of the key ceremony.
pub struct KeyCeremony<G: Group> {
    config: CeremonyConfig,
    registry: Registry<ChannelRef<G>>,
    state: Mutex<CeremonyState>,
    publisher: Option<Arc<dyn Publisher<G>>>,
}

impl<G: Group> std::fmt::Debug for KeyCeremony<G> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("KeyCeremony")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .field("registered", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl<G: Group> KeyCeremony<G> {
    /// Creates a coordinator.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn new(config: CeremonyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = Registry::new(config.guardian_count, config.id_collision_rule);
        Ok(Self {
            config,
            registry,
            state: Mutex::new(CeremonyState::Registering),
            publisher: None,
        })
    }

    /// Sets the publisher the [`ElectionInitialized`] record is written to.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher<G>>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CeremonyConfig {
        &self.config
    }

    /// Returns the current state.
    pub fn state(&self) -> CeremonyState {
        *self.state.lock()
    }

    /// Returns registered guardians in registration order.
    pub fn registered(&self) -> Vec<GuardianId> {
        self.registry
            .guardians()
            .into_iter()
            .map(|guardian| guardian.id)
            .collect()
    }

    /// Registers a guardian with id `id`. `connect` is called with the registration details
    /// to open the channel to the guardian; it is only called if registration succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the id collides with a registered guardian or all `N`
    /// guardians are already registered.
    pub fn register<C, F>(&self, id: &str, connect: F) -> Result<Registration, RegistrationError>
    where
        C: KeyCeremonyChannel<G> + 'static,
        F: FnOnce(&Registration) -> Arc<C>,
    {
        let quorum = self.config.quorum;
        let result = self.registry.register(id, None, |guardian_id| {
            let channel: ChannelRef<G> = connect(&Registration::new::<G>(guardian_id, quorum));
            Ok(channel)
        });
        match result {
            Ok(guardian_id) => {
                info!(
                    guardian = %guardian_id.id,
                    x = guardian_id.x_coordinate,
                    "registered guardian"
                );
                Ok(Registration::new::<G>(&guardian_id, quorum))
            }
            Err(err) => {
                warn!(guardian = id, %err, "rejected guardian registration");
                Err(err)
            }
        }
    }

    /// Waits until all `N` guardians are registered.
    pub async fn wait_for_guardians(&self) {
        self.registry.wait_until_ready().await;
    }

    /// Runs the ceremony once all `N` guardians are registered.
    ///
    /// # Errors
    ///
    /// Returns the first error that aborted the ceremony.
    pub async fn run(&self) -> Result<KeyCeremonyResult<G>, CeremonyError> {
        self.wait_for_guardians().await;
        {
            let mut state = self.state.lock();
            if *state != CeremonyState::Registering {
                return Err(CeremonyError::AlreadyRun);
            }
            *state = CeremonyState::Exchanging;
        }
        self.registry.close();

        let guardians = self.registry.guardians();
        info!(
            guardians = guardians.len(),
            quorum = self.config.quorum,
            group = G::NAME,
            "starting key ceremony"
        );

        let outcome = self.exchange_and_publish(&guardians).await;
        let all_ok = outcome.is_ok();
        *self.state.lock() = if all_ok {
            CeremonyState::Published
        } else {
            CeremonyState::Failed
        };
        if let Err(err) = &outcome {
            error!(%err, "key ceremony failed");
        }

        self.finish_all(&guardians, all_ok).await;
        outcome
    }

    async fn call<T>(
        &self,
        guardian: &GuardianId,
        operation: &'static str,
        call: impl Future<Output = Result<T, ChannelError>>,
    ) -> Result<T, CeremonyError> {
        call_with_timeout(self.config.rpc_timeout(), call)
            .await
            .map_err(|source| {
                warn!(guardian = %guardian.id, operation, %source, "guardian call failed");
                CeremonyError::Channel {
                    guardian: guardian.id.clone(),
                    operation,
                    source,
                }
            })
    }

    async fn exchange_and_publish(
        &self,
        guardians: &[RegisteredGuardian<ChannelRef<G>>],
    ) -> Result<KeyCeremonyResult<G>, CeremonyError> {
        let mut all_keys = Vec::with_capacity(guardians.len());
        for guardian in guardians {
            let keys = self
                .call(&guardian.id, "send public keys", guardian.value.send_public_keys())
                .await?;
            self.check_public_keys(&guardian.id, &keys)?;
            all_keys.push(keys);
        }

        for (sender, keys) in guardians.iter().zip(&all_keys) {
            for receiver in guardians.iter().filter(|other| other.id != sender.id) {
                self.call(
                    &receiver.id,
                    "receive public keys",
                    receiver.value.receive_public_keys(keys.clone()),
                )
                .await?;
            }
        }
        debug!("public keys exchanged");

        for sender in guardians {
            for receiver in guardians.iter().filter(|other| other.id != sender.id) {
                let share = self
                    .call(
                        &sender.id,
                        "send secret key share",
                        sender.value.send_secret_key_share(&receiver.id.id),
                    )
                    .await?;
                if share.generating_guardian_id != sender.id.id {
                    return Err(CeremonyError::IdentityMismatch {
                        expected: sender.id.clone(),
                        actual: GuardianId {
                            id: share.generating_guardian_id,
                            x_coordinate: sender.id.x_coordinate,
                        },
                    });
                }
                if share.designated() != receiver.id {
                    return Err(CeremonyError::IdentityMismatch {
                        expected: receiver.id.clone(),
                        actual: share.designated(),
                    });
                }
                self.call(
                    &receiver.id,
                    "receive secret key share",
                    receiver.value.receive_secret_key_share(share),
                )
                .await?;
            }
        }
        debug!("secret key shares exchanged");

        *self.state.lock() = CeremonyState::Verifying;
        let saves = guardians.iter().map(|guardian| {
            self.call(&guardian.id, "save state", guardian.value.save_state())
        });
        future::join_all(saves)
            .await
            .into_iter()
            .collect::<Result<Vec<()>, _>>()?;

        let records = all_keys.into_iter().map(GuardianRecord::from).collect();
        let result = KeyCeremonyResult::new(self.config.quorum, records);
        if let Some(publisher) = &self.publisher {
            let metadata =
                record::metadata(&self.config.created_by, self.config.created_from.as_deref());
            publisher.write_election_initialized(&ElectionInitialized::new(
                result.clone(),
                metadata,
            ))?;
        }
        info!(joint_public_key = ?result.joint_public_key, "key ceremony succeeded");
        Ok(result)
    }

    fn check_public_keys(
        &self,
        owner: &GuardianId,
        keys: &PublicKeys<G>,
    ) -> Result<(), CeremonyError> {
        let claimed = keys.owner();
        if claimed != *owner {
            return Err(CeremonyError::IdentityMismatch {
                expected: owner.clone(),
                actual: claimed,
            });
        }
        keys.validate(self.config.quorum)
            .map_err(|source| CeremonyError::InvalidPublicKeys {
                guardian: owner.id.clone(),
                source,
            })
    }

    async fn finish_all(&self, guardians: &[RegisteredGuardian<ChannelRef<G>>], all_ok: bool) {
        let notifications = guardians.iter().map(|guardian| async move {
            let result = self
                .call(&guardian.id, "finish", guardian.value.finish(all_ok))
                .await;
            guardian.value.shutdown().await;
            (guardian, result)
        });
        for (guardian, result) in future::join_all(notifications).await {
            match result {
                Ok(()) => debug!(guardian = %guardian.id.id, all_ok, "guardian finished"),
                Err(err) => {
                    warn!(guardian = %guardian.id.id, %err, "guardian did not finish cleanly");
                }
            }
        }
    }
}

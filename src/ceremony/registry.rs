//! Single-writer registry of guardians shared by both coordinators.

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;

use crate::{config::IdCollisionRule, guardian::GuardianId};

/// Errors registering a guardian.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RegistrationError {
    /// The protocol has already started; no further guardians are accepted.
    #[error("registration is closed")]
    AlreadyStarted,
    /// The guardian id is empty.
    #[error("guardian id must not be empty")]
    EmptyId,
    /// The guardian id collides with an already registered one.
    #[error("guardian id '{id}' collides with registered guardian '{existing}'")]
    DuplicateId {
        /// Rejected id.
        id: String,
        /// Registered id it collides with.
        existing: String,
    },
    /// The x-coordinate is already taken by another guardian.
    #[error("x-coordinate {0} is already taken")]
    DuplicateCoordinate(u32),
    /// The x-coordinate is zero.
    #[error("x-coordinate must be positive")]
    ZeroCoordinate,
    /// The guardian did not take part in the key ceremony.
    #[error("guardian '{0}' did not take part in the key ceremony")]
    UnknownGuardian(String),
    /// Registration data differs from the key ceremony record of the guardian.
    #[error("registration of guardian '{id}' does not match the key ceremony: {mismatch}")]
    RecordMismatch {
        /// Guardian id.
        id: String,
        /// Mismatched field.
        mismatch: &'static str,
    },
}

/// Registered guardian together with a payload, such as a channel to it.
#[derive(Debug, Clone)]
pub struct RegisteredGuardian<T> {
    /// Identity of the guardian.
    pub id: GuardianId,
    /// Payload supplied on registration.
    pub value: T,
}

#[derive(Debug)]
struct RegistryState<T> {
    guardians: Vec<RegisteredGuardian<T>>,
    closed: bool,
}

/// Registry accepting up to `capacity` guardians.
///
/// All mutations go through a single lock; the number of registered guardians is
/// additionally broadcast over a watch channel so that waiters are woken up without
/// polling. The registry closes automatically once `capacity` guardians are registered.
#[derive(Debug)]
pub struct Registry<T> {
    capacity: usize,
    rule: IdCollisionRule,
    state: Mutex<RegistryState<T>>,
    count: watch::Sender<usize>,
}

impl<T: Clone> Registry<T> {
    /// Creates an empty registry.
    pub fn new(capacity: usize, rule: IdCollisionRule) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            capacity,
            rule,
            state: Mutex::new(RegistryState {
                guardians: Vec::with_capacity(capacity),
                closed: capacity == 0,
            }),
            count,
        }
    }

    /// Returns the number of guardians the registry accepts.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Registers a guardian. If `x_coordinate` is `None`, the next 1-based index is assigned.
    /// `make_value` is called under the registry lock once all checks have passed; if it
    /// fails, the registry is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is closed, the id collides with a registered one,
    /// the x-coordinate is invalid or taken, or `make_value` fails.
    pub fn register<F>(
        &self,
        id: &str,
        x_coordinate: Option<u32>,
        make_value: F,
    ) -> Result<GuardianId, RegistrationError>
    where
        F: FnOnce(&GuardianId) -> Result<T, RegistrationError>,
    {
        if id.is_empty() {
            return Err(RegistrationError::EmptyId);
        }

        let mut state = self.state.lock();
        if state.closed {
            return Err(RegistrationError::AlreadyStarted);
        }
        if let Some(existing) = state
            .guardians
            .iter()
            .find(|guardian| self.rule.collides(id, &guardian.id.id))
        {
            return Err(RegistrationError::DuplicateId {
                id: id.to_owned(),
                existing: existing.id.id.clone(),
            });
        }

        let x_coordinate = match x_coordinate {
            Some(0) => return Err(RegistrationError::ZeroCoordinate),
            Some(x) => x,
            None => u32::try_from(state.guardians.len() + 1)
                .map_err(|_| RegistrationError::AlreadyStarted)?,
        };
        if state
            .guardians
            .iter()
            .any(|guardian| guardian.id.x_coordinate == x_coordinate)
        {
            return Err(RegistrationError::DuplicateCoordinate(x_coordinate));
        }

        let guardian_id = GuardianId::new(id, x_coordinate);
        let value = make_value(&guardian_id)?;
        state.guardians.push(RegisteredGuardian {
            id: guardian_id.clone(),
            value,
        });
        let count = state.guardians.len();
        if count >= self.capacity {
            state.closed = true;
        }
        drop(state);

        self.count.send_replace(count);
        Ok(guardian_id)
    }

    /// Closes the registry; further registrations fail with [`RegistrationError::AlreadyStarted`].
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// Checks whether the registry is closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Returns the number of registered guardians.
    pub fn len(&self) -> usize {
        *self.count.borrow()
    }

    /// Checks whether no guardians are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of registered guardians in registration order.
    pub fn guardians(&self) -> Vec<RegisteredGuardian<T>> {
        self.state.lock().guardians.clone()
    }

    /// Waits until the registry is full.
    pub async fn wait_until_ready(&self) {
        let mut count = self.count.subscribe();
        while *count.borrow_and_update() < self.capacity {
            if count.changed().await.is_err() {
                break;
            }
        }
    }
}

//! Guardian state during the key ceremony.

use rand_core::{CryptoRng, RngCore};
use tracing::debug;

use std::collections::BTreeMap;

use crate::{
    group::Group,
    guardian::{
        coefficient_transcript, DecryptingTrustee, GuardianError, GuardianId, HashedCiphertext,
        PublicKeys, SecretKeyShare,
    },
    sharing::SecretPolynomial,
    Keypair, SecretKey,
};

/// Guardian participating in the key ceremony.
///
/// The guardian owns a secret polynomial of degree `quorum - 1`. It publishes
/// [`PublicKeys`] for the polynomial, verifies public keys of other guardians,
/// and exchanges [`SecretKeyShare`]s with them. Once every guardian it knows about
/// has supplied a valid share, the guardian can be turned into a [`DecryptingTrustee`].
#[derive(Debug)]
pub struct KeyCeremonyGuardian<G: Group> {
    id: GuardianId,
    quorum: usize,
    polynomial: SecretPolynomial<G>,
    election_keys: Keypair<G>,
    public_keys: PublicKeys<G>,
    others: BTreeMap<String, PublicKeys<G>>,
    shares: BTreeMap<String, SecretKey<G>>,
}

impl<G: Group> KeyCeremonyGuardian<G> {
    /// Creates a guardian with a freshly generated polynomial.
    ///
    /// # Panics
    ///
    /// Panics if `quorum` is zero.
    pub fn new<R: CryptoRng + RngCore>(id: GuardianId, quorum: usize, rng: &mut R) -> Self {
        assert!(quorum > 0, "quorum must be positive");

        let polynomial = SecretPolynomial::<G>::generate(quorum, rng);
        let coefficient_proofs = polynomial.prove_coefficients(
            |j| coefficient_transcript(&id.id, id.x_coordinate, j),
            rng,
        );
        let public_keys = PublicKeys {
            guardian_id: id.id.clone(),
            x_coordinate: id.x_coordinate,
            coefficient_commitments: polynomial.commitments(),
            coefficient_proofs,
        };
        let election_keys = Keypair::from(polynomial.value_at_zero().clone());

        Self {
            id,
            quorum,
            polynomial,
            election_keys,
            public_keys,
            others: BTreeMap::new(),
            shares: BTreeMap::new(),
        }
    }

    /// Returns the identity of this guardian.
    pub fn id(&self) -> &GuardianId {
        &self.id
    }

    /// Returns the quorum this guardian was created for.
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Returns public keys of this guardian.
    pub fn public_keys(&self) -> PublicKeys<G> {
        self.public_keys.clone()
    }

    /// Returns ids of the guardians whose public keys were received.
    pub fn known_guardians(&self) -> impl Iterator<Item = &str> + '_ {
        self.others.keys().map(String::as_str)
    }

    /// Validates and stores public keys of another guardian. Receiving the same keys
    /// twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the keys belong to this guardian, fail validation or conflict
    /// with previously received keys of the same guardian.
    pub fn receive_public_keys(&mut self, keys: PublicKeys<G>) -> Result<(), GuardianError> {
        if keys.guardian_id == self.id.id {
            return Err(GuardianError::SelfMessage(keys.guardian_id));
        }
        keys.validate(self.quorum)?;

        if let Some(existing) = self.others.get(&keys.guardian_id) {
            let same = existing.x_coordinate == keys.x_coordinate
                && existing.coefficient_commitments == keys.coefficient_commitments;
            return if same {
                Ok(())
            } else {
                Err(GuardianError::ConflictingPublicKeys(keys.guardian_id))
            };
        }

        debug!(guardian = %self.id.id, from = %keys.guardian_id, "received public keys");
        self.others.insert(keys.guardian_id.clone(), keys);
        Ok(())
    }

    /// Creates a share of this guardian's polynomial for the guardian `designated_id`,
    /// encrypted with the designated guardian's election public key.
    ///
    /// # Errors
    ///
    /// Returns an error if public keys of the designated guardian were not received.
    pub fn secret_key_share_for<R: CryptoRng + RngCore>(
        &self,
        designated_id: &str,
        rng: &mut R,
    ) -> Result<SecretKeyShare<G>, GuardianError> {
        if designated_id == self.id.id {
            return Err(GuardianError::SelfMessage(designated_id.to_owned()));
        }
        let designated_keys = self
            .others
            .get(designated_id)
            .ok_or_else(|| GuardianError::UnknownGuardian(designated_id.to_owned()))?;
        let designated = designated_keys.owner();

        let value = self.polynomial.value_at(designated.x_coordinate);
        let associated_data = SecretKeyShare::<G>::associated_data(&self.id.id, &designated);
        let encrypted_coordinate = HashedCiphertext::encrypt(
            &value,
            &designated_keys.election_public_key(),
            &associated_data,
            rng,
        );

        Ok(SecretKeyShare {
            generating_guardian_id: self.id.id.clone(),
            designated_guardian_id: designated.id,
            designated_x_coordinate: designated.x_coordinate,
            encrypted_coordinate,
        })
    }

    /// Decrypts and validates a share generated by another guardian for this guardian.
    ///
    /// # Errors
    ///
    /// Returns an error if the share is designated for another guardian, the generating
    /// guardian is unknown, the share cannot be decrypted or does not match the generating
    /// guardian's commitments, or a different valid share was already received.
    pub fn receive_secret_key_share(
        &mut self,
        share: SecretKeyShare<G>,
    ) -> Result<(), GuardianError> {
        let designated = share.designated();
        if designated != self.id {
            return Err(GuardianError::WrongRecipient {
                expected: self.id.clone(),
                actual: designated,
            });
        }
        let generating_id = &share.generating_guardian_id;
        if *generating_id == self.id.id {
            return Err(GuardianError::SelfMessage(generating_id.clone()));
        }
        let generating_keys = self
            .others
            .get(generating_id)
            .ok_or_else(|| GuardianError::UnknownGuardian(generating_id.clone()))?;

        let associated_data = SecretKeyShare::<G>::associated_data(generating_id, &self.id);
        let value = share
            .encrypted_coordinate
            .decrypt(self.election_keys.secret(), &associated_data)
            .ok_or_else(|| GuardianError::ShareDecryption(generating_id.clone()))?;

        let expected = generating_keys
            .coefficient_commitments
            .value_at(self.id.x_coordinate);
        if G::mul_generator(value.expose_scalar()) != expected {
            return Err(GuardianError::InvalidShare(generating_id.clone()));
        }

        if let Some(existing) = self.shares.get(generating_id) {
            return if existing.expose_scalar() == value.expose_scalar() {
                Ok(())
            } else {
                Err(GuardianError::ConflictingShare(generating_id.clone()))
            };
        }
        debug!(guardian = %self.id.id, from = %generating_id, "accepted secret key share");
        self.shares.insert(generating_id.clone(), value);
        Ok(())
    }

    /// Returns ids of known guardians that have not supplied a share yet.
    pub fn missing_shares(&self) -> Vec<String> {
        self.others
            .keys()
            .filter(|id| !self.shares.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Produces the state this guardian needs to take part in decryption.
    ///
    /// # Errors
    ///
    /// Returns an error if a share from any known guardian is missing.
    pub fn decrypting_trustee(&self) -> Result<DecryptingTrustee<G>, GuardianError> {
        let missing = self.missing_shares();
        if !missing.is_empty() {
            return Err(GuardianError::MissingShares(missing));
        }
        Ok(DecryptingTrustee::new(
            self.id.clone(),
            self.election_keys.clone(),
            self.shares.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use rand::thread_rng;

    use super::*;
    use crate::group::Ristretto;

    type Guardian = KeyCeremonyGuardian<Ristretto>;

    fn exchange_public_keys(guardians: &mut [Guardian]) {
        let keys: Vec<_> = guardians.iter().map(Guardian::public_keys).collect();
        for guardian in guardians.iter_mut() {
            for key in &keys {
                if key.guardian_id != guardian.id().id {
                    guardian.receive_public_keys(key.clone()).unwrap();
                }
            }
        }
    }

    #[test]
    fn pairwise_exchange_completes() {
        let mut rng = thread_rng();
        let mut guardians: Vec<_> = (1..=3)
            .map(|x| Guardian::new(GuardianId::new(format!("g{x}"), x), 2, &mut rng))
            .collect();
        exchange_public_keys(&mut guardians);
        assert_eq!(guardians[0].missing_shares(), ["g2", "g3"]);

        for i in 0..3 {
            for j in 0..3 {
                if i != j {
                    let designated = guardians[j].id().id.clone();
                    let share = guardians[i]
                        .secret_key_share_for(&designated, &mut rng)
                        .unwrap();
                    guardians[j].receive_secret_key_share(share.clone()).unwrap();
                    // Redelivery of the same share is accepted.
                    guardians[j].receive_secret_key_share(share).unwrap();
                }
            }
        }
        for guardian in &guardians {
            assert!(guardian.missing_shares().is_empty());
            guardian.decrypting_trustee().unwrap();
        }
    }

    #[test]
    fn share_for_another_guardian_is_rejected() {
        let mut rng = thread_rng();
        let mut guardians: Vec<_> = (1..=3)
            .map(|x| Guardian::new(GuardianId::new(format!("g{x}"), x), 2, &mut rng))
            .collect();
        exchange_public_keys(&mut guardians);

        let share = guardians[0].secret_key_share_for("g2", &mut rng).unwrap();
        let err = guardians[2].receive_secret_key_share(share.clone()).unwrap_err();
        assert!(matches!(err, GuardianError::WrongRecipient { .. }));

        // Redirecting the share by rewriting the header breaks authentication.
        let mut redirected = share;
        redirected.designated_guardian_id = "g3".to_owned();
        redirected.designated_x_coordinate = 3;
        let err = guardians[2].receive_secret_key_share(redirected).unwrap_err();
        assert_eq!(err, GuardianError::ShareDecryption("g1".to_owned()));

        let err = guardians[2].decrypting_trustee().unwrap_err();
        assert!(matches!(err, GuardianError::MissingShares(ids) if ids.len() == 2));
    }

    #[test]
    fn share_inconsistent_with_commitments_is_rejected() {
        let mut rng = thread_rng();
        let mut guardians: Vec<_> = (1..=2)
            .map(|x| Guardian::new(GuardianId::new(format!("g{x}"), x), 2, &mut rng))
            .collect();
        exchange_public_keys(&mut guardians);

        // Encrypt an arbitrary value for g2 with correct headers.
        let designated = guardians[1].id().clone();
        let bogus_value = SecretKey::<Ristretto>::generate(&mut rng);
        let associated_data = SecretKeyShare::<Ristretto>::associated_data("g1", &designated);
        let encrypted_coordinate = HashedCiphertext::encrypt(
            &bogus_value,
            &guardians[1].public_keys().election_public_key(),
            &associated_data,
            &mut rng,
        );
        let share = SecretKeyShare {
            generating_guardian_id: "g1".to_owned(),
            designated_guardian_id: designated.id,
            designated_x_coordinate: designated.x_coordinate,
            encrypted_coordinate,
        };
        let err = guardians[1].receive_secret_key_share(share).unwrap_err();
        assert_eq!(err, GuardianError::InvalidShare("g1".to_owned()));
    }

    #[test]
    fn conflicting_public_keys_are_rejected() {
        let mut rng = thread_rng();
        let mut guardian = Guardian::new(GuardianId::new("g1", 1), 2, &mut rng);
        let other = Guardian::new(GuardianId::new("g2", 2), 2, &mut rng);
        let impostor = Guardian::new(GuardianId::new("g2", 2), 2, &mut rng);

        guardian.receive_public_keys(other.public_keys()).unwrap();
        guardian.receive_public_keys(other.public_keys()).unwrap();
        let err = guardian.receive_public_keys(impostor.public_keys()).unwrap_err();
        assert_eq!(err, GuardianError::ConflictingPublicKeys("g2".to_owned()));

        let err = guardian.receive_public_keys(guardian.public_keys()).unwrap_err();
        assert_eq!(err, GuardianError::SelfMessage("g1".to_owned()));
    }
}

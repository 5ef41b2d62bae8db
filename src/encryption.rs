//! `Ciphertext` and closely related types.

use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use std::{collections::HashMap, fmt, iter, marker::PhantomData, ops};

use crate::{group::Group, serde::ElementHelper, PublicKey, SecretKey};

/// Ciphertext for ElGamal encryption.
///
/// A ciphertext consists of 2 group elements: the random element `R` (the *pad*)
/// and a blinded encrypted value `B` (the *data*). If the encrypted value is `[m]G`,
/// and the receiver's public key is `K`, then `R = [r]G`, `B = [m]G + [r]K`
/// for a random scalar `r`.
///
/// Ciphertexts are partially homomorphic: adding them encrypts the sum of plaintexts.
/// This is what tallies rely on.
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Ciphertext<G: Group> {
    #[serde(rename = "pad", with = "ElementHelper::<G>")]
    pub(crate) random_element: G::Element,
    #[serde(rename = "data", with = "ElementHelper::<G>")]
    pub(crate) blinded_element: G::Element,
}

impl<G: Group> fmt::Debug for Ciphertext<G> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Ciphertext")
            .field("pad", &self.random_element)
            .field("data", &self.blinded_element)
            .finish()
    }
}

impl<G: Group> PartialEq for Ciphertext<G> {
    fn eq(&self, other: &Self) -> bool {
        self.random_element == other.random_element
            && self.blinded_element == other.blinded_element
    }
}

impl<G: Group> Ciphertext<G> {
    /// Represents encryption of zero value without the blinding factor.
    pub fn zero() -> Self {
        Self {
            random_element: G::identity(),
            blinded_element: G::identity(),
        }
    }

    /// Creates a ciphertext from its pad and data elements.
    pub fn from_elements(pad: G::Element, data: G::Element) -> Self {
        Self {
            random_element: pad,
            blinded_element: data,
        }
    }

    /// Returns the random element (pad) of this ciphertext.
    pub fn pad(&self) -> &G::Element {
        &self.random_element
    }

    /// Returns the blinded value (data) of this ciphertext.
    pub fn data(&self) -> &G::Element {
        &self.blinded_element
    }

    /// Serializes this ciphertext as two group elements (the pad, then the data).
    pub fn to_bytes(self) -> Vec<u8> {
        let mut bytes = vec![0_u8; 2 * G::ELEMENT_SIZE];
        G::serialize_element(&self.random_element, &mut bytes[..G::ELEMENT_SIZE]);
        G::serialize_element(&self.blinded_element, &mut bytes[G::ELEMENT_SIZE..]);
        bytes
    }
}

impl<G: Group> ops::Add for Ciphertext<G> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            random_element: self.random_element + rhs.random_element,
            blinded_element: self.blinded_element + rhs.blinded_element,
        }
    }
}

impl<G: Group> ops::AddAssign for Ciphertext<G> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<G: Group> iter::Sum for Ciphertext<G> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, ciphertext| acc + ciphertext)
    }
}

impl<G: Group> PublicKey<G> {
    /// Encrypts a value for this key.
    pub fn encrypt<T, R: CryptoRng + RngCore>(&self, value: T, rng: &mut R) -> Ciphertext<G>
    where
        G::Scalar: From<T>,
    {
        let element = G::mul_generator(&G::Scalar::from(value));
        self.encrypt_element(element, rng)
    }

    /// Encrypts a group element for this key.
    pub fn encrypt_element<R: CryptoRng + RngCore>(
        &self,
        value: G::Element,
        rng: &mut R,
    ) -> Ciphertext<G> {
        let random_scalar = SecretKey::<G>::generate(rng);
        let random_element = G::mul_generator(random_scalar.expose_scalar());
        let dh_element = self.as_element() * random_scalar.expose_scalar();
        Ciphertext {
            random_element,
            blinded_element: value + dh_element,
        }
    }
}

/// Lookup table for discrete logarithms.
///
/// For [`Ciphertext`]s to be partially homomorphic, the encrypted values must be
/// group scalars linearly mapped to group elements: `x -> [x]G`. After decryption,
/// the value is recovered by looking up `[x]G` in this table.
#[derive(Debug, Clone)]
pub struct DiscreteLogTable<G: Group> {
    inner: HashMap<[u8; 8], u64>,
    _t: PhantomData<G>,
}

impl<G: Group> DiscreteLogTable<G> {
    /// Creates a lookup table for the specified `values`.
    pub fn new(values: impl IntoIterator<Item = u64>) -> Self {
        let lookup_table = values
            .into_iter()
            .filter(|&value| value != 0)
            .map(|i| {
                let element = G::vartime_mul_generator(&G::Scalar::from(i));
                let mut bytes = vec![0_u8; G::ELEMENT_SIZE];
                G::serialize_element(&element, &mut bytes);
                let mut initial_bytes = [0_u8; 8];
                initial_bytes.copy_from_slice(&bytes[..8]);
                (initial_bytes, i)
            })
            .collect();

        Self {
            inner: lookup_table,
            _t: PhantomData,
        }
    }

    /// Gets the discrete log of `decrypted_element`, or `None` if it is not present
    /// among the table values.
    pub fn get(&self, decrypted_element: &G::Element) -> Option<u64> {
        if G::is_identity(decrypted_element) {
            // The identity element may have a special serialization, so we check it separately.
            Some(0)
        } else {
            let mut bytes = vec![0_u8; G::ELEMENT_SIZE];
            G::serialize_element(decrypted_element, &mut bytes);
            let mut initial_bytes = [0_u8; 8];
            initial_bytes.copy_from_slice(&bytes[..8]);
            let value = *self.inner.get(&initial_bytes)?;
            // The prefix may collide; confirm on the full element.
            (G::vartime_mul_generator(&G::Scalar::from(value)) == *decrypted_element)
                .then_some(value)
        }
    }
}

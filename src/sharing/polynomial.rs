//! Secret and public polynomials of a guardian.

use merlin::Transcript;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use core::fmt;

use crate::{
    group::Group,
    proofs::{SchnorrProof, VerificationError},
    serde::{ElementHelper, VecHelper},
    PublicKey, SecretKey,
};

/// Secret polynomial `P(z) = a_0 + a_1 z + … + a_{k-1} z^{k-1}` with coefficients
/// zeroized on drop. `a_0` is the guardian's election secret key.
pub struct SecretPolynomial<G: Group> {
    coefficients: Vec<SecretKey<G>>,
}

impl<G: Group> fmt::Debug for SecretPolynomial<G> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SecretPolynomial")
            .field("len", &self.coefficients.len())
            .finish_non_exhaustive()
    }
}

impl<G: Group> Clone for SecretPolynomial<G> {
    fn clone(&self) -> Self {
        Self {
            coefficients: self.coefficients.clone(),
        }
    }
}

impl<G: Group> SecretPolynomial<G> {
    /// Generates a random polynomial with `len` coefficients (i.e., of degree `len - 1`).
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero.
    pub fn generate<R: CryptoRng + RngCore>(len: usize, rng: &mut R) -> Self {
        assert!(len > 0, "polynomial must have at least one coefficient");
        Self {
            coefficients: (0..len).map(|_| SecretKey::generate(rng)).collect(),
        }
    }

    /// Returns the number of coefficients.
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    /// Returns the free coefficient `a_0`.
    pub fn value_at_zero(&self) -> &SecretKey<G> {
        &self.coefficients[0]
    }

    /// Evaluates the polynomial at `x` using Horner's scheme.
    pub fn value_at(&self, x: u32) -> SecretKey<G> {
        let power = G::Scalar::from(x);
        let mut poly_value = SecretKey::new(G::Scalar::from(0_u32));
        for coefficient in self.coefficients.iter().rev() {
            poly_value = poly_value * &power + coefficient.clone();
        }
        poly_value
    }

    /// Returns the public polynomial (coefficient commitments `[a_j]G`).
    pub fn commitments(&self) -> PublicPolynomial<G> {
        PublicPolynomial(
            self.coefficients
                .iter()
                .map(|coefficient| G::mul_generator(coefficient.expose_scalar()))
                .collect(),
        )
    }

    /// Creates a [`SchnorrProof`] for every coefficient. `transcript_for` produces
    /// the transcript for the coefficient with the specified index.
    pub fn prove_coefficients<R, F>(
        &self,
        mut transcript_for: F,
        rng: &mut R,
    ) -> Vec<SchnorrProof<G>>
    where
        R: CryptoRng + RngCore,
        F: FnMut(usize) -> Transcript,
    {
        self.coefficients
            .iter()
            .enumerate()
            .map(|(i, coefficient)| {
                let commitment = G::mul_generator(coefficient.expose_scalar());
                SchnorrProof::new(coefficient, &commitment, &mut transcript_for(i), rng)
            })
            .collect()
    }
}

/// Public polynomial consisting of coefficient commitments `K_j = [a_j]G`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct PublicPolynomial<G: Group>(
    #[serde(with = "VecHelper::<ElementHelper<G>, 1>")] Vec<G::Element>,
);

impl<G: Group> PartialEq for PublicPolynomial<G> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<G: Group> PublicPolynomial<G> {
    /// Wraps coefficient commitments.
    pub fn new(commitments: Vec<G::Element>) -> Self {
        Self(commitments)
    }

    /// Returns the coefficient commitments.
    pub fn commitments(&self) -> &[G::Element] {
        &self.0
    }

    /// Returns the number of coefficients.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the commitment to the free coefficient, i.e. the election public key
    /// of the polynomial owner.
    pub fn value_at_zero(&self) -> G::Element {
        self.0[0]
    }

    /// Returns [`Self::value_at_zero()`] as a public key.
    pub fn election_public_key(&self) -> PublicKey<G> {
        PublicKey::from_element(self.value_at_zero())
    }

    /// Computes `Q(x) = Σ_j [x^j] K_j` in variable time.
    pub fn value_at(&self, x: u32) -> G::Element {
        let x = G::Scalar::from(x);
        let mut val = G::Scalar::from(1_u32);
        let scalars: Vec<_> = (0..self.0.len())
            .map(|_| {
                let output = val;
                val = val * x;
                output
            })
            .collect();

        G::vartime_multi_mul(&scalars, self.0.iter().copied())
    }

    /// Verifies coefficient `proofs`; `transcript_for` produces the transcript for
    /// the coefficient with the specified index.
    ///
    /// # Errors
    ///
    /// Returns an error if the number of proofs differs from the number of coefficients,
    /// or if any proof does not verify.
    pub fn verify_coefficients<F>(
        &self,
        proofs: &[SchnorrProof<G>],
        mut transcript_for: F,
    ) -> Result<(), VerificationError>
    where
        F: FnMut(usize) -> Transcript,
    {
        VerificationError::check_lengths("coefficient proofs", self.0.len(), proofs.len())?;
        for (i, (commitment, proof)) in self.0.iter().zip(proofs).enumerate() {
            proof.verify(commitment, &mut transcript_for(i))?;
        }
        Ok(())
    }
}

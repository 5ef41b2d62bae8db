//! [Feldman's verifiable secret sharing][feldman-vss] over guardian x-coordinates.
//!
//! Every guardian acts as a dealer for its own secret polynomial `P(z) = a_0 + a_1 z + …`
//! of degree `quorum - 1`. The guardian publishes the *public polynomial*
//! `Q(z) = [a_0]G + [z][a_1]G + …` as a list of coefficient commitments, and hands
//! the value `P(x)` to the guardian with x-coordinate `x`. The receiver checks
//! `[P(x)]G ?= Q(x)`.
//!
//! Unlike textbook presentations, x-coordinates here are arbitrary positive integers
//! (they are assigned in registration order), so interpolation cannot assume
//! a contiguous `1..=n` range.
//!
//! [feldman-vss]: https://www.cs.umd.edu/~gasarch/TOPICS/secretsharing/feldmanVSS.pdf

use core::{cmp::Ordering, fmt};

use crate::group::Group;

mod polynomial;

pub use self::polynomial::{PublicPolynomial, SecretPolynomial};

/// Errors that can occur during interpolation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// No points were supplied.
    NoPoints,
    /// An x-coordinate equals zero; zero is reserved for the shared secret.
    ZeroCoordinate,
    /// The same x-coordinate was supplied more than once.
    DuplicateCoordinate(u32),
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPoints => formatter.write_str("no points supplied for interpolation"),
            Self::ZeroCoordinate => formatter.write_str("x-coordinate 0 is reserved"),
            Self::DuplicateCoordinate(x) => {
                write!(formatter, "x-coordinate {x} is supplied more than once")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Computes Lagrange coefficients for interpolating a polynomial at zero based
/// on its values at `coordinates`:
///
/// ```text
/// λ_i = Π_{j ≠ i} x_j / (x_j - x_i)
/// ```
///
/// The coefficients are returned in the same order as `coordinates`.
///
/// # Errors
///
/// Returns an error if `coordinates` is empty, contains zero or contains duplicates.
pub fn lagrange_coefficients<G: Group>(coordinates: &[u32]) -> Result<Vec<G::Scalar>, Error> {
    if coordinates.is_empty() {
        return Err(Error::NoPoints);
    }
    if coordinates.contains(&0) {
        return Err(Error::ZeroCoordinate);
    }
    for (i, x) in coordinates.iter().enumerate() {
        if coordinates[..i].contains(x) {
            return Err(Error::DuplicateCoordinate(*x));
        }
    }

    // `false` corresponds to positive sign, `true` to negative. This is in order
    // to make XOR work as expected.
    let mut denominators: Vec<_> = coordinates
        .iter()
        .map(|&x| {
            let (sign, magnitude) = coordinates
                .iter()
                .filter(|&&other| other != x)
                .map(|&other| match other.cmp(&x) {
                    Ordering::Greater => (false, G::Scalar::from(other - x)),
                    _ => (true, G::Scalar::from(x - other)),
                })
                .fold(
                    (false, G::Scalar::from(1_u32)),
                    |(sign, magnitude), (elem_sign, elem_magnitude)| {
                        (sign ^ elem_sign, magnitude * elem_magnitude)
                    },
                );
            if sign {
                -magnitude
            } else {
                magnitude
            }
        })
        .collect();
    G::invert_scalars(&mut denominators);

    let coefficients = coordinates
        .iter()
        .zip(denominators)
        .map(|(&x, inverse)| {
            let numerator = coordinates
                .iter()
                .filter(|&&other| other != x)
                .fold(G::Scalar::from(1_u32), |acc, &other| {
                    acc * G::Scalar::from(other)
                });
            numerator * inverse
        })
        .collect();
    Ok(coefficients)
}

/// Interpolates the value at zero of a public polynomial given its values `points`
/// as `(x, Q(x))` pairs.
///
/// # Errors
///
/// Returns an error under the same conditions as [`lagrange_coefficients()`].
pub fn interpolate_at_zero<G: Group>(points: &[(u32, G::Element)]) -> Result<G::Element, Error> {
    let coordinates: Vec<_> = points.iter().map(|&(x, _)| x).collect();
    let coefficients = lagrange_coefficients::<G>(&coordinates)?;
    Ok(G::vartime_multi_mul(
        &coefficients,
        points.iter().map(|&(_, value)| value),
    ))
}

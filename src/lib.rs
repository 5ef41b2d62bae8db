//! Threshold key ceremony among guardians and threshold decryption of [ElGamal]-encrypted
//! tallies, including compensated decryption for absent guardians.
//!
//! # ⚠ Warnings
//!
//! While the logic in this crate relies on standard cryptographic assumptions
//! (complexity of discrete log and computational / decisional Diffie–Hellman problems
//! in certain groups), it has not been independently verified for correctness or absence
//! of side-channel attack vectors. **Use at your own risk.**
//!
//! # Overview
//!
//! `N` mutually distrusting guardians jointly generate an election key so that any
//! `quorum` of them can decrypt, while fewer cannot.
//!
//! - Each guardian owns a secret polynomial of degree `quorum - 1` and publishes commitments
//!   to its coefficients together with Schnorr proofs of knowledge ([`guardian::PublicKeys`]).
//!   The sharing is [Feldman's verifiable secret sharing][feldman-vss].
//! - [`ceremony::KeyCeremony`] registers guardians, relays public keys and encrypted
//!   secret key shares between every ordered pair of them and publishes the joint key
//!   (the sum of all guardians' election public keys).
//! - [`decrypt::Decryptor`] collects partial decryptions with Chaum–Pedersen proofs from at
//!   least `quorum` guardians. The contribution of every absent guardian is reconstructed
//!   from *compensated* partial decryptions computed by present guardians from the shares
//!   the absent guardian issued to them.
//!
//! Coordinators talk to guardians only through the [`channel`] traits; in-process
//! implementations are provided. Group arithmetic is abstracted with the [`Group`] trait;
//! the [`Ristretto`] implementation is based on [`curve25519-dalek`].
//!
//! # Crate features
//!
//! The crate has no optional features. Coordinators are asynchronous and rely on [`tokio`]
//! timers for per-call timeouts; logging uses [`tracing`].
//!
//! # Examples
//!
//! ```
//! use guardian_ceremony::{
//!     ceremony::KeyCeremony,
//!     channel::{LocalDecryptingGuardian, LocalKeyCeremonyGuardian},
//!     config::{CeremonyConfig, DecryptionConfig},
//!     decrypt::{Decryptor, EncryptedTally},
//!     group::Ristretto,
//!     record::MemoryTrusteeStore,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryTrusteeStore::<Ristretto>::new());
//! let ceremony = KeyCeremony::<Ristretto>::new(CeremonyConfig::new(3, 2)?)?;
//! for id in ["alice", "bob", "carol"] {
//!     ceremony.register(id, |registration| {
//!         Arc::new(LocalKeyCeremonyGuardian::<Ristretto>::new(registration, store.clone()))
//!     })?;
//! }
//! let key_ceremony = ceremony.run().await?;
//!
//! let mut rng = rand::thread_rng();
//! let tally = EncryptedTally {
//!     tally_id: "tally".to_owned(),
//!     ciphertexts: vec![key_ceremony.joint_public_key.encrypt(5_u64, &mut rng)],
//! };
//!
//! // Decrypt with 2 guardians out of 3; `carol` is compensated for.
//! let mut config = DecryptionConfig::new(2);
//! config.max_plaintext = 10;
//! let decryptor = Decryptor::new(key_ceremony.clone(), config)?;
//! for id in ["alice", "bob"] {
//!     let record = key_ceremony.guardian(id).unwrap();
//!     let channel = Arc::new(LocalDecryptingGuardian::load(store.as_ref(), id)?);
//!     decryptor.register(id, record.x_coordinate, &record.election_public_key(), channel)?;
//! }
//! let result = decryptor.decrypt(&tally, &[]).await?;
//! assert_eq!(result.tally, [Some(5)]);
//! assert_eq!(result.missing_guardians, ["carol"]);
//! # Ok(())
//! # }
//! ```
//!
//! [ElGamal]: https://en.wikipedia.org/wiki/ElGamal_encryption
//! [feldman-vss]: https://www.cs.umd.edu/~gasarch/TOPICS/secretsharing/feldmanVSS.pdf
//! [`Group`]: group::Group
//! [`Ristretto`]: group::Ristretto
//! [`curve25519-dalek`]: https://docs.rs/curve25519-dalek/

// Documentation settings.
#![cfg_attr(docsrs, feature(doc_cfg))]
// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::doc_markdown
)]

pub mod ceremony;
pub mod channel;
pub mod config;
pub mod decrypt;
mod decryption;
mod encryption;
pub mod error;
pub mod group;
pub mod guardian;
mod keys;
mod proofs;
pub mod record;
mod serde;
pub mod sharing;

pub use crate::{
    decryption::{
        combine_partial_decryptions, decrypt_with_partials, recover_missing_decryption,
        CompensatedDecryptionAndProof, DirectDecryptionAndProof,
    },
    encryption::{Ciphertext, DiscreteLogTable},
    keys::{Keypair, PublicKey, PublicKeyConversionError, SecretKey},
    proofs::{ChaumPedersenProof, SchnorrProof, VerificationError},
};

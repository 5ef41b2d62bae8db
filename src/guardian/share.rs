//! Encryption of secret key shares for their designated guardian.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use hkdf::Hkdf;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{
    group::Group,
    guardian::GuardianId,
    serde::{deserialize_bytes, serialize_bytes, ElementHelper},
    PublicKey, SecretKey,
};

const KDF_INFO: &[u8] = b"guardian-ceremony/secret-key-share";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Hybrid ciphertext of a scalar: an ephemeral Diffie–Hellman element (the pad)
/// and an AES-256-GCM ciphertext of the serialized scalar (the data).
///
/// The symmetric key and nonce are derived with HKDF-SHA256 from the shared element
/// `[r]K_B`, salted with the serialized pad. As every encryption uses a fresh
/// ephemeral scalar `r`, a key / nonce pair is never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct HashedCiphertext<G: Group> {
    #[serde(with = "ElementHelper::<G>")]
    pad: G::Element,
    #[serde(serialize_with = "serialize_bytes", deserialize_with = "deserialize_bytes")]
    data: Vec<u8>,
}

fn derive_cipher<G: Group>(pad: &G::Element, shared: &G::Element) -> (Aes256Gcm, [u8; NONCE_LEN]) {
    let salt = G::element_to_bytes(pad);
    let ikm = Zeroizing::new(G::element_to_bytes(shared));
    let hkdf = Hkdf::<Sha256>::new(Some(salt.as_slice()), &ikm);

    let mut okm = Zeroizing::new([0_u8; KEY_LEN + NONCE_LEN]);
    hkdf.expand(KDF_INFO, &mut *okm)
        .expect("output length is below the HKDF-SHA256 limit");
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&okm[..KEY_LEN]));
    let mut nonce = [0_u8; NONCE_LEN];
    nonce.copy_from_slice(&okm[KEY_LEN..]);
    (cipher, nonce)
}

impl<G: Group> HashedCiphertext<G> {
    /// Encrypts `secret` for the holder of `receiver`, binding `associated_data`.
    pub fn encrypt<R: CryptoRng + RngCore>(
        secret: &SecretKey<G>,
        receiver: &PublicKey<G>,
        associated_data: &[u8],
        rng: &mut R,
    ) -> Self {
        let ephemeral = SecretKey::<G>::generate(rng);
        let pad = G::mul_generator(ephemeral.expose_scalar());
        let shared = receiver.as_element() * ephemeral.expose_scalar();

        let (cipher, nonce) = derive_cipher::<G>(&pad, &shared);
        let plaintext = secret.to_bytes();
        let payload = Payload {
            msg: plaintext.as_slice(),
            aad: associated_data,
        };
        let data = cipher
            .encrypt(Nonce::from_slice(&nonce), payload)
            .expect("AES-GCM encryption of a scalar cannot fail");
        Self { pad, data }
    }

    /// Decrypts this ciphertext with the receiver's secret key. Returns `None` if
    /// authentication fails (e.g., the ciphertext targets another receiver or
    /// `associated_data` differs) or if the plaintext is not a valid scalar.
    pub fn decrypt(&self, receiver: &SecretKey<G>, associated_data: &[u8]) -> Option<SecretKey<G>> {
        let shared = self.pad * receiver.expose_scalar();
        let (cipher, nonce) = derive_cipher::<G>(&self.pad, &shared);
        let payload = Payload {
            msg: self.data.as_slice(),
            aad: associated_data,
        };
        let plaintext = Zeroizing::new(cipher.decrypt(Nonce::from_slice(&nonce), payload).ok()?);
        SecretKey::from_bytes(&plaintext)
    }
}

/// Value of the generating guardian's polynomial at the designated guardian's x-coordinate,
/// encrypted for the designated guardian.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SecretKeyShare<G: Group> {
    /// Guardian that evaluated its polynomial.
    pub generating_guardian_id: String,
    /// Guardian the share is designated for.
    pub designated_guardian_id: String,
    /// x-coordinate of the designated guardian.
    pub designated_x_coordinate: u32,
    /// Encrypted polynomial value.
    pub encrypted_coordinate: HashedCiphertext<G>,
}

impl<G: Group> SecretKeyShare<G> {
    pub(crate) fn associated_data(
        generating_guardian_id: &str,
        designated: &GuardianId,
    ) -> Vec<u8> {
        let mut data = Vec::with_capacity(
            generating_guardian_id.len() + designated.id.len() + 2 * 8 + 4,
        );
        for id in [generating_guardian_id, designated.id.as_str()] {
            data.extend_from_slice(&(id.len() as u64).to_be_bytes());
            data.extend_from_slice(id.as_bytes());
        }
        data.extend_from_slice(&designated.x_coordinate.to_be_bytes());
        data
    }

    /// Returns the designated guardian.
    pub fn designated(&self) -> GuardianId {
        GuardianId {
            id: self.designated_guardian_id.clone(),
            x_coordinate: self.designated_x_coordinate,
        }
    }
}

//! Versioned, rotatable authenticated encryption for cached payloads.
//!
//! A [`Keyring`] holds symmetric [`Key`]s by integer id and encrypts with
//! the highest id. Ciphertexts carry the id out of band, so older keys keep
//! decrypting after a rotation as long as they stay in the keyring.
//!
//! Ciphers:
//! - AES-128/192/256-CBC, authenticated with HMAC-SHA256 (encrypt-then-MAC)
//! - AES-256-GCM

mod cbc_hmac;
mod cipher;
mod gcm;
mod keyring;

pub use cbc_hmac::AesCbc;
pub use cipher::{Cipher, Encryptor, Key};
pub use gcm::Aes256GcmEncryptor;
pub use keyring::{Encrypted, Keyring, KeyringBuilder};

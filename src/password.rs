//! Argon2id password hashing.
//!
//! Hashes are stored in PHC string format so the algorithm parameters and
//! salt travel with the hash itself.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::error::Error;

/// Hash a plaintext password with a fresh random salt.
///
/// Returns the PHC-formatted hash and the salt string that was used.
pub fn hash_password(password: &str) -> Result<(String, String), Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| Error::unavailable("hash password", err))?;
    Ok((hash.to_string(), salt.to_string()))
}

/// Verify a plaintext password against a stored PHC hash.
///
/// `Ok(false)` means the password simply does not match; other failures mean
/// the stored hash is unusable.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, Error> {
    let parsed = PasswordHash::new(hash)
        .map_err(|err| Error::unavailable("parse password hash", err))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(Error::unavailable("verify password", err)),
    }
}

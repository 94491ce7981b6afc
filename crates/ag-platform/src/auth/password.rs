//! Password Service
//!
//! Argon2id hashing and verification. Login verification must take the
//! same effort whether or not the account exists, so unknown emails are
//! verified against a fixed dummy hash instead of returning early.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use crate::shared::error::{PlatformError, Result};

/// Argon2id cost configuration.
#[derive(Debug, Clone)]
pub struct Argon2Config {
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Iterations
    pub time_cost: u32,
    pub parallelism: u32,
    pub output_len: usize,
}

impl Default for Argon2Config {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
            output_len: 32,
        }
    }
}

impl Argon2Config {
    /// Low-cost parameters for tests.
    pub fn testing() -> Self {
        Self {
            memory_cost: 4096,
            time_cost: 1,
            parallelism: 1,
            output_len: 32,
        }
    }

    fn to_params(&self) -> Params {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(self.output_len),
        )
        .expect("Invalid Argon2 params")
    }
}

pub struct PasswordService {
    argon2: Argon2<'static>,
    /// Verified against when the account does not exist, to keep login
    /// cost independent of account existence.
    dummy_hash: String,
}

impl PasswordService {
    pub fn new(config: Argon2Config) -> Self {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, config.to_params());

        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = argon2
            .hash_password(b"authgate-dummy-credential", &salt)
            .expect("Invalid Argon2 params")
            .to_string();

        Self { argon2, dummy_hash }
    }

    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| PlatformError::internal(format!("Failed to hash password: {e}")))?;
        Ok(hash.to_string())
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| PlatformError::internal(format!("Invalid password hash format: {e}")))?;

        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(PlatformError::internal(format!(
                "Password verification error: {e}"
            ))),
        }
    }

    /// Burn the same verification effort as a real check and fail.
    /// Called on the unknown-email login path.
    pub fn verify_dummy(&self, password: &str) {
        let _ = self.verify_password(password, &self.dummy_hash);
    }
}

impl Default for PasswordService {
    fn default() -> Self {
        Self::new(Argon2Config::default())
    }
}

//! Password hashing and verification.
//!
//! New hashes use the configured scheme. Verification reads the scheme from the stored hash, so
//! bcrypt and Argon2 hashes can coexist in the same table. Both libraries compare in constant
//! time.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::{
    config::{PasswordConfig, PasswordScheme},
    errors::Error,
};

/// Hash a password with the configured scheme.
pub fn hash_password(password: &str, config: &PasswordConfig) -> Result<String, Error> {
    match config.scheme {
        PasswordScheme::Bcrypt => bcrypt::hash(password, config.bcrypt_cost).map_err(|e| Error::Internal {
            operation: format!("hash password: {e}"),
        }),
        PasswordScheme::Argon2 => {
            let salt = SaltString::generate(&mut OsRng);
            let hash = Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map_err(|e| Error::Internal {
                    operation: format!("hash password: {e}"),
                })?;
            Ok(hash.to_string())
        }
    }
}

/// Verify a password against a stored bcrypt (`$2a$`/`$2b$`/`$2y$`) or Argon2 (`$argon2...`) hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, Error> {
    if hash.starts_with("$argon2") {
        let parsed_hash = PasswordHash::new(hash).map_err(|e| Error::Internal {
            operation: format!("parse hash: {e}"),
        })?;
        // Verification always uses params from the hash
        Ok(Argon2::default().verify_password(password.as_bytes(), &parsed_hash).is_ok())
    } else if hash.starts_with("$2") {
        bcrypt::verify(password, hash).map_err(|e| Error::Internal {
            operation: format!("verify password: {e}"),
        })
    } else {
        Err(Error::Internal {
            operation: "verify password: unrecognised hash format".to_string(),
        })
    }
}

/// [`hash_password`] on a blocking thread.
pub async fn hash_password_blocking(password: String, config: PasswordConfig) -> Result<String, Error> {
    tokio::task::spawn_blocking(move || hash_password(&password, &config))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })?
}

/// [`verify_password`] on a blocking thread.
pub async fn verify_password_blocking(password: String, hash: String) -> Result<bool, Error> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })?
}

use argon2::{
    Argon2,
    PasswordHash,
    PasswordVerifier,
    PasswordHasher,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

use argon2::password_hash::{SaltString, rand_core::OsRng as PHOsRng};

use crate::error::ApiError;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Verify a password against the Argon2 PHC string stored in `users.password_hash`.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let parsed = match PasswordHash::new(stored_hash) {
        Ok(p) => p,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Hash a new password using Argon2id with a random salt.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut PHOsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|phc| phc.to_string())
        .map_err(|e| ApiError::Internal(format!("argon2 hash error: {e}")))
}

/// Opaque bearer token handed to the client. Only its hash is persisted.
pub fn generate_access_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex of a token, the form stored in `active_sessions.token_hash`.
pub fn hash_access_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Temporary password for admin resets; long enough to pass `validate_new_password`.
pub fn generate_temp_password() -> String {
    generate_access_token().chars().take(12).collect()
}

pub fn validate_new_password(password: &str, confirmation: Option<&str>) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "Şifre en az {MIN_PASSWORD_LEN} karakter olmalı"
        )));
    }
    if let Some(confirm) = confirmation {
        if confirm != password {
            return Err(ApiError::validation("Şifreler eşleşmiyor"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let phc = hash_password("dis-hekimi").unwrap();
        assert!(verify_password("dis-hekimi", &phc));
        assert!(!verify_password("yanlis", &phc));
        assert!(!verify_password("dis-hekimi", "not-a-phc-string"));
    }

    #[test]
    fn token_hash_is_stable_hex() {
        let token = generate_access_token();
        let a = hash_access_token(&token);
        assert_eq!(a, hash_access_token(&token));
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_access_token("other"));
    }

    #[test]
    fn password_rules() {
        assert!(validate_new_password("123456", None).is_ok());
        assert!(validate_new_password("12345", None).is_err());
        assert!(validate_new_password("abcdef", Some("abcdef")).is_ok());
        assert!(validate_new_password("abcdef", Some("abcdeg")).is_err());
        assert!(validate_new_password(&generate_temp_password(), None).is_ok());
    }
}

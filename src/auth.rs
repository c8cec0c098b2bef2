use std::collections::HashMap;

use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};
use log::error;

use crate::billdesk;

/// Email/password pair lifted out of a submitted login form.
pub struct Credentials {
    email: String,
    password: String,
}

impl Credentials {
    pub fn from_form(form: &HashMap<String, String>) -> Result<Self, billdesk::Error> {
        let email = form.get("email").ok_or_else(|| {
            error!("login form without email");
            billdesk::Error::BadRequest
        })?;
        let password = form.get("password").ok_or_else(|| {
            error!("login form without password");
            billdesk::Error::BadRequest
        })?;

        Ok(Self::new(email, password))
    }

    pub fn new(email: &str, password: &str) -> Self {
        Self {
            email: email.trim().to_lowercase(),
            password: password.into(),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn matches(&self, pwhash: &str) -> bool {
        verify_password(&self.password, pwhash)
    }
}

/// Argon2id, stored as a PHC string (`$argon2id$v=19$...`).
pub fn hash_password(password: &str) -> Result<String, ()> {
    let salt = SaltString::generate(&mut OsRng);

    hasher()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("couldn't hash password: {e}");
        })
}

pub fn verify_password(password: &str, pwhash: &str) -> bool {
    let parsed = match PasswordHash::new(pwhash) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("stored password hash is malformed: {e}");
            return false;
        }
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

// Hashes carry their own parameters, so tests can hash cheaply.
fn hasher() -> Argon2<'static> {
    if cfg!(test) {
        if let Ok(params) = Params::new(Params::MIN_M_COST, 1, 1, None) {
            return Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        }
    }
    Argon2::default()
}

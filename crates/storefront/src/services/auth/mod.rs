//! Authentication service.
//!
//! Email and password accounts with Argon2id hashes. Failed logins are
//! counted per email by the lockout guard; five in a row lock the account
//! for fifteen minutes.

mod error;

pub use error::{AuthError, minutes_ceil};

use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use tracing::{info, instrument, warn};

use wallcraft_core::{Email, Role};

use super::guard::{LockoutStatus, LoginLockout};
use crate::db::{RepositoryError, Store};
use crate::models::{NewUser, User};

/// Minimum password length.
const MIN_PASSWORD_LENGTH: usize = 8;

/// Minimum display name length, when one is given.
const MIN_NAME_LENGTH: usize = 2;

/// Authentication service.
///
/// Handles user registration and password login.
pub struct AuthService {
    store: Arc<dyn Store>,
    lockout: Arc<dyn LoginLockout>,
}

impl AuthService {
    /// Create a new authentication service.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, lockout: Arc<dyn LoginLockout>) -> Self {
        Self { store, lockout }
    }

    /// Register a new customer account.
    ///
    /// The role is always [`Role::User`]; admins are created from the CLI.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidEmail` if the email format is invalid.
    /// Returns `AuthError::WeakPassword` if the password doesn't meet requirements.
    /// Returns `AuthError::UserAlreadyExists` if the email is already registered.
    #[instrument(skip(self, password, name))]
    pub async fn register_with_password(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<User, AuthError> {
        self.create_account(email, password, name, Role::User).await
    }

    /// Create an account with an explicit role.
    ///
    /// # Errors
    ///
    /// Same as [`AuthService::register_with_password`].
    pub async fn create_account(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
        role: Role,
    ) -> Result<User, AuthError> {
        let email = Email::parse(email)?;
        validate_password(password)?;
        let name = validate_name(name)?;
        let password_hash = hash_password(password)?;

        let user = self
            .store
            .create_user(NewUser {
                email,
                name,
                password_hash,
                role,
            })
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => AuthError::UserAlreadyExists,
                other => AuthError::Repository(other),
            })?;

        info!(user_id = %user.id, role = %user.role, "Account created");
        Ok(user)
    }

    /// Login with email and password.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::AccountLocked` while the email is locked out and
    /// `AuthError::InvalidCredentials` if the email/password is wrong.
    #[instrument(skip(self, email, password))]
    pub async fn login_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        // Malformed emails cannot belong to an account.
        let Ok(email) = Email::parse(email) else {
            return Err(AuthError::InvalidCredentials);
        };

        if let LockoutStatus::Locked { remaining } = self.lockout.is_account_locked(email.as_str())
        {
            return Err(AuthError::AccountLocked {
                minutes: minutes_ceil(remaining),
            });
        }

        let verified = match self.store.get_user_credentials(&email).await? {
            Some((user, hash)) => verify_password(password, &hash).map(|()| user),
            None => Err(AuthError::InvalidCredentials),
        };

        match verified {
            Ok(user) => {
                self.lockout.clear_failed_logins(email.as_str());
                Ok(user)
            }
            Err(_) => match self.lockout.record_failed_login(email.as_str()) {
                LockoutStatus::Locked { remaining } => {
                    warn!("Login failed; account now locked");
                    Err(AuthError::AccountLocked {
                        minutes: minutes_ceil(remaining),
                    })
                }
                LockoutStatus::Unlocked => Err(AuthError::InvalidCredentials),
            },
        }
    }
}

/// Validate password meets requirements: length, upper and lower case
/// letters, and a digit.
fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(AuthError::WeakPassword(
            "password must contain at least one uppercase letter".to_owned(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(AuthError::WeakPassword(
            "password must contain at least one lowercase letter".to_owned(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AuthError::WeakPassword(
            "password must contain at least one number".to_owned(),
        ));
    }

    Ok(())
}

fn validate_name(name: Option<&str>) -> Result<Option<String>, AuthError> {
    match name.map(str::trim) {
        None | Some("") => Ok(None),
        Some(n) if n.chars().count() < MIN_NAME_LENGTH => Err(AuthError::InvalidName),
        Some(n) => Ok(Some(n.to_owned())),
    }
}

/// Hash a password using Argon2id.
fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::PasswordHash)
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;
    let argon2 = Argon2::default();

    argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::services::clock::ManualClock;
    use crate::services::guard::MemoryGuard;

    fn service() -> AuthService {
        let guard = Arc::new(MemoryGuard::new(Arc::new(ManualClock::default())));
        AuthService::new(Arc::new(MemoryStore::new()), guard)
    }

    #[test]
    fn test_password_rules() {
        assert!(validate_password("Short1").is_err());
        assert!(validate_password("alllowercase1").is_err());
        assert!(validate_password("ALLUPPERCASE1").is_err());
        assert!(validate_password("NoDigitsHere").is_err());
        assert!(validate_password("Wallpaper42").is_ok());
    }

    #[test]
    fn test_name_rules() {
        assert_eq!(validate_name(None).unwrap(), None);
        assert_eq!(validate_name(Some("  ")).unwrap(), None);
        assert!(validate_name(Some("A")).is_err());
        assert_eq!(validate_name(Some(" Ana ")).unwrap(), Some("Ana".to_owned()));
    }

    #[test]
    fn test_hash_roundtrip() {
        let hash = hash_password("Wallpaper42").unwrap();
        assert!(verify_password("Wallpaper42", &hash).is_ok());
        assert!(verify_password("wallpaper42", &hash).is_err());
    }

    #[tokio::test]
    async fn test_signup_creates_user_role_with_normalized_email() {
        let auth = service();
        let user = auth
            .register_with_password("Buyer@Example.COM", "Wallpaper42", Some("Ana"))
            .await
            .unwrap();
        assert_eq!(user.email.as_str(), "buyer@example.com");
        assert_eq!(user.role, Role::User);

        let err = auth
            .register_with_password("buyer@example.com", "Wallpaper42", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UserAlreadyExists));
    }

    #[tokio::test]
    async fn test_login_lockout_after_five_failures() {
        let auth = service();
        auth.register_with_password("buyer@example.com", "Wallpaper42", None)
            .await
            .unwrap();

        for _ in 0..4 {
            let err = auth
                .login_with_password("buyer@example.com", "wrong")
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }
        let err = auth
            .login_with_password("buyer@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountLocked { minutes: 15 }));

        // Correct password is refused while locked.
        let err = auth
            .login_with_password("BUYER@example.com", "Wallpaper42")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountLocked { .. }));
    }

    #[tokio::test]
    async fn test_successful_login_clears_failures() {
        let auth = service();
        auth.register_with_password("buyer@example.com", "Wallpaper42", None)
            .await
            .unwrap();

        for _ in 0..4 {
            let _ = auth.login_with_password("buyer@example.com", "wrong").await;
        }
        auth.login_with_password("buyer@example.com", "Wallpaper42")
            .await
            .unwrap();

        // The counter restarted, so four more failures do not lock.
        for _ in 0..4 {
            let err = auth
                .login_with_password("buyer@example.com", "wrong")
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }
    }
}

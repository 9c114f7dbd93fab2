//! User directory contract and an in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use async_trait::async_trait;
use common::UserId;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{DomainError, Result};

const TOKEN_LENGTH: usize = 40;

/// Lifetime of an issued token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// An authenticated account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    /// Staff users may call the administrative operations.
    pub is_staff: bool,
}

/// A user together with the bearer token issued at login.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub user: User,
    pub token: String,
}

/// Authentication collaborator.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Checks credentials and issues a token.
    async fn authenticate(&self, email: &str, password: &str) -> Result<Session>;

    /// Resolves a bearer token to its user.
    async fn current_user(&self, token: &str) -> Result<User>;

    async fn find(&self, id: UserId) -> Result<Option<User>>;
}

#[derive(Default)]
struct DirectoryState {
    users: HashMap<UserId, (User, String)>,
    tokens: HashMap<String, (UserId, Instant)>,
}

impl DirectoryState {
    /// Stores a fresh token for `user_id`, dropping expired ones first.
    fn issue(&mut self, user_id: UserId, ttl: Duration) -> String {
        self.tokens.retain(|_, (_, issued)| issued.elapsed() < ttl);
        let token = new_token();
        self.tokens.insert(token.clone(), (user_id, Instant::now()));
        token
    }
}

/// In-memory directory storing Argon2id password hashes and opaque tokens.
///
/// Tokens expire `token_ttl` after issue.
#[derive(Clone)]
pub struct InMemoryUserDirectory {
    state: Arc<RwLock<DirectoryState>>,
    token_ttl: Duration,
}

impl Default for InMemoryUserDirectory {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            token_ttl: DEFAULT_TOKEN_TTL,
        }
    }
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Number of stored tokens, expired ones included.
    pub async fn token_count(&self) -> usize {
        self.state.read().await.tokens.len()
    }

    /// Adds an account. Emails are unique, compared case insensitively.
    pub async fn register(
        &self,
        email: &str,
        name: &str,
        password: &str,
        is_staff: bool,
    ) -> Result<User> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(DomainError::validation("email", "Enter a valid email address"));
        }
        let hash = hash_password(password)?;

        let mut state = self.state.write().await;
        if state.users.values().any(|(user, _)| user.email == email) {
            return Err(DomainError::Conflict(format!("email '{email}' is registered")));
        }
        let user = User {
            id: UserId::new(),
            email,
            name: name.to_string(),
            is_staff,
        };
        state.users.insert(user.id, (user.clone(), hash));
        Ok(user)
    }

    /// Issues a token for a known user without checking a password.
    pub async fn issue_token(&self, user_id: UserId) -> Result<String> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user_id) {
            return Err(DomainError::not_found("user", user_id));
        }
        Ok(state.issue(user_id, self.token_ttl))
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn authenticate(&self, email: &str, password: &str) -> Result<Session> {
        let email = email.trim().to_lowercase();
        let mut state = self.state.write().await;
        let (user, hash) = state
            .users
            .values()
            .find(|(user, _)| user.email == email)
            .cloned()
            .ok_or_else(|| DomainError::Unauthorized("invalid email or password".to_string()))?;

        if !verify_password(password, &hash)? {
            return Err(DomainError::Unauthorized(
                "invalid email or password".to_string(),
            ));
        }

        let token = state.issue(user.id, self.token_ttl);
        tracing::info!(user_id = %user.id, "user authenticated");
        Ok(Session { user, token })
    }

    async fn current_user(&self, token: &str) -> Result<User> {
        let state = self.state.read().await;
        state
            .tokens
            .get(token)
            .filter(|(_, issued)| issued.elapsed() < self.token_ttl)
            .and_then(|(id, _)| state.users.get(id))
            .map(|(user, _)| user.clone())
            .ok_or_else(|| DomainError::Unauthorized("invalid or expired token".to_string()))
    }

    async fn find(&self, id: UserId) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.get(&id).map(|(user, _)| user.clone()))
    }
}

fn new_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

fn hash_password(password: &str) -> Result<String> {
    if password.len() < 8 {
        return Err(DomainError::validation(
            "password",
            "Password must be at least 8 characters long",
        ));
    }
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DomainError::validation("password", e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| DomainError::Unauthorized(format!("stored credential unreadable: {e}")))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(DomainError::Unauthorized(e.to_string())),
    }
}

use serde::{Deserialize, Serialize};

use super::errors::SessionError;
use super::models::Role;
use crate::storage::TokenStore;

/// Immutable identity snapshot handed to retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub role: Role,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

/// Result of a successful login, before it becomes a session.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub token: String,
    pub username: String,
    pub role: Role,
}

/// Data visibility resolved once per activation from the caller's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Scope {
    #[serde(rename = "self")]
    Own,
    #[serde(rename = "all")]
    All,
}

impl Scope {
    pub fn resolve(session: &Session) -> Self {
        if session.is_admin() { Scope::All } else { Scope::Own }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Own => "self",
            Scope::All => "all",
        }
    }
}

/// Holder of the caller's identity. Only `set_session` and `clear_session`
/// mutate it; both mirror the change into the durable store.
pub struct SessionContext<S: TokenStore> {
    current: Option<Session>,
    store: S,
}

impl<S: TokenStore> SessionContext<S> {
    /// Resume whatever session the store holds from a previous run.
    pub fn resume(store: S) -> Result<Self, SessionError> {
        let current = store.load()?.filter(|session| !session.token.is_empty());
        match &current {
            Some(session) => tracing::debug!("Resumed session for {}", session.username),
            None => tracing::debug!("No stored session"),
        }
        Ok(Self { current, store })
    }

    pub fn set_session(&mut self, credentials: Credentials) -> Result<&Session, SessionError> {
        if credentials.token.trim().is_empty() {
            return Err(SessionError::EmptyToken);
        }

        let session = Session {
            token: credentials.token,
            username: credentials.username,
            role: credentials.role,
        };
        self.store.save(&session)?;
        tracing::info!("Session started for {} ({})", session.username, session.role.as_str());
        Ok(self.current.insert(session))
    }

    pub fn clear_session(&mut self) -> Result<(), SessionError> {
        self.store.clear()?;
        if let Some(session) = self.current.take() {
            tracing::info!("Session cleared for {}", session.username);
        }
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.current.as_ref().is_some_and(Session::is_admin)
    }

    pub fn session(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Snapshot of the current session, or an error when unauthenticated.
    pub fn require(&self) -> Result<Session, SessionError> {
        self.current.clone().ok_or(SessionError::NotAuthenticated)
    }

    /// Like `require`, but refuses non-admin sessions without a round-trip.
    pub fn require_admin(&self) -> Result<Session, SessionError> {
        let session = self.require()?;
        if !self.is_admin() {
            return Err(SessionError::NotAdmin(session.username));
        }
        Ok(session)
    }
}

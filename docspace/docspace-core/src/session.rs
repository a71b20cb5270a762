use parking_lot::RwLock;

/// Source of the bearer token used for catalog requests.
///
/// The workspace never acquires or invalidates sessions itself; it only asks
/// whether one is present.
pub trait SessionProvider: Send + Sync {
    fn current_token(&self) -> Option<String>;
    fn is_authenticated(&self) -> bool;
}

/// In-memory session that can be signed in and out.
pub struct StaticSession {
    token: RwLock<Option<String>>,
}

impl StaticSession {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            token: RwLock::new(None),
        }
    }

    pub fn sign_in(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn sign_out(&self) {
        *self.token.write() = None;
    }
}

impl SessionProvider for StaticSession {
    fn current_token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn is_authenticated(&self) -> bool {
        self.token.read().as_deref().map_or(false, |t| !t.is_empty())
    }
}

/// Session whose token is read from an environment variable on every call.
pub struct EnvSession {
    var: String,
}

impl EnvSession {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl SessionProvider for EnvSession {
    fn current_token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.is_empty())
    }

    fn is_authenticated(&self) -> bool {
        self.current_token().is_some()
    }
}

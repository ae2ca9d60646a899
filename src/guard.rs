use crate::config::RoutesConfig;

/// Where the guard sends a navigation, if anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Stay,
    Redirect(String),
}

/// Protected paths plus the two fixed destinations.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    protected: Vec<String>,
    landing: String,
    home: String,
}

impl RouteGuard {
    pub fn new(protected: Vec<String>, landing: impl Into<String>, home: impl Into<String>) -> Self {
        Self {
            protected,
            landing: landing.into(),
            home: home.into(),
        }
    }

    pub fn is_protected(&self, path: &str) -> bool {
        self.protected.iter().any(|p| p == path)
    }

    pub fn landing(&self) -> &str {
        &self.landing
    }

    pub fn home(&self) -> &str {
        &self.home
    }

    /// Re-run on every navigation and every session change. While the store
    /// is still loading nothing moves.
    pub fn decide(&self, path: &str, loading: bool, has_session: bool) -> GuardDecision {
        if loading {
            return GuardDecision::Stay;
        }
        if self.is_protected(path) && !has_session && path != self.landing {
            GuardDecision::Redirect(self.landing.clone())
        } else if !self.is_protected(path) && has_session && path == self.landing {
            GuardDecision::Redirect(self.home.clone())
        } else {
            GuardDecision::Stay
        }
    }
}

impl From<&RoutesConfig> for RouteGuard {
    fn from(routes: &RoutesConfig) -> Self {
        Self::new(
            routes.protected.clone(),
            routes.landing.clone(),
            routes.home.clone(),
        )
    }
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::from(&RoutesConfig::default())
    }
}

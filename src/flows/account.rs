use std::fmt;
use std::str::FromStr;

use crate::backend::{Credentials, ProfileSeed, Session, SharedBackend, SignUpOutcome};
use crate::error::{BackendError, FlowError, ValidationErrors};

const MIN_PASSWORD_LEN: usize = 6;
const MAX_USERNAME_LEN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    Seller,
    Buyer,
}

impl FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "seller" => Ok(AccountType::Seller),
            "buyer" => Ok(AccountType::Buyer),
            other => Err(format!("unknown account type: {other}")),
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountType::Seller => write!(f, "Seller"),
            AccountType::Buyer => write!(f, "Buyer"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignUpForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub account_type: Option<AccountType>,
}

impl SignUpForm {
    pub fn validate(&self) -> Result<(), FlowError> {
        let mut errors = ValidationErrors::new();
        let username = self.username.trim();
        if username.is_empty() {
            errors.add("username", "Username is required.");
        } else if username.chars().any(char::is_whitespace) {
            errors.add("username", "Username cannot contain spaces.");
        } else if username.chars().count() > MAX_USERNAME_LEN {
            errors.add(
                "username",
                format!("Username must be at most {} characters.", MAX_USERNAME_LEN),
            );
        }
        if !self.email.contains('@') {
            errors.add("email", "Please enter a valid email address.");
        }
        if self.password.len() < MIN_PASSWORD_LEN {
            errors.add(
                "password",
                format!("Password must be at least {} characters.", MIN_PASSWORD_LEN),
            );
        }
        if self.account_type.is_none() {
            errors.add("account_type", "Please choose Seller or Buyer.");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignInForm {
    pub email: String,
    pub password: String,
}

pub struct AccountFlow {
    backend: SharedBackend,
}

impl AccountFlow {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Create the identity and its profile together.
    pub async fn sign_up(&self, form: &SignUpForm) -> Result<SignUpOutcome, FlowError> {
        form.validate()?;

        let credentials = Credentials {
            email: form.email.trim().to_string(),
            password: form.password.clone(),
        };
        let seed = ProfileSeed {
            username: form.username.trim().to_string(),
            is_seller: form.account_type == Some(AccountType::Seller),
        };

        match self.backend.sign_up(&credentials, Some(&seed)).await {
            Ok(outcome) => {
                tracing::info!("Account created for {}", outcome.identity.email);
                Ok(outcome)
            }
            Err(e) if e.is_unique_violation() => {
                let mut errors = ValidationErrors::new();
                errors.add("username", "That username is already taken.");
                Err(FlowError::Validation(errors))
            }
            Err(e) => Err(FlowError::backend("Authentication Error", e)),
        }
    }

    pub async fn sign_in(&self, form: &SignInForm) -> Result<Session, FlowError> {
        let mut errors = ValidationErrors::new();
        if form.email.trim().is_empty() {
            errors.add("email", "Email is required.");
        }
        if form.password.is_empty() {
            errors.add("password", "Password is required.");
        }
        errors.into_result()?;

        let credentials = Credentials {
            email: form.email.trim().to_string(),
            password: form.password.clone(),
        };
        self.backend
            .sign_in(&credentials)
            .await
            .map_err(|e: BackendError| FlowError::backend("Authentication Error", e))
    }
}

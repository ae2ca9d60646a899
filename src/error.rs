use std::fmt;
use std::time::Duration;

use uuid::Uuid;

/// Postgres / PostgREST codes the flows care about.
pub mod codes {
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const NO_ROWS: &str = "PGRST116";
    pub const OBJECT_EXISTS: &str = "409";
}

/// Failure of a single call against the backend collaborator.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// A `single()` read matched zero rows.
    #[error("No rows returned")]
    NotFound,

    #[error("{message}")]
    Constraint { code: &'static str, message: String },

    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("Not authenticated")]
    Unauthorized,

    #[error("The resource already exists")]
    ObjectExists,

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
}

impl BackendError {
    /// Backend-specific error code, where the failure carries one.
    pub fn code(&self) -> Option<&str> {
        match self {
            BackendError::NotFound => Some(codes::NO_ROWS),
            BackendError::Constraint { code, .. } => Some(code),
            BackendError::ObjectExists => Some(codes::OBJECT_EXISTS),
            BackendError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        self.code() == Some(codes::FOREIGN_KEY_VIOLATION)
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code() == Some(codes::UNIQUE_VIOLATION)
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some(codes::NO_ROWS)
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi;

        match err {
            rusqlite::Error::QueryReturnedNoRows => BackendError::NotFound,
            rusqlite::Error::SqliteFailure(ref failure, ref msg)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let message = msg.clone().unwrap_or_else(|| failure.to_string());
                match failure.extended_code {
                    ffi::SQLITE_CONSTRAINT_FOREIGNKEY => BackendError::Constraint {
                        code: codes::FOREIGN_KEY_VIOLATION,
                        message,
                    },
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        BackendError::Constraint {
                            code: codes::UNIQUE_VIOLATION,
                            message,
                        }
                    }
                    _ => BackendError::Database(err),
                }
            }
            other => BackendError::Database(other),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// One rejected form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Local validation failures, collected before any network call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), FlowError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(FlowError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.0.iter().map(|e| e.message.as_str()).collect();
        write!(f, "{}", messages.join(" "))
    }
}

/// Outcome of a failed user-triggered flow. `Display` is the notification text.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("{0}")]
    Validation(ValidationErrors),

    #[error("You must be signed in to do that.")]
    NotSignedIn,

    #[error("{0}")]
    NotPermitted(&'static str),

    #[error("Please wait a moment before submitting another post.")]
    CoolingDown { retry_in: Duration },

    #[error("You've already posted this content recently. Please wait before posting the same content again.")]
    DuplicateContent,

    #[error("User profile not found. Please refresh the page and try again.")]
    ProfileMissing(#[source] BackendError),

    #[error("This post already exists or conflicts with an existing post. Please try again with different content.")]
    Conflict(#[source] BackendError),

    #[error("Image upload failed for {file}: {source}")]
    Upload {
        file: String,
        #[source]
        source: BackendError,
    },

    /// A listing row exists but not every image made it. The row is marked
    /// incomplete; `saved_images` records survive with sort orders `0..saved_images`.
    #[error("Listing {listing_id} is incomplete ({saved_images} image(s) saved): {source}")]
    ListingIncomplete {
        listing_id: Uuid,
        saved_images: usize,
        #[source]
        source: Box<FlowError>,
    },

    #[error("{context}: {source}")]
    Backend {
        context: &'static str,
        #[source]
        source: BackendError,
    },
}

impl FlowError {
    pub fn backend(context: &'static str, source: BackendError) -> Self {
        FlowError::Backend { context, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(extended: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(extended),
            Some("constraint failed".into()),
        )
    }

    #[test]
    fn foreign_key_failures_map_to_23503() {
        let err: BackendError = sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY).into();
        assert!(err.is_foreign_key_violation());
        assert_eq!(err.to_string(), "constraint failed");
    }

    #[test]
    fn unique_failures_map_to_23505() {
        let err: BackendError = sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE).into();
        assert!(err.is_unique_violation());
        let err: BackendError = sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY).into();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn no_rows_is_distinct_not_found() {
        let err: BackendError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(err.is_not_found());
        assert!(!err.is_unique_violation());
    }

    #[test]
    fn validation_errors_join_messages() {
        let mut errors = ValidationErrors::new();
        errors.add("title", "Title is required.");
        errors.add("price", "Price must be greater than zero.");
        assert!(errors.has("price"));
        let err = errors.into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Title is required. Price must be greater than zero."
        );
    }

    #[test]
    fn empty_validation_is_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }
}

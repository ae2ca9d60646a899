//! User-triggered flows. Each validates locally first, then performs its
//! backend calls one after another, and reports a single `FlowError` whose
//! `Display` is the notification text.

pub mod account;
pub mod display;
pub mod listing;
pub mod post;
pub mod settings;

use crate::backend::{Identity, UploadOptions};
use crate::error::FlowError;
use crate::session::SessionSnapshot;

/// The signed-in identity, or `NotSignedIn`.
pub(crate) fn require_user(snapshot: &SessionSnapshot) -> Result<Identity, FlowError> {
    snapshot.user().cloned().ok_or(FlowError::NotSignedIn)
}

/// Upload options used for every image the flows store.
pub(crate) fn image_upload_options(content_type: &str, upsert: bool) -> UploadOptions {
    UploadOptions {
        upsert,
        content_type: Some(content_type.to_string()),
        ..UploadOptions::default()
    }
}

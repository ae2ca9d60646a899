use std::sync::Arc;

use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::backend::{Identity, ImageFile, SharedBackend, LISTING_IMAGES_BUCKET};
use crate::clock::Clock;
use crate::config::ListingsConfig;
use crate::db::models::{Category, Listing, ListingStatus, NewListing, NewListingImage, Price};
use crate::error::{FlowError, ValidationErrors};
use crate::media;
use crate::saga::Compensations;
use crate::session::SessionStore;

use super::{image_upload_options, require_user};

pub const LISTING_CREATED: &str = "Listing created successfully!";

const MAX_TITLE_LEN: usize = 100;
const MIN_DESCRIPTION_LEN: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct ListingForm {
    pub title: String,
    pub description: String,
    pub price: String,
    pub category_id: Option<i64>,
    pub condition: String,
    images: Vec<ImageFile>,
}

impl ListingForm {
    pub fn images(&self) -> &[ImageFile] {
        &self.images
    }

    /// Attach more images. The whole batch is refused if it would exceed
    /// `max_images` or contains a non-image.
    pub fn add_images(&mut self, files: Vec<ImageFile>, max_images: usize) -> Result<(), FlowError> {
        let mut errors = ValidationErrors::new();
        if self.images.len() + files.len() > max_images {
            errors.add(
                "images",
                format!("You can upload a maximum of {} images.", max_images),
            );
        } else if files.iter().any(|f| !f.content_type.starts_with("image/")) {
            errors.add("images", "Please upload only image files.");
        }
        errors.into_result()?;
        self.images.extend(files);
        Ok(())
    }

    pub fn remove_image(&mut self, index: usize) -> Option<ImageFile> {
        (index < self.images.len()).then(|| self.images.remove(index))
    }

    /// Field checks that need no network. Returns the parsed price.
    pub fn validate(&self, max_images: usize) -> Result<Price, FlowError> {
        let mut errors = ValidationErrors::new();

        let title = self.title.trim();
        if title.is_empty() {
            errors.add("title", "Title is required.");
        } else if title.chars().count() > MAX_TITLE_LEN {
            errors.add(
                "title",
                format!("Title must be at most {} characters.", MAX_TITLE_LEN),
            );
        }

        let description = self.description.trim();
        if description.is_empty() {
            errors.add("description", "Description is required.");
        } else if description.chars().count() < MIN_DESCRIPTION_LEN {
            errors.add(
                "description",
                format!(
                    "Description must be at least {} characters.",
                    MIN_DESCRIPTION_LEN
                ),
            );
        }

        let price = match self.price.parse::<Price>() {
            Ok(price) => Some(price),
            Err(e) => {
                errors.add("price", e.to_string());
                None
            }
        };

        if self.category_id.is_none() {
            errors.add("category", "Please select a category.");
        }
        if self.condition.trim().is_empty() {
            errors.add("condition", "Please select the item's condition.");
        }

        if self.images.is_empty() {
            errors.add("images", "Please upload at least one image for your listing.");
        } else if self.images.len() > max_images {
            errors.add(
                "images",
                format!("You can upload a maximum of {} images.", max_images),
            );
        }

        errors.into_result()?;
        price.ok_or_else(|| FlowError::Validation(ValidationErrors::new()))
    }
}

pub struct ListingFlow {
    backend: SharedBackend,
    store: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    max_images: usize,
    currency: String,
    categories: OnceCell<Vec<Category>>,
}

impl ListingFlow {
    pub fn new(
        backend: SharedBackend,
        store: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
        config: &ListingsConfig,
    ) -> Self {
        Self {
            backend,
            store,
            clock,
            max_images: config.max_images,
            currency: config.currency.clone(),
            categories: OnceCell::new(),
        }
    }

    pub fn max_images(&self) -> usize {
        self.max_images
    }

    /// Categories for the picker, loaded once.
    pub async fn categories(&self) -> Result<&[Category], FlowError> {
        let categories = self
            .categories
            .get_or_try_init(|| async {
                self.backend
                    .categories()
                    .await
                    .map_err(|e| FlowError::backend("Error loading categories", e))
            })
            .await?;
        Ok(categories.as_slice())
    }

    /// Create the listing, upload its images in order and record them.
    ///
    /// The listing row is written as pending first. If an upload fails part
    /// way, the images already uploaded are recorded, the listing is marked
    /// incomplete and `ListingIncomplete` reports how many survived. A failed
    /// activation marks the listing incomplete as well, images intact.
    pub async fn submit(&self, form: &ListingForm) -> Result<Listing, FlowError> {
        let snapshot = self.store.snapshot();
        let user = require_user(&snapshot)?;
        if !snapshot.profile.as_ref().is_some_and(|p| p.can_sell()) {
            return Err(FlowError::NotPermitted("Only sellers can create listings."));
        }
        let price = form.validate(self.max_images)?;

        let category_id = form.category_id.unwrap_or_default();
        if !self.categories().await?.iter().any(|c| c.id == category_id) {
            let mut errors = ValidationErrors::new();
            errors.add("category", "Please select a valid category.");
            return Err(FlowError::Validation(errors));
        }

        let new_listing = NewListing {
            seller_id: user.id,
            title: form.title.trim().to_string(),
            description: form.description.trim().to_string(),
            price,
            currency: self.currency.clone(),
            condition: form.condition.trim().to_string(),
            category_id,
            status: ListingStatus::Pending,
        };
        let mut listing = self
            .backend
            .insert_listing(&new_listing)
            .await
            .map_err(|e| FlowError::backend("Listing creation failed", e))?;
        tracing::info!("Listing {} created, uploading {} image(s)", listing.id, form.images.len());

        let millis = self.clock.now().timestamp_millis();
        let mut uploaded: Vec<(String, NewListingImage)> = Vec::with_capacity(form.images.len());
        for (index, image) in form.images.iter().enumerate() {
            let path = media::listing_image_path(
                user.id,
                listing.id,
                millis,
                index,
                &media::extension(image),
            );
            let options = image_upload_options(&image.content_type, false);
            match self
                .backend
                .upload(LISTING_IMAGES_BUCKET, &path, image, &options)
                .await
            {
                Ok(stored) => {
                    let record = NewListingImage {
                        listing_id: listing.id,
                        image_url: self.backend.public_url(LISTING_IMAGES_BUCKET, &stored),
                        sort_order: index as i32,
                    };
                    uploaded.push((stored, record));
                }
                Err(source) => {
                    tracing::error!("Upload of image {} for listing {} failed: {}", index, listing.id, source);
                    let failure = FlowError::Upload {
                        file: image.name.clone(),
                        source,
                    };
                    return Err(self.keep_partial(&user, listing.id, uploaded, failure).await);
                }
            }
        }

        let records: Vec<NewListingImage> = uploaded.iter().map(|(_, r)| r.clone()).collect();
        if let Err(e) = self.backend.insert_listing_images(&records).await {
            tracing::error!("Recording images for listing {} failed: {}", listing.id, e);
            self.discard_objects(&uploaded).await;
            self.mark_incomplete(listing.id).await;
            return Err(FlowError::ListingIncomplete {
                listing_id: listing.id,
                saved_images: 0,
                source: Box::new(FlowError::backend("Image record insertion failed", e)),
            });
        }

        if let Err(e) = self
            .backend
            .set_listing_status(listing.id, ListingStatus::Active)
            .await
        {
            tracing::error!("Activating listing {} failed: {}", listing.id, e);
            self.mark_incomplete(listing.id).await;
            return Err(FlowError::ListingIncomplete {
                listing_id: listing.id,
                saved_images: records.len(),
                source: Box::new(FlowError::backend("Listing activation failed", e)),
            });
        }
        listing.status = ListingStatus::Active;

        tracing::info!("{} ({} by {})", LISTING_CREATED, listing.id, user.id);
        Ok(listing)
    }

    /// Record the images that did upload, then flag the listing.
    async fn keep_partial(
        &self,
        user: &Identity,
        listing_id: Uuid,
        uploaded: Vec<(String, NewListingImage)>,
        failure: FlowError,
    ) -> FlowError {
        let mut saved_images = uploaded.len();
        if !uploaded.is_empty() {
            let records: Vec<NewListingImage> = uploaded.iter().map(|(_, r)| r.clone()).collect();
            if let Err(e) = self.backend.insert_listing_images(&records).await {
                tracing::error!("Recording partial images for listing {} failed: {}", listing_id, e);
                self.discard_objects(&uploaded).await;
                saved_images = 0;
            }
        }
        self.mark_incomplete(listing_id).await;
        tracing::warn!(
            "Listing {} by {} kept incomplete with {} image(s)",
            listing_id,
            user.id,
            saved_images
        );
        FlowError::ListingIncomplete {
            listing_id,
            saved_images,
            source: Box::new(failure),
        }
    }

    async fn discard_objects(&self, uploaded: &[(String, NewListingImage)]) {
        let mut compensations = Compensations::new();
        for (path, _) in uploaded {
            let backend = self.backend.clone();
            let path = path.clone();
            compensations.push(format!("remove listing image {}", path), async move {
                backend.remove(LISTING_IMAGES_BUCKET, &[path]).await
            });
        }
        compensations.unwind().await;
    }

    async fn mark_incomplete(&self, listing_id: Uuid) {
        if let Err(e) = self
            .backend
            .set_listing_status(listing_id, ListingStatus::Incomplete)
            .await
        {
            tracing::error!("Could not mark listing {} incomplete: {}", listing_id, e);
        }
    }
}

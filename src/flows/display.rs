//! Read-only views: feed, listing detail, public profile.

use uuid::Uuid;

use crate::backend::SharedBackend;
use crate::db::models::{Category, FeedItem, ListingDetail, Profile};
use crate::error::FlowError;
use crate::media::ImageHostPolicy;

/// A feed post ready to render. Image links outside the allow-list are dropped.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub item: FeedItem,
    pub author_name: String,
    pub author_title: &'static str,
    pub author_avatar: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListingView {
    pub detail: ListingDetail,
    pub seller_name: String,
    pub image_urls: Vec<String>,
}

impl ListingView {
    /// "USD 45.00"
    pub fn price_label(&self) -> String {
        format!("{} {}", self.detail.listing.currency, self.detail.listing.price)
    }
}

#[derive(Debug, Clone)]
pub struct ProfilePage {
    pub profile: Profile,
    pub avatar_url: Option<String>,
    pub listing_count: i64,
    pub post_count: i64,
}

pub struct DisplayFlow {
    backend: SharedBackend,
    images: ImageHostPolicy,
}

impl DisplayFlow {
    pub fn new(backend: SharedBackend, images: ImageHostPolicy) -> Self {
        Self { backend, images }
    }

    fn allowed(&self, url: Option<&str>) -> Option<String> {
        let url = url?;
        if self.images.allows(url) {
            Some(url.to_string())
        } else {
            tracing::debug!("Dropping image from disallowed host: {}", url);
            None
        }
    }

    pub async fn feed(&self) -> Result<Vec<FeedEntry>, FlowError> {
        let items = self
            .backend
            .feed()
            .await
            .map_err(|e| FlowError::backend("Error loading posts", e))?;

        Ok(items
            .into_iter()
            .map(|item| {
                let (author_name, author_title) = match item.author.as_ref() {
                    Some(author) => (author.display_name().to_string(), author.title()),
                    None => ("Unknown User".to_string(), "Buyer"),
                };
                let author_avatar =
                    self.allowed(item.author.as_ref().and_then(|a| a.avatar_url.as_deref()));
                let image_url = self.allowed(item.post.image_url.as_deref());
                FeedEntry {
                    item,
                    author_name,
                    author_title,
                    author_avatar,
                    image_url,
                }
            })
            .collect())
    }

    /// `Ok(None)` when no such listing exists.
    pub async fn listing(&self, id: Uuid) -> Result<Option<ListingView>, FlowError> {
        let Some(detail) = self
            .backend
            .listing_detail(id)
            .await
            .map_err(|e| FlowError::backend("Error loading listing", e))?
        else {
            return Ok(None);
        };

        let seller_name = detail
            .seller
            .as_ref()
            .map(|s| s.username.clone())
            .unwrap_or_else(|| "Unknown User".to_string());
        let image_urls = detail
            .images
            .iter()
            .filter_map(|img| self.allowed(Some(&img.image_url)))
            .collect();
        Ok(Some(ListingView {
            detail,
            seller_name,
            image_urls,
        }))
    }

    /// `Ok(None)` when no profile has that username.
    pub async fn profile_page(&self, username: &str) -> Result<Option<ProfilePage>, FlowError> {
        let Some(profile) = self
            .backend
            .profile_by_username(username)
            .await
            .map_err(|e| FlowError::backend("Error loading profile", e))?
        else {
            return Ok(None);
        };

        let listing_count = self
            .backend
            .count_listings(profile.id)
            .await
            .map_err(|e| FlowError::backend("Error loading profile", e))?;
        let post_count = self
            .backend
            .count_posts(profile.id)
            .await
            .map_err(|e| FlowError::backend("Error loading profile", e))?;
        let avatar_url = self.allowed(profile.avatar_url.as_deref());

        Ok(Some(ProfilePage {
            profile,
            avatar_url,
            listing_count,
            post_count,
        }))
    }

    pub async fn categories(&self) -> Result<Vec<Category>, FlowError> {
        self.backend
            .categories()
            .await
            .map_err(|e| FlowError::backend("Error loading categories", e))
    }
}

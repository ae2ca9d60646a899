use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use super::{expect_success, parse_content_range, read_json, HostedBackend};
use crate::backend::RecordsApi;
use crate::clock::format_timestamp;
use crate::db::models::{
    Category, FeedItem, Listing, ListingDetail, ListingStatus, NewListing, NewListingImage,
    NewPost, NewProfile, Post, Profile, ProfilePatch,
};
use crate::error::BackendResult;

/// Ask PostgREST for exactly one row; zero rows comes back as `PGRST116`.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

const FEED_SELECT: &str = "*,profiles!posts_user_id_fkey(*),comments(count),likes(count)";
const LISTING_DETAIL_SELECT: &str = "*,profiles(username),listing_images(image_url,sort_order)";

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

impl HostedBackend {
    async fn table(&self, method: Method, table: &str) -> RequestBuilder {
        self.request(method, &format!("rest/v1/{}", table)).await
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> BackendResult<T> {
        let response = self
            .table(Method::GET, table)
            .await
            .header("Accept", SINGLE_OBJECT)
            .query(query)
            .send()
            .await?;
        read_json(response).await
    }

    async fn select_many<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> BackendResult<Vec<T>> {
        let response = self.table(Method::GET, table).await.query(query).send().await?;
        read_json(response).await
    }

    async fn count(&self, table: &str, column: &str, value: Uuid) -> BackendResult<i64> {
        let response = self
            .table(Method::HEAD, table)
            .await
            .header("Prefer", "count=exact")
            .query(&[("select", "id".to_string()), (column, eq(value))])
            .send()
            .await?;
        let response = expect_success(response).await?;
        parse_content_range(&response)
    }

    async fn insert_returning<B: serde::Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &str,
        body: &B,
    ) -> BackendResult<T> {
        let response = self
            .table(Method::POST, table)
            .await
            .header("Prefer", "return=representation")
            .header("Accept", SINGLE_OBJECT)
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl RecordsApi for HostedBackend {
    async fn profile(&self, id: Uuid) -> BackendResult<Profile> {
        self.select_one("profiles", &[("select", "*".into()), ("id", eq(id))])
            .await
    }

    async fn find_profile(&self, id: Uuid) -> BackendResult<Option<Profile>> {
        let rows: Vec<Profile> = self
            .select_many("profiles", &[("select", "*".into()), ("id", eq(id))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn profile_by_username(&self, username: &str) -> BackendResult<Option<Profile>> {
        let rows: Vec<Profile> = self
            .select_many(
                "profiles",
                &[("select", "*".into()), ("username", eq(username))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> BackendResult<Profile> {
        self.insert_returning("profiles", profile).await
    }

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> BackendResult<Profile> {
        let response = self
            .table(Method::PATCH, "profiles")
            .await
            .header("Prefer", "return=representation")
            .header("Accept", SINGLE_OBJECT)
            .query(&[("id", eq(id))])
            .json(patch)
            .send()
            .await?;
        read_json(response).await
    }

    async fn categories(&self) -> BackendResult<Vec<Category>> {
        self.select_many(
            "categories",
            &[("select", "id,name".into()), ("order", "name.asc".into())],
        )
        .await
    }

    async fn insert_listing(&self, listing: &NewListing) -> BackendResult<Listing> {
        self.insert_returning("listings", listing).await
    }

    async fn set_listing_status(&self, id: Uuid, status: ListingStatus) -> BackendResult<()> {
        let response = self
            .table(Method::PATCH, "listings")
            .await
            .header("Prefer", "return=minimal")
            .query(&[("id", eq(id))])
            .json(&json!({ "status": status }))
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    async fn listing_detail(&self, id: Uuid) -> BackendResult<Option<ListingDetail>> {
        let rows: Vec<ListingDetail> = self
            .select_many(
                "listings",
                &[("select", LISTING_DETAIL_SELECT.into()), ("id", eq(id))],
            )
            .await?;
        Ok(rows.into_iter().next().map(|mut detail| {
            detail.images.sort_by_key(|image| image.sort_order);
            detail
        }))
    }

    async fn count_listings(&self, seller_id: Uuid) -> BackendResult<i64> {
        self.count("listings", "seller_id", seller_id).await
    }

    async fn insert_listing_images(&self, images: &[NewListingImage]) -> BackendResult<()> {
        if images.is_empty() {
            return Ok(());
        }
        let response = self
            .table(Method::POST, "listing_images")
            .await
            .header("Prefer", "return=minimal")
            .json(images)
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    async fn insert_post(&self, post: &NewPost) -> BackendResult<Post> {
        self.insert_returning("posts", post).await
    }

    async fn recent_duplicate_posts(
        &self,
        author: Uuid,
        content: &str,
        since: DateTime<Utc>,
    ) -> BackendResult<Vec<Post>> {
        self.select_many(
            "posts",
            &[
                ("select", "*".into()),
                ("user_id", eq(author)),
                ("content", eq(content)),
                ("created_at", format!("gte.{}", format_timestamp(&since))),
            ],
        )
        .await
    }

    async fn feed(&self) -> BackendResult<Vec<FeedItem>> {
        self.select_many(
            "posts",
            &[
                ("select", FEED_SELECT.into()),
                ("order", "created_at.desc".into()),
            ],
        )
        .await
    }

    async fn count_posts(&self, author: Uuid) -> BackendResult<i64> {
        self.count("posts", "user_id", author).await
    }
}

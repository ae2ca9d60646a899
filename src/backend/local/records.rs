use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{uuid_column, LocalBackend};
use crate::backend::RecordsApi;
use crate::clock::format_timestamp;
use crate::db::models::{
    Category, FeedItem, Listing, ListingDetail, ListingImage, ListingStatus, NewListing,
    NewListingImage, NewPost, NewProfile, Post, Price, Profile, ProfilePatch, ProfileRef,
};
use crate::error::{BackendError, BackendResult};

const PROFILE_COLUMNS: &str = "id, username, full_name, bio, country, avatar_url, is_seller,
    is_premium_seller, age, gender, ethnicity, body_size, shoe_size, will_show_face,
    occupation, tattoos, piercings, hair_color, eye_color, smokes, drinks, height,
    relationship_status, accepted_payments, what_i_offer, created_at, updated_at";

/// Columns a `ProfilePatch` may touch. Anything else is refused.
const PATCHABLE_COLUMNS: &[&str] = &[
    "username",
    "bio",
    "country",
    "avatar_url",
    "age",
    "gender",
    "ethnicity",
    "body_size",
    "shoe_size",
    "will_show_face",
    "occupation",
    "tattoos",
    "piercings",
    "hair_color",
    "eye_color",
    "smokes",
    "drinks",
    "height",
    "relationship_status",
    "accepted_payments",
    "what_i_offer",
    "updated_at",
];

const LISTING_COLUMNS: &str = "id, seller_id, title, description, price_cents, currency,
    condition, category_id, status, created_at";

const POST_COLUMNS: &str = "id, user_id, content, image_url, created_at";

fn string_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: uuid_column(row, 0)?,
        username: row.get(1)?,
        full_name: row.get(2)?,
        bio: row.get(3)?,
        country: row.get(4)?,
        avatar_url: row.get(5)?,
        is_seller: row.get(6)?,
        is_premium_seller: row.get(7)?,
        age: row.get(8)?,
        gender: row.get(9)?,
        ethnicity: row.get(10)?,
        body_size: row.get(11)?,
        shoe_size: row.get(12)?,
        will_show_face: row.get(13)?,
        occupation: row.get(14)?,
        tattoos: row.get(15)?,
        piercings: row.get(16)?,
        hair_color: row.get(17)?,
        eye_color: row.get(18)?,
        smokes: row.get(19)?,
        drinks: row.get(20)?,
        height: row.get(21)?,
        relationship_status: row.get(22)?,
        accepted_payments: string_list(row.get(23)?),
        what_i_offer: string_list(row.get(24)?),
        created_at: row.get(25)?,
        updated_at: row.get(26)?,
    })
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<Listing> {
    let status: String = row.get(8)?;
    Ok(Listing {
        id: uuid_column(row, 0)?,
        seller_id: uuid_column(row, 1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        price: Price(row.get(4)?),
        currency: row.get(5)?,
        condition: row.get(6)?,
        category_id: row.get(7)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, e.into())
        })?,
        created_at: row.get(9)?,
    })
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: uuid_column(row, 0)?,
        user_id: uuid_column(row, 1)?,
        content: row.get(2)?,
        image_url: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn load_profile(conn: &Connection, id: Uuid) -> BackendResult<Option<Profile>> {
    let sql = format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLUMNS);
    Ok(conn
        .query_row(&sql, params![id.to_string()], profile_from_row)
        .optional()?)
}

/// JSON patch value to a SQLite value. Arrays are stored as JSON text.
fn sql_value(value: JsonValue) -> SqlValue {
    match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::Bool(b) => SqlValue::Integer(b as i64),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => SqlValue::Text(s),
        other => SqlValue::Text(other.to_string()),
    }
}

#[async_trait]
impl RecordsApi for LocalBackend {
    async fn profile(&self, id: Uuid) -> BackendResult<Profile> {
        let conn = self.pool.get()?;
        load_profile(&conn, id)?.ok_or(BackendError::NotFound)
    }

    async fn find_profile(&self, id: Uuid) -> BackendResult<Option<Profile>> {
        let conn = self.pool.get()?;
        load_profile(&conn, id)
    }

    async fn profile_by_username(&self, username: &str) -> BackendResult<Option<Profile>> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {} FROM profiles WHERE username = ?1", PROFILE_COLUMNS);
        Ok(conn
            .query_row(&sql, params![username], profile_from_row)
            .optional()?)
    }

    async fn insert_profile(&self, profile: &NewProfile) -> BackendResult<Profile> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO profiles (id, username, is_seller, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                profile.id.to_string(),
                profile.username,
                profile.is_seller,
                self.now()
            ],
        )?;
        load_profile(&conn, profile.id)?.ok_or(BackendError::NotFound)
    }

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> BackendResult<Profile> {
        let fields = match serde_json::to_value(patch)? {
            JsonValue::Object(map) => map,
            _ => return Err(BackendError::Invalid("profile patch must be an object".into())),
        };

        let conn = self.pool.get()?;
        if fields.is_empty() {
            return load_profile(&conn, id)?.ok_or(BackendError::NotFound);
        }

        let mut assignments = Vec::with_capacity(fields.len());
        let mut values = Vec::with_capacity(fields.len() + 1);
        for (column, value) in fields {
            if !PATCHABLE_COLUMNS.contains(&column.as_str()) {
                return Err(BackendError::Invalid(format!("unknown column: {}", column)));
            }
            values.push(sql_value(value));
            assignments.push(format!("{} = ?{}", column, values.len()));
        }
        values.push(SqlValue::Text(id.to_string()));

        let sql = format!(
            "UPDATE profiles SET {} WHERE id = ?{}",
            assignments.join(", "),
            values.len()
        );
        let updated = conn.execute(&sql, params_from_iter(values))?;
        if updated == 0 {
            return Err(BackendError::NotFound);
        }
        tracing::debug!("Updated profile {}", id);
        load_profile(&conn, id)?.ok_or(BackendError::NotFound)
    }

    async fn categories(&self) -> BackendResult<Vec<Category>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT id, name FROM categories ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn insert_listing(&self, listing: &NewListing) -> BackendResult<Listing> {
        let record = Listing {
            id: Uuid::now_v7(),
            seller_id: listing.seller_id,
            title: listing.title.clone(),
            description: listing.description.clone(),
            price: listing.price,
            currency: listing.currency.clone(),
            condition: listing.condition.clone(),
            category_id: listing.category_id,
            status: listing.status,
            created_at: self.now(),
        };

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO listings (id, seller_id, title, description, price_cents, currency,
                                   condition, category_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id.to_string(),
                record.seller_id.to_string(),
                record.title,
                record.description,
                record.price.cents(),
                record.currency,
                record.condition,
                record.category_id,
                record.status.as_str(),
                record.created_at,
            ],
        )?;
        Ok(record)
    }

    async fn set_listing_status(&self, id: Uuid, status: ListingStatus) -> BackendResult<()> {
        let conn = self.pool.get()?;
        let updated = conn.execute(
            "UPDATE listings SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )?;
        if updated == 0 {
            return Err(BackendError::NotFound);
        }
        Ok(())
    }

    async fn listing_detail(&self, id: Uuid) -> BackendResult<Option<ListingDetail>> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT {}, (SELECT username FROM profiles p WHERE p.id = l.seller_id)
             FROM listings l WHERE l.id = ?1",
            LISTING_COLUMNS
        );
        let found = conn
            .query_row(&sql, params![id.to_string()], |row| {
                Ok((listing_from_row(row)?, row.get::<_, Option<String>>(10)?))
            })
            .optional()?;

        let Some((listing, seller)) = found else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT image_url, sort_order FROM listing_images
             WHERE listing_id = ?1 ORDER BY sort_order",
        )?;
        let images = stmt
            .query_map(params![id.to_string()], |row| {
                Ok(ListingImage {
                    image_url: row.get(0)?,
                    sort_order: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(ListingDetail {
            listing,
            seller: seller.map(|username| ProfileRef { username }),
            images,
        }))
    }

    async fn count_listings(&self, seller_id: Uuid) -> BackendResult<i64> {
        let conn = self.pool.get()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM listings WHERE seller_id = ?1",
            params![seller_id.to_string()],
            |row| row.get(0),
        )?)
    }

    async fn insert_listing_images(&self, images: &[NewListingImage]) -> BackendResult<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO listing_images (listing_id, image_url, sort_order) VALUES (?1, ?2, ?3)",
            )?;
            for image in images {
                stmt.execute(params![
                    image.listing_id.to_string(),
                    image.image_url,
                    image.sort_order
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn insert_post(&self, post: &NewPost) -> BackendResult<Post> {
        let record = Post {
            id: Uuid::now_v7(),
            user_id: post.user_id,
            content: post.content.clone(),
            image_url: post.image_url.clone(),
            created_at: self.now(),
        };
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO posts (id, user_id, content, image_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.to_string(),
                record.user_id.to_string(),
                record.content,
                record.image_url,
                record.created_at,
            ],
        )?;
        tracing::debug!("Inserted post {}", record.id);
        Ok(record)
    }

    async fn recent_duplicate_posts(
        &self,
        author: Uuid,
        content: &str,
        since: DateTime<Utc>,
    ) -> BackendResult<Vec<Post>> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT {} FROM posts WHERE user_id = ?1 AND content = ?2 AND created_at >= ?3",
            POST_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let posts = stmt
            .query_map(
                params![author.to_string(), content, format_timestamp(&since)],
                post_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    async fn feed(&self) -> BackendResult<Vec<FeedItem>> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT {},
                    (SELECT COUNT(*) FROM comments c WHERE c.post_id = posts.id),
                    (SELECT COUNT(*) FROM likes k WHERE k.post_id = posts.id)
             FROM posts ORDER BY created_at DESC, id DESC",
            POST_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    post_from_row(row)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut authors: HashMap<Uuid, Option<Profile>> = HashMap::new();
        let mut items = Vec::with_capacity(rows.len());
        for (post, comment_count, like_count) in rows {
            let author = match authors.get(&post.user_id) {
                Some(cached) => cached.clone(),
                None => {
                    let loaded = load_profile(&conn, post.user_id)?;
                    authors.insert(post.user_id, loaded.clone());
                    loaded
                }
            };
            items.push(FeedItem {
                post,
                author,
                comment_count,
                like_count,
            });
        }
        Ok(items)
    }

    async fn count_posts(&self, author: Uuid) -> BackendResult<i64> {
        let conn = self.pool.get()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE user_id = ?1",
            params![author.to_string()],
            |row| row.get(0),
        )?)
    }
}

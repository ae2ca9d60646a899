use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

// --- Profiles ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_seller: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_premium_seller: bool,
    #[serde(default)]
    pub age: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub ethnicity: Option<String>,
    #[serde(default)]
    pub body_size: Option<String>,
    #[serde(default)]
    pub shoe_size: Option<String>,
    #[serde(default)]
    pub will_show_face: Option<String>,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub tattoos: Option<String>,
    #[serde(default)]
    pub piercings: Option<String>,
    #[serde(default)]
    pub hair_color: Option<String>,
    #[serde(default)]
    pub eye_color: Option<String>,
    #[serde(default)]
    pub smokes: Option<String>,
    #[serde(default)]
    pub drinks: Option<String>,
    #[serde(default)]
    pub height: Option<String>,
    #[serde(default)]
    pub relationship_status: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub accepted_payments: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub what_i_offer: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Profile {
    /// A profile with only the required fields set.
    pub fn minimal(id: Uuid, username: impl Into<String>, is_seller: bool) -> Self {
        Self {
            id,
            username: username.into(),
            full_name: None,
            bio: None,
            country: None,
            avatar_url: None,
            is_seller,
            is_premium_seller: false,
            age: None,
            gender: None,
            ethnicity: None,
            body_size: None,
            shoe_size: None,
            will_show_face: None,
            occupation: None,
            tattoos: None,
            piercings: None,
            hair_color: None,
            eye_color: None,
            smokes: None,
            drinks: None,
            height: None,
            relationship_status: None,
            accepted_payments: Vec::new(),
            what_i_offer: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Full name, then username, then a placeholder.
    pub fn display_name(&self) -> &str {
        match self.full_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ if !self.username.is_empty() => &self.username,
            _ => "Unknown User",
        }
    }

    pub fn title(&self) -> &'static str {
        if self.is_premium_seller {
            "Premium Seller"
        } else if self.is_seller {
            "Seller"
        } else {
            "Buyer"
        }
    }

    pub fn can_sell(&self) -> bool {
        self.is_seller || self.is_premium_seller
    }
}

/// Row written when a profile is first created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProfile {
    pub id: Uuid,
    pub username: String,
    pub is_seller: bool,
}

/// Field-scoped profile update. `None` leaves a column untouched;
/// `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ethnicity: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_size: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shoe_size: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub will_show_face: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occupation: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tattoos: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub piercings: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hair_color: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eye_color: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smokes: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drinks: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_status: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_payments: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub what_i_offer: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl ProfilePatch {
    /// Column names this patch would touch.
    pub fn columns(&self) -> Vec<String> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

/// Minimal author reference embedded in listing detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRef {
    pub username: String,
}

// --- Categories ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

// --- Listings ---

/// A currency amount in minor units (cents). Travels as a two-decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Price(pub i64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceError {
    #[error("Price is required.")]
    Empty,
    #[error("Price must be a number.")]
    NotANumber,
    #[error("Price can have at most two decimal places.")]
    TooPrecise,
    #[error("Price must be greater than zero.")]
    NotPositive,
}

impl Price {
    pub fn cents(self) -> i64 {
        self.0
    }
}

impl FromStr for Price {
    type Err = PriceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PriceError::Empty);
        }
        let (negative, digits) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        let numeric = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !numeric(whole) || !numeric(frac) {
            return Err(PriceError::NotANumber);
        }
        if frac.len() > 2 {
            return Err(PriceError::TooPrecise);
        }
        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| PriceError::NotANumber)?
        };
        let frac: i64 = format!("{:0<2}", frac)
            .parse()
            .map_err(|_| PriceError::NotANumber)?;
        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac))
            .ok_or(PriceError::NotANumber)?;
        if negative || cents == 0 {
            return Err(PriceError::NotPositive);
        }
        Ok(Price(cents))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Float(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(units) => units
                .checked_mul(100)
                .map(Price)
                .ok_or_else(|| serde::de::Error::custom("price out of range")),
            Raw::Float(units) => Ok(Price((units * 100.0).round() as i64)),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    /// Row written, images still being attached.
    Pending,
    Active,
    /// Image step failed; the listing has fewer images than submitted.
    Incomplete,
}

impl ListingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ListingStatus::Pending => "pending",
            ListingStatus::Active => "active",
            ListingStatus::Incomplete => "incomplete",
        }
    }
}

impl FromStr for ListingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ListingStatus::Pending),
            "active" => Ok(ListingStatus::Active),
            "incomplete" => Ok(ListingStatus::Incomplete),
            other => Err(format!("unknown listing status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewListing {
    pub seller_id: Uuid,
    pub title: String,
    pub description: String,
    pub price: Price,
    pub currency: String,
    pub condition: String,
    pub category_id: i64,
    pub status: ListingStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    pub description: String,
    pub price: Price,
    pub currency: String,
    pub condition: String,
    pub category_id: i64,
    pub status: ListingStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewListingImage {
    pub listing_id: Uuid,
    pub image_url: String,
    pub sort_order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingImage {
    pub image_url: String,
    pub sort_order: i32,
}

/// Listing with its seller's username and images in sort order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingDetail {
    #[serde(flatten)]
    pub listing: Listing,
    #[serde(rename = "profiles", default)]
    pub seller: Option<ProfileRef>,
    #[serde(rename = "listing_images", default, deserialize_with = "null_as_default")]
    pub images: Vec<ListingImage>,
}

// --- Posts ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPost {
    pub user_id: Uuid,
    pub content: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at: String,
}

/// A post as the feed shows it: author embedded, comment/like totals attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    #[serde(flatten)]
    pub post: Post,
    #[serde(rename = "profiles", default)]
    pub author: Option<Profile>,
    #[serde(rename = "comments", default, deserialize_with = "aggregate_count")]
    pub comment_count: i64,
    #[serde(rename = "likes", default, deserialize_with = "aggregate_count")]
    pub like_count: i64,
}

// --- Serde helpers ---

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Embedded aggregates arrive as `[{"count": n}]`; plain numbers are accepted too.
fn aggregate_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    struct Count {
        count: i64,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Plain(i64),
        Embedded(Vec<Count>),
        Null(Option<()>),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Plain(n) => n,
        Raw::Embedded(rows) => rows.first().map(|c| c.count).unwrap_or(0),
        Raw::Null(_) => 0,
    })
}

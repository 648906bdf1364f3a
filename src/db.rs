mod schema;

pub use schema::Database;

use crate::config::EditionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Username for login.
    pub username: String,
    /// Argon2 password hash.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Display name.
    pub display_name: Option<String>,
    /// User role: "admin", "publisher" or "user".
    pub role: String,
    /// Account creation timestamp.
    pub created_at: i64,
    /// Last login timestamp.
    pub last_login: Option<i64>,
}

impl User {
    /// Whether this user may manage editions and area maps.
    pub fn is_publisher(&self) -> bool {
        self.role == "admin" || self.role == "publisher"
    }
}

/// Authentication session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session token.
    pub token: String,
    /// User ID.
    pub user_id: String,
    /// Expiration timestamp.
    pub expires_at: i64,
}

/// Site setting, stored as a string keyed by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    /// Setting key.
    pub key: String,
    /// Raw string value.
    pub value: String,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Subscription state for one user. Written by the billing collaborator;
/// this core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscribing user ID.
    pub user_id: String,
    /// Provider status string ("active", "trialing", "canceled", ...).
    pub status: String,
    /// End of the current billing period, if one is recorded.
    pub current_period_end: Option<i64>,
    /// Whether the subscribed plan is the free tier.
    pub plan_is_free: bool,
    /// Creation timestamp.
    pub created_at: i64,
}

impl Subscription {
    /// Whether the subscription grants access at the given instant.
    pub fn is_active(&self, now: i64) -> bool {
        (self.status == "active" || self.status == "trialing")
            && self.current_period_end.is_none_or(|end| end > now)
    }
}

/// One published or draft issue (the "e-paper").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edition {
    /// Edition ID.
    pub id: String,
    /// Edition title.
    pub title: String,
    /// Description text.
    pub description: Option<String>,
    /// Cover date of the issue.
    pub edition_date: Option<String>,
    /// Web path of the uploaded source document (None for image uploads).
    pub source_path: Option<String>,
    /// Web path of the thumbnail image.
    pub thumbnail_path: Option<String>,
    /// Number of pages; 0 until ingestion commits.
    pub total_pages: i64,
    /// Lifecycle status.
    pub status: EditionStatus,
    /// Whether the edition is publicly listed.
    pub is_public: bool,
    /// Whether the edition bypasses subscription gating.
    pub is_free: bool,
    /// Owning publisher user ID.
    pub created_by: String,
    /// Creation timestamp.
    pub created_at: i64,
    /// Publish timestamp, set when the edition is published.
    pub publish_date: Option<i64>,
}

/// One rasterized page image belonging to an edition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// Page ID.
    pub id: String,
    /// Owning edition ID.
    pub edition_id: String,
    /// 1-based page number, dense per edition.
    pub page_number: i64,
    /// Web path of the page image.
    pub image_path: String,
}

/// Page data produced by ingestion, before row creation.
#[derive(Debug, Clone)]
pub struct NewPage {
    /// 1-based page number.
    pub page_number: i64,
    /// Web path of the page image.
    pub image_path: String,
}

/// A user-drawn polygon hotspot on a page (persisted row).
///
/// The row keeps the action fields flat and nullable; kind/field coherence
/// is enforced by [`crate::areamap::AreaAction`] on the construction path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaMap {
    /// Area map ID.
    pub id: String,
    /// Owning edition ID.
    pub edition_id: String,
    /// Owning page ID.
    pub page_id: String,
    /// Area kind: "link", "page_nav" or "ad".
    pub area_type: String,
    /// Polygon vertices as a JSON array of {x, y} points.
    pub coordinates: String,
    /// Target URL (meaningful for "link" areas).
    pub link_url: Option<String>,
    /// Target page number (meaningful for "page_nav" areas).
    pub link_page_number: Option<i64>,
    /// Linked advertisement ID (meaningful for "ad" areas).
    pub ad_id: Option<String>,
    /// Tooltip text shown on hover.
    pub tooltip_text: Option<String>,
    /// Soft visibility flag; inactive areas are filtered on read.
    pub is_active: bool,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Partial update for an area map; None fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AreaMapUpdate {
    /// New area kind.
    pub area_type: Option<String>,
    /// New polygon vertices (JSON array of {x, y}).
    pub coordinates: Option<String>,
    /// New target URL.
    pub link_url: Option<String>,
    /// New target page number.
    pub link_page_number: Option<i64>,
    /// New advertisement ID.
    pub ad_id: Option<String>,
    /// New tooltip text.
    pub tooltip_text: Option<String>,
    /// New active flag.
    pub is_active: Option<bool>,
}

/// Per-kind area counts for one edition.
#[derive(Debug, Clone, Serialize)]
pub struct AreaMapStats {
    /// Total active areas.
    pub total_areas: i64,
    /// Areas of kind "link".
    pub link_areas: i64,
    /// Areas of kind "ad".
    pub ad_areas: i64,
    /// Areas of kind "page_nav".
    pub nav_areas: i64,
}

/// A derived sub-image of a page, addressable by an opaque token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CroppedShare {
    /// Share ID.
    pub id: String,
    /// Owning edition ID.
    pub edition_id: String,
    /// Source page ID.
    pub page_id: String,
    /// Crop rectangle X offset (page-pixel space).
    pub crop_x: i64,
    /// Crop rectangle Y offset.
    pub crop_y: i64,
    /// Crop rectangle width.
    pub crop_width: i64,
    /// Crop rectangle height.
    pub crop_height: i64,
    /// Web path of the cropped image.
    pub image_path: String,
    /// Opaque lookup token.
    pub share_token: String,
    /// Public share URL path.
    pub share_url: String,
    /// Expiry timestamp; the share is retrievable only before it.
    pub expires_at: i64,
    /// Creating user ID.
    pub created_by: String,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Partial update for edition metadata; None fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditionUpdate {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New status.
    pub status: Option<EditionStatus>,
    /// New public flag.
    pub is_public: Option<bool>,
    /// New free-access flag.
    pub is_free: Option<bool>,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}

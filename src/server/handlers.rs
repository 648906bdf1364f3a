//! HTTP request handlers.

use crate::access::{AccessDecision, AccessType};
use crate::areamap;
use crate::auth;
use crate::config::EditionStatus;
use crate::db::{
    self, AreaMap, AreaMapStats, AreaMapUpdate, CroppedShare, Edition, EditionUpdate, Page,
};
use crate::error::{AppError, Result};
use crate::ingest::{self, UploadSource, UploadedImage};
use crate::server::AppState;
use crate::storage::{ArtifactStore, Bucket};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, Response, StatusCode, header},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio_util::io::ReaderStream;

/// Crop shares stay retrievable this many days after creation.
const SHARE_EXPIRY_DAYS: i64 = 30;

/// Maximum number of images in one upload batch.
const MAX_BATCH_IMAGES: usize = 100;

/// Settings readable without authentication.
const PUBLIC_SETTING_KEYS: &[&str] = &[
    "subscription_mode_enabled",
    "site_name",
    "site_title",
    "logo_url",
    "maintenance_mode",
];

// ============================================================================
// EDITION API
// ============================================================================

/// Edition list entry with derived page info.
#[derive(Serialize)]
pub struct EditionSummary {
    /// Edition fields.
    #[serde(flatten)]
    pub edition: Edition,
    /// Count of ingested pages.
    pub page_count: i64,
    /// Image path of page 1, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_page_image: Option<String>,
}

/// List all editions, newest first.
pub async fn list_editions(State(state): State<AppState>) -> Result<Json<Vec<EditionSummary>>> {
    let editions = state.db.list_editions()?;

    let mut summaries = Vec::with_capacity(editions.len());
    for edition in editions {
        let pages = state.db.get_pages(&edition.id)?;
        summaries.push(EditionSummary {
            page_count: pages.len() as i64,
            first_page_image: pages.first().map(|p| p.image_path.clone()),
            edition,
        });
    }

    Ok(Json(summaries))
}

/// Upload response.
#[derive(Serialize)]
pub struct CreateEditionResponse {
    message: String,
    edition_id: String,
    total_pages: i64,
}

/// Create an edition from a multipart upload (PDF or image batch).
///
/// Page files are produced first; the edition, its pages and category links
/// commit in one transaction afterwards, so readers never observe a
/// zero-page edition. On any failure every written file is removed.
pub async fn create_edition(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<CreateEditionResponse>)> {
    let user = require_publisher(&state, &headers).await?;

    let mut title: Option<String> = None;
    let mut description: Option<String> = None;
    let mut edition_date: Option<String> = None;
    let mut status = EditionStatus::Draft;
    let mut is_public = true;
    let mut is_free = false;
    let mut categories: Vec<String> = Vec::new();
    let mut pdf: Option<(String, Vec<u8>)> = None;
    let mut images: Vec<UploadedImage> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "title" => title = Some(read_text_field(field).await?),
            "description" => description = Some(read_text_field(field).await?),
            "edition_date" => edition_date = Some(read_text_field(field).await?),
            "status" => {
                let value = read_text_field(field).await?;
                status = EditionStatus::from_str(&value)
                    .ok_or_else(|| AppError::Validation(format!("Unknown status: {}", value)))?;
            }
            "is_public" => is_public = parse_bool_field(&read_text_field(field).await?),
            "is_free" => is_free = parse_bool_field(&read_text_field(field).await?),
            "categories" => {
                let value = read_text_field(field).await?;
                if !value.is_empty() {
                    categories.push(value);
                }
            }
            "pdf" => {
                let filename = field
                    .file_name()
                    .unwrap_or("document.pdf")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read upload: {}", e)))?;
                // A single PDF per upload; later fields are ignored
                if pdf.is_none() {
                    pdf = Some((filename, data.to_vec()));
                }
            }
            "images" => {
                let filename = field.file_name().unwrap_or("image").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read upload: {}", e)))?;
                images.push(UploadedImage {
                    filename,
                    data: data.to_vec(),
                });
            }
            _ => {}
        }
    }

    let title = title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Title is required".to_string()))?;

    if images.len() > MAX_BATCH_IMAGES {
        return Err(AppError::Validation(format!(
            "At most {} images per upload",
            MAX_BATCH_IMAGES
        )));
    }

    if pdf.is_none() && images.is_empty() {
        return Err(AppError::Validation(
            "PDF or image files are required".to_string(),
        ));
    }

    // Fresh prefix for this upload's artifact names
    let batch_id = uuid::Uuid::new_v4().to_string();

    // Persist the PDF source document before rasterization
    let mut source_web_path: Option<String> = None;
    let mut source_fs_path: Option<PathBuf> = None;
    if let Some((filename, data)) = &pdf {
        let stored_name = format!("{}-{}", batch_id, ArtifactStore::sanitize_filename(filename));
        let fs_path = state.store.fs_path(Bucket::Papers, &stored_name);
        tokio::fs::write(&fs_path, data).await?;
        source_web_path = Some(state.store.web_path(Bucket::Papers, &stored_name));
        source_fs_path = Some(fs_path);
    }

    let source = UploadSource::resolve(source_fs_path.clone(), images)?;

    let store = state.store.clone();
    let workers = state.config.ingest.workers;
    let ingest_batch = batch_id.clone();
    let ingest_result = tokio::task::spawn_blocking(move || {
        ingest::run(&source, &store, &ingest_batch, workers)
    })
    .await
    .map_err(|e| AppError::Internal(format!("Ingestion task failed: {}", e)));

    let ingested = match ingest_result {
        Ok(Ok(result)) => result,
        Ok(Err(e)) | Err(e) => {
            if let Some(path) = &source_fs_path {
                let _ = state.store.remove_if_exists(path);
            }
            return Err(e);
        }
    };

    let edition = Edition {
        id: uuid::Uuid::new_v4().to_string(),
        title,
        description,
        edition_date,
        source_path: source_web_path,
        thumbnail_path: ingested.thumbnail_path.clone(),
        total_pages: ingested.pages.len() as i64,
        status,
        is_public,
        is_free,
        created_by: user.id,
        created_at: db::now_timestamp(),
        publish_date: None,
    };

    if let Err(e) = state
        .db
        .create_edition_with_pages(&edition, &ingested.pages, &categories)
    {
        for file in &ingested.written_files {
            let _ = state.store.remove_if_exists(file);
        }
        if let Some(path) = &source_fs_path {
            let _ = state.store.remove_if_exists(path);
        }
        return Err(e);
    }

    tracing::info!(
        edition = %edition.id,
        pages = edition.total_pages,
        "Edition created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateEditionResponse {
            message: "E-paper created successfully".to_string(),
            edition_id: edition.id,
            total_pages: edition.total_pages,
        }),
    ))
}

/// Access block reported alongside a (possibly trimmed) page list.
#[derive(Serialize)]
pub struct AccessInfo {
    can_access: bool,
    access_type: AccessType,
    pages_allowed: i64,
    pages_total: i64,
    is_subscriber: bool,
    is_free_plan: bool,
}

/// One visible page with its active area maps.
#[derive(Serialize)]
pub struct PageWithAreas {
    /// Page fields.
    #[serde(flatten)]
    pub page: Page,
    /// Active area maps on this page.
    pub area_maps: Vec<AreaMap>,
}

/// Edition detail payload with access-filtered pages.
#[derive(Serialize)]
pub struct EditionResponse {
    /// Edition fields.
    #[serde(flatten)]
    pub edition: Edition,
    /// Linked category ids.
    pub categories: Vec<String>,
    /// Visible pages in page-number order.
    pub pages: Vec<PageWithAreas>,
    /// Access classification for this request.
    pub access_info: AccessInfo,
    /// Present and true when pages were withheld.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages_limited: Option<bool>,
    /// Reader-facing explanation when pages were withheld.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Get an edition with its access-filtered page list. Denial is not an
/// error: restricted callers get a trimmed payload plus `access_info`,
/// never a 403. Hidden pages (and their area maps) are absent entirely.
pub async fn get_edition(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<EditionResponse>> {
    let caller = get_optional_user(&state, &headers);
    let caller_id = caller.as_ref().map(|u| u.id.as_str());

    let edition = state
        .db
        .get_edition(&id)?
        .ok_or_else(|| AppError::NotFound(format!("E-paper not found: {}", id)))?;

    let pages = state.db.get_pages(&id)?;
    let pages_total = pages.len() as i64;

    let decision: AccessDecision = state.evaluate_access(caller_id)?;
    let visible = decision.allowance.apply(pages);

    let mut page_payloads = Vec::with_capacity(visible.len());
    for page in visible {
        let area_maps = state.db.get_page_area_maps(&page.id)?;
        page_payloads.push(PageWithAreas { page, area_maps });
    }

    let (pages_limited, message) = if decision.can_access {
        (None, None)
    } else {
        let message = match decision.access_type {
            AccessType::Unauthenticated => "Please login to access this e-paper",
            _ => "Please subscribe to access all pages",
        };
        (Some(true), Some(message.to_string()))
    };

    let categories = state.db.get_edition_categories(&id)?;

    Ok(Json(EditionResponse {
        edition,
        categories,
        pages: page_payloads,
        access_info: AccessInfo {
            can_access: decision.can_access,
            access_type: decision.access_type,
            pages_allowed: decision.allowance.as_i64(),
            pages_total,
            is_subscriber: decision.is_subscriber,
            is_free_plan: decision.is_free_plan,
        },
        pages_limited,
        message,
    }))
}

/// Plain-message response.
#[derive(Serialize)]
pub struct MessageResponse {
    message: String,
}

/// Update edition metadata (partial, last-write-wins).
pub async fn update_edition(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(update): Json<EditionUpdate>,
) -> Result<Json<MessageResponse>> {
    require_publisher(&state, &headers).await?;

    if !state.db.update_edition(&id, &update)? {
        return Err(AppError::NotFound(format!("E-paper not found: {}", id)));
    }

    Ok(Json(MessageResponse {
        message: "E-paper updated successfully".to_string(),
    }))
}

/// Delete an edition, its rows and its backing files.
pub async fn delete_edition(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    require_publisher(&state, &headers).await?;

    // Collect file paths before the rows cascade away
    let paths = state.db.get_edition_file_paths(&id)?;

    if !state.db.delete_edition(&id)? {
        return Err(AppError::NotFound(format!("E-paper not found: {}", id)));
    }

    for web_path in &paths {
        state.store.remove_web_path(web_path);
    }

    tracing::info!(edition = %id, files = paths.len(), "Edition deleted");

    Ok(Json(MessageResponse {
        message: "E-paper deleted successfully".to_string(),
    }))
}

/// Publish an edition.
pub async fn publish_edition(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    require_publisher(&state, &headers).await?;

    if !state.db.publish_edition(&id)? {
        return Err(AppError::NotFound(format!("E-paper not found: {}", id)));
    }

    Ok(Json(MessageResponse {
        message: "E-paper published successfully".to_string(),
    }))
}

// ============================================================================
// CROP AND SHARE
// ============================================================================

/// Crop rectangle in page-pixel coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CropRect {
    /// X offset.
    pub x: u32,
    /// Y offset.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

/// Crop-and-share request.
#[derive(Deserialize)]
pub struct CropShareRequest {
    e_paper_id: String,
    page_id: String,
    crop_coordinates: CropRect,
}

/// Crop-and-share response.
#[derive(Serialize)]
pub struct CropShareResponse {
    message: String,
    share_token: String,
    share_url: String,
    cropped_image: String,
}

/// Carve a rectangle out of a page and register it under a fresh
/// time-limited token.
pub async fn crop_and_share(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CropShareRequest>,
) -> Result<Json<CropShareResponse>> {
    let user = require_publisher(&state, &headers).await?;

    let page = state
        .db
        .get_page_in_edition(&req.page_id, &req.e_paper_id)?
        .ok_or_else(|| AppError::NotFound("Page not found".to_string()))?;

    let page_file = state.store.resolve_web_path(&page.image_path)?;

    let rect = req.crop_coordinates;
    let cropped = tokio::task::spawn_blocking(move || {
        ingest::crop_page_image(&page_file, rect.x, rect.y, rect.width, rect.height)
    })
    .await
    .map_err(|e| AppError::Internal(format!("Crop task failed: {}", e)))??;

    let share_token = auth::generate_token();
    let crop_name = format!("crop_{}.jpg", share_token);
    let crop_file = state.store.fs_path(Bucket::Crops, &crop_name);
    tokio::fs::write(&crop_file, &cropped).await?;

    let now = db::now_timestamp();
    let share = CroppedShare {
        id: uuid::Uuid::new_v4().to_string(),
        edition_id: req.e_paper_id,
        page_id: req.page_id,
        crop_x: rect.x as i64,
        crop_y: rect.y as i64,
        crop_width: rect.width as i64,
        crop_height: rect.height as i64,
        image_path: state.store.web_path(Bucket::Crops, &crop_name),
        share_token: share_token.clone(),
        share_url: format!("/share/{}", share_token),
        expires_at: now + SHARE_EXPIRY_DAYS * 24 * 60 * 60,
        created_by: user.id,
        created_at: now,
    };

    if let Err(e) = state.db.create_share(&share) {
        let _ = state.store.remove_if_exists(&crop_file);
        return Err(e);
    }

    Ok(Json(CropShareResponse {
        message: "Image cropped and shared successfully".to_string(),
        share_token: share.share_token,
        share_url: share.share_url,
        cropped_image: share.image_path,
    }))
}

/// Look up a shared crop by token. Expired and unknown tokens both come
/// back as the same not-found.
pub async fn get_shared_crop(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<CroppedShare>> {
    let share = state
        .db
        .get_share_by_token(&token, db::now_timestamp())?
        .ok_or_else(|| AppError::NotFound("Share not found or expired".to_string()))?;

    Ok(Json(share))
}

// ============================================================================
// AREA MAP API
// ============================================================================

/// Area-map creation request.
#[derive(Deserialize)]
pub struct AreaMapRequest {
    e_paper_id: String,
    page_id: String,
    area_type: String,
    coordinates: serde_json::Value,
    link_url: Option<String>,
    link_page_number: Option<i64>,
    ad_id: Option<String>,
    tooltip_text: Option<String>,
}

/// Area-map creation response.
#[derive(Serialize)]
pub struct AreaMapCreated {
    message: String,
    area_map_id: String,
}

/// Validate a request and build the row to insert.
fn build_area_map(state: &AppState, req: &AreaMapRequest) -> Result<AreaMap> {
    let coordinates = serde_json::to_string(&req.coordinates)
        .map_err(|e| AppError::Validation(format!("Invalid coordinates: {}", e)))?;
    areamap::parse_coordinates(&coordinates)?;

    // Kind/field coherence is enforced here, not by the schema
    areamap::AreaAction::from_parts(
        &req.area_type,
        req.link_url.as_deref(),
        req.link_page_number,
        req.ad_id.as_deref(),
    )?;

    if state
        .db
        .get_page_in_edition(&req.page_id, &req.e_paper_id)?
        .is_none()
    {
        return Err(AppError::NotFound("Page not found".to_string()));
    }

    Ok(AreaMap {
        id: uuid::Uuid::new_v4().to_string(),
        edition_id: req.e_paper_id.clone(),
        page_id: req.page_id.clone(),
        area_type: req.area_type.clone(),
        coordinates,
        link_url: req.link_url.clone(),
        link_page_number: req.link_page_number,
        ad_id: req.ad_id.clone(),
        tooltip_text: req.tooltip_text.clone(),
        is_active: true,
        created_at: db::now_timestamp(),
    })
}

/// Create one area map.
pub async fn create_area_map(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AreaMapRequest>,
) -> Result<(StatusCode, Json<AreaMapCreated>)> {
    get_authenticated_user(&state, &headers).await?;

    let area = build_area_map(&state, &req)?;
    state.db.create_area_map(&area)?;

    Ok((
        StatusCode::CREATED,
        Json(AreaMapCreated {
            message: "Area map created successfully".to_string(),
            area_map_id: area.id,
        }),
    ))
}

/// Batch creation request.
#[derive(Deserialize)]
pub struct AreaMapBatchRequest {
    areas: Vec<AreaMapRequest>,
}

/// Batch creation response.
#[derive(Serialize)]
pub struct AreaMapBatchCreated {
    message: String,
    area_map_ids: Vec<String>,
}

/// Create several area maps in one request. Items are inserted one by one,
/// not in a transaction: a failing item aborts the request but earlier
/// items stay persisted.
pub async fn batch_create_area_maps(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AreaMapBatchRequest>,
) -> Result<(StatusCode, Json<AreaMapBatchCreated>)> {
    get_authenticated_user(&state, &headers).await?;

    if req.areas.is_empty() {
        return Err(AppError::Validation("Areas array is required".to_string()));
    }

    let mut created_ids = Vec::with_capacity(req.areas.len());
    for area_req in &req.areas {
        let area = build_area_map(&state, area_req)?;
        state.db.create_area_map(&area)?;
        created_ids.push(area.id);
    }

    Ok((
        StatusCode::CREATED,
        Json(AreaMapBatchCreated {
            message: format!("{} area maps created successfully", created_ids.len()),
            area_map_ids: created_ids,
        }),
    ))
}

/// Update an area map in place (partial).
pub async fn update_area_map(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(update): Json<AreaMapUpdate>,
) -> Result<Json<MessageResponse>> {
    get_authenticated_user(&state, &headers).await?;

    if let Some(ref coordinates) = update.coordinates {
        areamap::parse_coordinates(coordinates)?;
    }

    if !state.db.update_area_map(&id, &update)? {
        return Err(AppError::NotFound(format!("Area map not found: {}", id)));
    }

    Ok(Json(MessageResponse {
        message: "Area map updated successfully".to_string(),
    }))
}

/// Delete an area map.
pub async fn delete_area_map(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    get_authenticated_user(&state, &headers).await?;

    if !state.db.delete_area_map(&id)? {
        return Err(AppError::NotFound(format!("Area map not found: {}", id)));
    }

    Ok(Json(MessageResponse {
        message: "Area map deleted successfully".to_string(),
    }))
}

/// Get active area maps for one page.
pub async fn get_page_area_maps(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(page_id): Path<String>,
) -> Result<Json<Vec<AreaMap>>> {
    get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.db.get_page_area_maps(&page_id)?))
}

/// Get active area maps for a whole edition.
pub async fn get_edition_area_maps(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(edition_id): Path<String>,
) -> Result<Json<Vec<AreaMap>>> {
    get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.db.get_edition_area_maps(&edition_id)?))
}

/// Get per-kind area counts for an edition.
pub async fn get_area_map_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(edition_id): Path<String>,
) -> Result<Json<AreaMapStats>> {
    get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.db.get_area_map_stats(&edition_id)?))
}

/// Hit-test request.
#[derive(Deserialize)]
pub struct TestPointRequest {
    x: f64,
    y: f64,
}

/// Return every active area of the page containing the point.
pub async fn test_point(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(page_id): Path<String>,
    Json(req): Json<TestPointRequest>,
) -> Result<Json<Vec<AreaMap>>> {
    get_authenticated_user(&state, &headers).await?;

    let areas = state.db.get_page_area_maps(&page_id)?;
    Ok(Json(areamap::hit_test(req.x, req.y, &areas)))
}

// ============================================================================
// AUTH API
// ============================================================================

/// Login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

/// Login response.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    token: String,
    user_id: String,
    username: String,
    role: String,
}

/// Register request.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    username: String,
    password: String,
}

/// Auth login.
pub async fn auth_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let (user, token) = state.auth.login(&req.username, &req.password)?;

    Ok(Json(LoginResponse {
        token,
        user_id: user.id,
        username: user.username,
        role: user.role,
    }))
}

/// Auth register.
pub async fn auth_register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<LoginResponse>> {
    let _user = state.auth.register(&req.username, &req.password)?;
    let (user, token) = state.auth.login(&req.username, &req.password)?;

    Ok(Json(LoginResponse {
        token,
        user_id: user.id,
        username: user.username,
        role: user.role,
    }))
}

/// Auth logout.
pub async fn auth_logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode> {
    if let Some(token) = extract_token(&headers) {
        state.auth.logout(&token)?;
    }
    Ok(StatusCode::OK)
}

/// Get current user info.
pub async fn auth_me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<db::User>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(user))
}

// ============================================================================
// SETTINGS API
// ============================================================================

/// Read a setting. Whitelisted keys are public; everything else needs an
/// admin caller.
pub async fn get_setting(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<db::Setting>> {
    if !PUBLIC_SETTING_KEYS.contains(&key.as_str()) {
        require_admin(&state, &headers).await?;
    }

    let setting = state
        .db
        .get_setting(&key)?
        .ok_or_else(|| AppError::NotFound(format!("Setting not found: {}", key)))?;

    Ok(Json(setting))
}

/// Setting update request.
#[derive(Deserialize)]
pub struct SettingUpdateRequest {
    value: String,
}

/// Write a setting (admin only).
pub async fn update_setting(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(req): Json<SettingUpdateRequest>,
) -> Result<Json<MessageResponse>> {
    require_admin(&state, &headers).await?;

    state.db.set_setting(&key, &req.value)?;

    Ok(Json(MessageResponse {
        message: "Setting updated successfully".to_string(),
    }))
}

// ============================================================================
// ARTIFACT SERVING
// ============================================================================

/// Stream a stored artifact (page image, thumbnail, crop, source document).
pub async fn serve_artifact(
    State(state): State<AppState>,
    Path((bucket, file)): Path<(String, String)>,
) -> Result<Response<Body>> {
    let bucket = Bucket::from_dir_name(&bucket)
        .ok_or_else(|| AppError::NotFound("Not found".to_string()))?;

    if file.contains('/') || file.contains('\\') || file.contains("..") {
        return Err(AppError::Validation("Invalid artifact name".to_string()));
    }

    let path = state.store.fs_path(bucket, &file);
    let f = tokio::fs::File::open(&path)
        .await
        .map_err(|_| AppError::NotFound("Not found".to_string()))?;

    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    };

    let stream = ReaderStream::new(f);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "public, max-age=86400")
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}

// ============================================================================
// HELPERS
// ============================================================================

/// Read a multipart text field.
async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed field: {}", e)))
}

/// Parse a form boolean ("true"/"1" are true).
fn parse_bool_field(value: &str) -> bool {
    value == "true" || value == "1"
}

/// Extract token from Authorization header.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Get authenticated user from token.
async fn get_authenticated_user(state: &AppState, headers: &HeaderMap) -> Result<db::User> {
    let token = extract_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    state
        .auth
        .validate_token(&token)?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".to_string()))
}

/// Resolve the caller when a token is present; anonymous otherwise. Invalid
/// tokens degrade to anonymous instead of failing the request.
fn get_optional_user(state: &AppState, headers: &HeaderMap) -> Option<db::User> {
    let token = extract_token(headers)?;
    state.auth.validate_token(&token).ok().flatten()
}

/// Require an admin or publisher caller.
async fn require_publisher(state: &AppState, headers: &HeaderMap) -> Result<db::User> {
    let user = get_authenticated_user(state, headers).await?;
    if !user.is_publisher() {
        return Err(AppError::Forbidden(
            "Access denied. Admin or Publisher only.".to_string(),
        ));
    }
    Ok(user)
}

/// Require an admin caller.
async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<db::User> {
    let user = get_authenticated_user(state, headers).await?;
    if !state.auth.is_admin(&user) {
        return Err(AppError::Forbidden("Access denied. Admin only.".to_string()));
    }
    Ok(user)
}

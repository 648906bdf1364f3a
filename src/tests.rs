use crate::access::{AccessType, PageAllowance};
use crate::auth::AuthService;
use crate::config::{Config, EditionStatus};
use crate::db::{
    AreaMap, AreaMapUpdate, CroppedShare, Database, Edition, EditionUpdate, NewPage, Page,
    Subscription, User, now_timestamp,
};
use crate::ingest::{self, UploadSource, UploadedImage};
use crate::server::AppState;
use crate::storage::{ArtifactStore, Bucket};

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn create_user(db: &Database, id: &str, username: &str, role: &str) {
    let user = User {
        id: id.to_string(),
        username: username.to_string(),
        password_hash: "hash".to_string(),
        display_name: None,
        role: role.to_string(),
        created_at: now_timestamp(),
        last_login: None,
    };
    db.create_user(&user).unwrap();
}

fn make_edition(id: &str) -> Edition {
    Edition {
        id: id.to_string(),
        title: "Morning Edition".to_string(),
        description: None,
        edition_date: None,
        source_path: None,
        thumbnail_path: None,
        total_pages: 0,
        status: EditionStatus::Draft,
        is_public: true,
        is_free: false,
        created_by: "user-1".to_string(),
        created_at: now_timestamp(),
        publish_date: None,
    }
}

fn setup_edition(db: &Database, id: &str, page_count: usize) -> Vec<Page> {
    let pages: Vec<NewPage> = (1..=page_count)
        .map(|n| NewPage {
            page_number: n as i64,
            image_path: format!("/uploads/pages/{}-{}.jpg", id, n),
        })
        .collect();

    let mut edition = make_edition(id);
    edition.total_pages = page_count as i64;
    db.create_edition_with_pages(&edition, &pages, &[]).unwrap();
    db.get_pages(id).unwrap()
}

fn make_area(id: &str, edition_id: &str, page_id: &str, kind: &str) -> AreaMap {
    AreaMap {
        id: id.to_string(),
        edition_id: edition_id.to_string(),
        page_id: page_id.to_string(),
        area_type: kind.to_string(),
        coordinates: r#"[{"x":0,"y":0},{"x":10,"y":0},{"x":10,"y":10},{"x":0,"y":10}]"#
            .to_string(),
        link_url: if kind == "link" {
            Some("https://example.com".to_string())
        } else {
            None
        },
        link_page_number: if kind == "page_nav" { Some(2) } else { None },
        ad_id: if kind == "ad" {
            Some("ad-1".to_string())
        } else {
            None
        },
        tooltip_text: None,
        is_active: true,
        created_at: now_timestamp(),
    }
}

fn test_state(db: Database) -> AppState {
    let auth = AuthService::new(db.clone(), 30, true);
    let store = ArtifactStore::new(std::env::temp_dir().join("epaper-rs-test-unused"));
    AppState::new(Config::default(), db, auth, store)
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([90, 120, 30]),
    ));
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

// ========== DATABASE BASICS ==========

#[test]
fn db_create_and_get_user() {
    let db = test_db();
    create_user(&db, "user-1", "alice", "publisher");

    let found = db.get_user_by_username("alice").unwrap().unwrap();
    assert_eq!(found.id, "user-1");
    assert!(found.is_publisher());

    let found_by_id = db.get_user_by_id("user-1").unwrap().unwrap();
    assert_eq!(found_by_id.username, "alice");
}

#[test]
fn db_publisher_check_by_role() {
    let db = test_db();
    create_user(&db, "user-1", "admin", "admin");
    create_user(&db, "user-2", "pub", "publisher");
    create_user(&db, "user-3", "reader", "user");

    assert!(db.get_user_by_id("user-1").unwrap().unwrap().is_publisher());
    assert!(db.get_user_by_id("user-2").unwrap().unwrap().is_publisher());
    assert!(!db.get_user_by_id("user-3").unwrap().unwrap().is_publisher());
}

// ========== SETTINGS ==========

#[test]
fn settings_missing_bool_reads_false() {
    let db = test_db();
    assert!(!db.get_setting_bool("subscription_mode_enabled").unwrap());
}

#[test]
fn settings_set_and_read_back() {
    let db = test_db();
    db.set_setting("subscription_mode_enabled", "true").unwrap();
    assert!(db.get_setting_bool("subscription_mode_enabled").unwrap());

    db.set_setting("subscription_mode_enabled", "false").unwrap();
    assert!(!db.get_setting_bool("subscription_mode_enabled").unwrap());

    let setting = db.get_setting("subscription_mode_enabled").unwrap().unwrap();
    assert_eq!(setting.value, "false");
}

// ========== SUBSCRIPTIONS ==========

#[test]
fn subscription_latest_row_wins() {
    let db = test_db();
    create_user(&db, "user-1", "alice", "user");

    let old = Subscription {
        user_id: "user-1".to_string(),
        status: "canceled".to_string(),
        current_period_end: None,
        plan_is_free: false,
        created_at: 100,
    };
    let newer = Subscription {
        user_id: "user-1".to_string(),
        status: "active".to_string(),
        current_period_end: None,
        plan_is_free: true,
        created_at: 200,
    };

    db.save_subscription(&old).unwrap();
    db.save_subscription(&newer).unwrap();

    let latest = db.get_latest_subscription("user-1").unwrap().unwrap();
    assert_eq!(latest.status, "active");
    assert!(latest.plan_is_free);

    assert!(db.get_latest_subscription("user-2").unwrap().is_none());
}

#[test]
fn subscription_active_requires_status_and_period() {
    let sub = |status: &str, end: Option<i64>| Subscription {
        user_id: "user-1".to_string(),
        status: status.to_string(),
        current_period_end: end,
        plan_is_free: false,
        created_at: 0,
    };

    assert!(sub("active", None).is_active(1000));
    assert!(sub("trialing", Some(2000)).is_active(1000));
    assert!(!sub("active", Some(500)).is_active(1000));
    assert!(!sub("canceled", Some(2000)).is_active(1000));
    assert!(!sub("past_due", None).is_active(1000));
}

// ========== EDITIONS AND PAGES ==========

#[test]
fn edition_pages_are_dense_and_ordered() {
    let db = test_db();
    let pages = setup_edition(&db, "ed-1", 5);

    assert_eq!(pages.len(), 5);
    for (i, page) in pages.iter().enumerate() {
        assert_eq!(page.page_number, i as i64 + 1);
        assert_eq!(page.edition_id, "ed-1");
    }

    let edition = db.get_edition("ed-1").unwrap().unwrap();
    assert_eq!(edition.total_pages, 5);
}

#[test]
fn edition_update_is_partial() {
    let db = test_db();
    setup_edition(&db, "ed-1", 1);

    let update = EditionUpdate {
        title: Some("Evening Edition".to_string()),
        is_free: Some(true),
        ..Default::default()
    };
    assert!(db.update_edition("ed-1", &update).unwrap());

    let edition = db.get_edition("ed-1").unwrap().unwrap();
    assert_eq!(edition.title, "Evening Edition");
    assert!(edition.is_free);
    assert!(edition.is_public); // untouched
    assert_eq!(edition.status, EditionStatus::Draft);
}

#[test]
fn edition_update_without_fields_is_error() {
    let db = test_db();
    setup_edition(&db, "ed-1", 1);

    assert!(db.update_edition("ed-1", &EditionUpdate::default()).is_err());
}

#[test]
fn edition_publish_stamps_date() {
    let db = test_db();
    setup_edition(&db, "ed-1", 1);

    assert!(db.publish_edition("ed-1").unwrap());

    let edition = db.get_edition("ed-1").unwrap().unwrap();
    assert_eq!(edition.status, EditionStatus::Published);
    assert!(edition.publish_date.is_some());

    assert!(!db.publish_edition("ed-missing").unwrap());
}

#[test]
fn edition_list_is_newest_first() {
    let db = test_db();

    let mut first = make_edition("ed-1");
    first.created_at = 100;
    db.create_edition_with_pages(&first, &[], &[]).unwrap();

    let mut second = make_edition("ed-2");
    second.created_at = 200;
    db.create_edition_with_pages(&second, &[], &[]).unwrap();

    let editions = db.list_editions().unwrap();
    assert_eq!(editions[0].id, "ed-2");
    assert_eq!(editions[1].id, "ed-1");
}

#[test]
fn edition_categories_round_trip() {
    let db = test_db();
    let edition = make_edition("ed-1");
    db.create_edition_with_pages(&edition, &[], &["cat-2".to_string(), "cat-1".to_string()])
        .unwrap();

    let categories = db.get_edition_categories("ed-1").unwrap();
    assert_eq!(categories, vec!["cat-1".to_string(), "cat-2".to_string()]);
}

// ========== ACCESS FILTERING ==========

#[test]
fn page_truncation_is_exact() {
    let db = test_db();
    let pages = setup_edition(&db, "ed-1", 10);
    let pages_total = pages.len() as i64;

    let visible = PageAllowance::Limited(3).apply(pages);
    assert_eq!(visible.len(), 3);
    assert_eq!(
        visible.iter().map(|p| p.page_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(pages_total, 10);
}

#[test]
fn state_access_open_when_mode_disabled() {
    let db = test_db();
    setup_edition(&db, "ed-1", 4);
    let state = test_state(db);

    // No flag set: mode reads false, everyone is open
    for caller in [None, Some("anyone")] {
        let decision = state.evaluate_access(caller).unwrap();
        assert_eq!(decision.access_type, AccessType::Open);
        let visible = decision
            .allowance
            .apply(state.db.get_pages("ed-1").unwrap());
        assert_eq!(visible.len(), 4);
    }
}

#[test]
fn state_access_follows_subscription_state() {
    let db = test_db();
    create_user(&db, "user-1", "reader", "user");
    create_user(&db, "user-2", "subscriber", "user");
    db.set_setting("subscription_mode_enabled", "true").unwrap();
    db.save_subscription(&Subscription {
        user_id: "user-2".to_string(),
        status: "active".to_string(),
        current_period_end: Some(now_timestamp() + 3600),
        plan_is_free: false,
        created_at: now_timestamp(),
    })
    .unwrap();

    let state = test_state(db);

    let anonymous = state.evaluate_access(None).unwrap();
    assert_eq!(anonymous.access_type, AccessType::Unauthenticated);
    assert_eq!(anonymous.allowance, PageAllowance::Limited(0));

    let reader = state.evaluate_access(Some("user-1")).unwrap();
    assert_eq!(reader.access_type, AccessType::NoSubscription);
    assert_eq!(reader.allowance, PageAllowance::Limited(3));

    let subscriber = state.evaluate_access(Some("user-2")).unwrap();
    assert_eq!(subscriber.access_type, AccessType::Premium);
    assert_eq!(subscriber.allowance, PageAllowance::Unlimited);
}

#[test]
fn allowance_beyond_total_returns_all_pages() {
    let db = test_db();
    let pages = setup_edition(&db, "ed-1", 2);

    let visible = PageAllowance::Limited(3).apply(pages);
    assert_eq!(visible.len(), 2);
}

// ========== AREA MAPS ==========

#[test]
fn area_map_create_and_filter_inactive() {
    let db = test_db();
    let pages = setup_edition(&db, "ed-1", 1);
    let page_id = pages[0].id.clone();

    db.create_area_map(&make_area("area-1", "ed-1", &page_id, "link"))
        .unwrap();

    let mut hidden = make_area("area-2", "ed-1", &page_id, "ad");
    hidden.is_active = false;
    db.create_area_map(&hidden).unwrap();

    let areas = db.get_page_area_maps(&page_id).unwrap();
    assert_eq!(areas.len(), 1);
    assert_eq!(areas[0].id, "area-1");
}

#[test]
fn area_map_update_and_delete() {
    let db = test_db();
    let pages = setup_edition(&db, "ed-1", 1);
    let page_id = pages[0].id.clone();

    db.create_area_map(&make_area("area-1", "ed-1", &page_id, "link"))
        .unwrap();

    let update = AreaMapUpdate {
        tooltip_text: Some("Front page story".to_string()),
        is_active: Some(false),
        ..Default::default()
    };
    assert!(db.update_area_map("area-1", &update).unwrap());

    let area = db.get_area_map("area-1").unwrap().unwrap();
    assert_eq!(area.tooltip_text, Some("Front page story".to_string()));
    assert!(!area.is_active);

    assert!(db.delete_area_map("area-1").unwrap());
    assert!(db.get_area_map("area-1").unwrap().is_none());
    assert!(!db.delete_area_map("area-1").unwrap());
}

#[test]
fn area_map_stats_count_by_kind() {
    let db = test_db();
    let pages = setup_edition(&db, "ed-1", 2);

    db.create_area_map(&make_area("a-1", "ed-1", &pages[0].id, "link"))
        .unwrap();
    db.create_area_map(&make_area("a-2", "ed-1", &pages[0].id, "ad"))
        .unwrap();
    db.create_area_map(&make_area("a-3", "ed-1", &pages[1].id, "page_nav"))
        .unwrap();

    let stats = db.get_area_map_stats("ed-1").unwrap();
    assert_eq!(stats.total_areas, 3);
    assert_eq!(stats.link_areas, 1);
    assert_eq!(stats.ad_areas, 1);
    assert_eq!(stats.nav_areas, 1);
}

#[test]
fn area_map_edition_listing_follows_page_order() {
    let db = test_db();
    let pages = setup_edition(&db, "ed-1", 2);

    // Insert page-2 area first; the edition listing still orders by page
    db.create_area_map(&make_area("a-2", "ed-1", &pages[1].id, "ad"))
        .unwrap();
    db.create_area_map(&make_area("a-1", "ed-1", &pages[0].id, "link"))
        .unwrap();

    let areas = db.get_edition_area_maps("ed-1").unwrap();
    assert_eq!(areas.len(), 2);
    assert_eq!(areas[0].id, "a-1");
    assert_eq!(areas[1].id, "a-2");
}

// ========== CROP SHARES ==========

fn make_share(db: &Database, token: &str, expires_at: i64) {
    let pages = db.get_pages("ed-1").unwrap();
    let share = CroppedShare {
        id: format!("share-{}", token),
        edition_id: "ed-1".to_string(),
        page_id: pages[0].id.clone(),
        crop_x: 10,
        crop_y: 20,
        crop_width: 200,
        crop_height: 100,
        image_path: format!("/uploads/crops/crop_{}.jpg", token),
        share_token: token.to_string(),
        share_url: format!("/share/{}", token),
        expires_at,
        created_by: "user-1".to_string(),
        created_at: now_timestamp(),
    };
    db.create_share(&share).unwrap();
}

#[test]
fn share_expiry_window() {
    let db = test_db();
    setup_edition(&db, "ed-1", 1);

    let created = now_timestamp();
    let expires = created + 30 * 24 * 60 * 60;
    make_share(&db, "tok-1", expires);

    let day = 24 * 60 * 60;

    // Retrievable a day before expiry, gone a day after
    assert!(db
        .get_share_by_token("tok-1", created + 29 * day)
        .unwrap()
        .is_some());
    assert!(db
        .get_share_by_token("tok-1", created + 31 * day)
        .unwrap()
        .is_none());
}

#[test]
fn share_unknown_and_expired_look_identical() {
    let db = test_db();
    setup_edition(&db, "ed-1", 1);

    let now = now_timestamp();
    make_share(&db, "tok-old", now - 10);

    let expired = db.get_share_by_token("tok-old", now).unwrap();
    let unknown = db.get_share_by_token("tok-never", now).unwrap();
    assert!(expired.is_none());
    assert!(unknown.is_none());
}

// ========== CASCADE DELETE ==========

#[test]
fn edition_cascade_removes_rows_and_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    store.ensure_dirs().unwrap();

    let db = test_db();
    let pages = setup_edition(&db, "ed-1", 5);

    db.create_area_map(&make_area("a-1", "ed-1", &pages[0].id, "link"))
        .unwrap();
    db.create_area_map(&make_area("a-2", "ed-1", &pages[1].id, "ad"))
        .unwrap();
    make_share(&db, "tok-1", now_timestamp() + 1000);

    // Materialize the files the rows point at
    for page in &pages {
        let path = store.resolve_web_path(&page.image_path).unwrap();
        std::fs::write(&path, b"jpeg").unwrap();
    }
    let crop_path = store
        .resolve_web_path("/uploads/crops/crop_tok-1.jpg")
        .unwrap();
    std::fs::write(&crop_path, b"jpeg").unwrap();

    let paths = db.get_edition_file_paths("ed-1").unwrap();
    assert_eq!(paths.len(), 6); // 5 pages + 1 crop

    assert!(db.delete_edition("ed-1").unwrap());
    for web_path in &paths {
        store.remove_web_path(web_path);
    }

    // Rows cascaded
    assert!(db.get_edition("ed-1").unwrap().is_none());
    assert!(db.get_pages("ed-1").unwrap().is_empty());
    assert!(db.get_area_map("a-1").unwrap().is_none());
    assert!(db.get_area_map("a-2").unwrap().is_none());
    assert!(db
        .get_share_by_token("tok-1", now_timestamp())
        .unwrap()
        .is_none());

    // Files removed
    for page in &pages {
        assert!(!store.resolve_web_path(&page.image_path).unwrap().exists());
    }
    assert!(!crop_path.exists());
}

// ========== INGESTION ==========

#[test]
fn ingest_numbering_is_dense_and_order_preserving() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    store.ensure_dirs().unwrap();

    let images: Vec<UploadedImage> = (0..3)
        .map(|i| UploadedImage {
            filename: format!("scan-{}.png", i),
            data: png_bytes(600 + i * 10, 800),
        })
        .collect();

    let source = UploadSource::resolve(None, images).unwrap();
    let result = ingest::run(&source, &store, "batch", 2).unwrap();

    assert_eq!(result.pages.len(), 3);
    for (i, page) in result.pages.iter().enumerate() {
        assert_eq!(page.page_number, i as i64 + 1);
        assert_eq!(
            page.image_path,
            format!("/uploads/pages/batch-{}.jpg", i + 1)
        );
        assert!(store.resolve_web_path(&page.image_path).unwrap().exists());
    }

    // Thumbnail from page 1, exactly 400x533
    let thumb_path = result.thumbnail_path.unwrap();
    assert_eq!(thumb_path, "/uploads/thumbnails/batch_thumb.jpg");
    let thumb = image::open(store.resolve_web_path(&thumb_path).unwrap()).unwrap();
    assert_eq!((thumb.width(), thumb.height()), (400, 533));
}

#[test]
fn ingest_partial_failure_renumbers_densely() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    store.ensure_dirs().unwrap();

    let mut images: Vec<UploadedImage> = (0..5)
        .map(|i| UploadedImage {
            filename: format!("scan-{}.png", i),
            data: png_bytes(500, 700),
        })
        .collect();
    // Image 3 is not an image at all
    images[2].data = b"not an image".to_vec();

    let source = UploadSource::resolve(None, images).unwrap();
    let result = ingest::run(&source, &store, "batch", 1).unwrap();

    assert_eq!(result.pages.len(), 4);
    let numbers: Vec<i64> = result.pages.iter().map(|p| p.page_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);

    // No orphaned file for the failed image: the pages bucket holds
    // exactly the four surviving outputs
    let page_files = std::fs::read_dir(dir.path().join("pages"))
        .unwrap()
        .count();
    assert_eq!(page_files, 4);
}

#[test]
fn ingest_output_pages_are_resized_within_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    store.ensure_dirs().unwrap();

    let images = vec![UploadedImage {
        filename: "big.png".to_string(),
        data: png_bytes(2400, 3200),
    }];

    let source = UploadSource::resolve(None, images).unwrap();
    let result = ingest::run(&source, &store, "batch", 1).unwrap();

    let page = image::open(
        store
            .resolve_web_path(&result.pages[0].image_path)
            .unwrap(),
    )
    .unwrap();
    assert!(page.width() <= 1200 && page.height() <= 1600);
    assert_eq!((page.width(), page.height()), (1200, 1600));
}

// ========== AUTH ==========

#[test]
fn auth_create_user_and_login() {
    let db = test_db();
    let auth = AuthService::new(db, 30, true);

    let user = auth
        .create_user("publisher1", "password123", "publisher")
        .unwrap();
    assert_eq!(user.role, "publisher");

    let (logged_in, token) = auth.login("publisher1", "password123").unwrap();
    assert_eq!(logged_in.username, "publisher1");
    assert!(!token.is_empty());
}

#[test]
fn auth_validate_token() {
    let db = test_db();
    let auth = AuthService::new(db, 30, true);

    auth.create_user("alice", "pass1234", "admin").unwrap();
    let (_, token) = auth.login("alice", "pass1234").unwrap();

    let user = auth.validate_token(&token).unwrap().unwrap();
    assert_eq!(user.username, "alice");

    assert!(auth.validate_token("invalid_token").unwrap().is_none());
}

#[test]
fn auth_logout_invalidates_session() {
    let db = test_db();
    let auth = AuthService::new(db, 30, true);

    auth.create_user("bob", "password", "user").unwrap();
    let (_, token) = auth.login("bob", "password").unwrap();

    auth.logout(&token).unwrap();
    assert!(auth.validate_token(&token).unwrap().is_none());
}

#[test]
fn auth_rejects_unknown_role() {
    let db = test_db();
    let auth = AuthService::new(db, 30, true);

    assert!(auth.create_user("user", "password", "editor").is_err());
    assert!(auth.create_user("user", "password", "publisher").is_ok());
}

#[test]
fn auth_registration_disabled() {
    let db = test_db();
    let auth = AuthService::new(db, 30, false);

    assert!(auth.register("newuser", "password").is_err());
}

#[test]
fn auth_invalid_password() {
    let db = test_db();
    let auth = AuthService::new(db, 30, true);

    auth.create_user("user", "correct", "user").unwrap();
    assert!(auth.login("user", "wrong").is_err());
}

// ========== CONFIG ==========

#[test]
fn config_parse_toml() {
    let toml = r#"
[server]
bind = "127.0.0.1:9090"
title = "City Herald"

[database]
path = "/tmp/test.db"

[auth]
registration = "disabled"
session_days = 7

[storage]
root = "/tmp/uploads"

[ingest]
workers = 4
"#;
    let config: Config = toml::from_str(toml).unwrap();
    assert_eq!(config.server.bind.port(), 9090);
    assert_eq!(config.server.title, "City Herald");
    assert!(!config.auth.registration_enabled());
    assert_eq!(config.auth.session_days, 7);
    assert_eq!(config.storage.root, std::path::PathBuf::from("/tmp/uploads"));
    assert_eq!(config.ingest.workers, 4);
}

#[test]
fn config_default_values() {
    let config = Config::default();
    assert_eq!(config.server.bind.port(), 8080);
    assert!(config.auth.registration_enabled());
    assert_eq!(config.ingest.workers, 1);
    assert_eq!(config.storage.root, std::path::PathBuf::from("data/uploads"));
}

#[test]
fn edition_status_round_trip() {
    for status in [
        EditionStatus::Draft,
        EditionStatus::Live,
        EditionStatus::Published,
        EditionStatus::Archived,
    ] {
        assert_eq!(EditionStatus::from_str(status.as_str()), Some(status));
    }
    assert_eq!(EditionStatus::from_str("retracted"), None);
}

#[test]
fn storage_buckets_round_trip() {
    for bucket in [
        Bucket::Papers,
        Bucket::Pages,
        Bucket::Thumbnails,
        Bucket::Crops,
    ] {
        assert_eq!(Bucket::from_dir_name(bucket.dir_name()), Some(bucket));
    }
    assert_eq!(Bucket::from_dir_name("covers"), None);
}

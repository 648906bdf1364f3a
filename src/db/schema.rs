use crate::db::*;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Cascading deletes require the pragma in SQLite
            PRAGMA foreign_keys = ON;

            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                display_name TEXT,
                role TEXT NOT NULL DEFAULT 'user',
                created_at INTEGER NOT NULL,
                last_login INTEGER
            );

            -- Sessions table
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Site settings (string values keyed by name)
            CREATE TABLE IF NOT EXISTS settings (
                setting_key TEXT PRIMARY KEY,
                setting_value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Subscription state, written by the billing integration
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                current_period_end INTEGER,
                plan_is_free INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Editions (e-papers)
            CREATE TABLE IF NOT EXISTS editions (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                edition_date TEXT,
                source_path TEXT,
                thumbnail_path TEXT,
                total_pages INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'draft',
                is_public INTEGER NOT NULL DEFAULT 1,
                is_free INTEGER NOT NULL DEFAULT 0,
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                publish_date INTEGER
            );

            -- Rasterized pages, one batch per edition
            CREATE TABLE IF NOT EXISTS pages (
                id TEXT PRIMARY KEY,
                edition_id TEXT NOT NULL,
                page_number INTEGER NOT NULL,
                image_path TEXT NOT NULL,
                UNIQUE (edition_id, page_number),
                FOREIGN KEY (edition_id) REFERENCES editions(id) ON DELETE CASCADE
            );

            -- Category linkage (category CRUD lives outside this core)
            CREATE TABLE IF NOT EXISTS edition_categories (
                edition_id TEXT NOT NULL,
                category_id TEXT NOT NULL,
                PRIMARY KEY (edition_id, category_id),
                FOREIGN KEY (edition_id) REFERENCES editions(id) ON DELETE CASCADE
            );

            -- Polygon hotspots on pages
            CREATE TABLE IF NOT EXISTS area_maps (
                id TEXT PRIMARY KEY,
                edition_id TEXT NOT NULL,
                page_id TEXT NOT NULL,
                area_type TEXT NOT NULL,
                coordinates TEXT NOT NULL,
                link_url TEXT,
                link_page_number INTEGER,
                ad_id TEXT,
                tooltip_text TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (edition_id) REFERENCES editions(id) ON DELETE CASCADE,
                FOREIGN KEY (page_id) REFERENCES pages(id) ON DELETE CASCADE
            );

            -- Token-addressed crop shares
            CREATE TABLE IF NOT EXISTS cropped_shares (
                id TEXT PRIMARY KEY,
                edition_id TEXT NOT NULL,
                page_id TEXT NOT NULL,
                crop_x INTEGER NOT NULL,
                crop_y INTEGER NOT NULL,
                crop_width INTEGER NOT NULL,
                crop_height INTEGER NOT NULL,
                image_path TEXT NOT NULL,
                share_token TEXT UNIQUE NOT NULL,
                share_url TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (edition_id) REFERENCES editions(id) ON DELETE CASCADE,
                FOREIGN KEY (page_id) REFERENCES pages(id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_pages_edition ON pages(edition_id);
            CREATE INDEX IF NOT EXISTS idx_areas_page ON area_maps(page_id);
            CREATE INDEX IF NOT EXISTS idx_areas_edition ON area_maps(edition_id);
            CREATE INDEX IF NOT EXISTS idx_shares_token ON cropped_shares(share_token);
            CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== USER OPERATIONS ==========

    /// Create a new user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, username, password_hash, display_name, role, created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id,
                user.username,
                user.password_hash,
                user.display_name,
                user.role,
                user.created_at,
                user.last_login,
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::Validation(format!("Username '{}' already exists", user.username))
            } else {
                AppError::Internal(format!("Failed to create user: {}", e))
            }
        })?;
        Ok(())
    }

    /// Get user by username.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, password_hash, display_name, role, created_at, last_login
             FROM users WHERE username = ?1",
            params![username],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// Get user by ID.
    pub fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, password_hash, display_name, role, created_at, last_login
             FROM users WHERE id = ?1",
            params![id],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, username, password_hash, display_name, role, created_at, last_login
                 FROM users ORDER BY username",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let users = stmt
            .query_map([], Self::row_to_user)
            .map_err(|e| AppError::Internal(format!("Failed to list users: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect users: {}", e)))?;

        Ok(users)
    }

    /// Helper to convert a row to User.
    fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            password_hash: row.get(2)?,
            display_name: row.get(3)?,
            role: row.get(4)?,
            created_at: row.get(5)?,
            last_login: row.get(6)?,
        })
    }

    /// Update user password.
    pub fn update_user_password(&self, username: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE username = ?2",
                params![password_hash, username],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update password: {}", e)))?;
        Ok(rows > 0)
    }

    /// Update user last login.
    pub fn update_user_last_login(&self, user_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![now_timestamp(), user_id],
        )
        .map_err(|e| AppError::Internal(format!("Failed to update last login: {}", e)))?;
        Ok(())
    }

    /// Delete user.
    pub fn delete_user(&self, username: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM users WHERE username = ?1", params![username])
            .map_err(|e| AppError::Internal(format!("Failed to delete user: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== SESSION OPERATIONS ==========

    /// Create session.
    pub fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![session.token, session.user_id, session.expires_at],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create session: {}", e)))?;
        Ok(())
    }

    /// Get session by token.
    pub fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT token, user_id, expires_at FROM sessions WHERE token = ?1",
            params![token],
            |row| {
                Ok(Session {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get session: {}", e)))
    }

    /// Delete session.
    pub fn delete_session(&self, token: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .map_err(|e| AppError::Internal(format!("Failed to delete session: {}", e)))?;
        Ok(())
    }

    /// Cleanup expired sessions.
    pub fn cleanup_expired_sessions(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at < ?1",
                params![now_timestamp()],
            )
            .map_err(|e| AppError::Internal(format!("Failed to cleanup sessions: {}", e)))?;
        Ok(rows)
    }

    // ========== SETTINGS OPERATIONS ==========

    /// Set a setting value (insert or replace).
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO settings (setting_key, setting_value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (setting_key) DO UPDATE SET
                setting_value = excluded.setting_value,
                updated_at = excluded.updated_at",
            params![key, value, now_timestamp()],
        )
        .map_err(|e| AppError::Internal(format!("Failed to set setting: {}", e)))?;
        Ok(())
    }

    /// Get a setting by key.
    pub fn get_setting(&self, key: &str) -> Result<Option<Setting>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT setting_key, setting_value, updated_at FROM settings WHERE setting_key = ?1",
            params![key],
            |row| {
                Ok(Setting {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get setting: {}", e)))
    }

    /// Get a boolean setting; missing keys read as false.
    pub fn get_setting_bool(&self, key: &str) -> Result<bool> {
        Ok(self
            .get_setting(key)?
            .map(|s| s.value == "true")
            .unwrap_or(false))
    }

    /// List all settings.
    pub fn list_settings(&self) -> Result<Vec<Setting>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT setting_key, setting_value, updated_at
                 FROM settings ORDER BY setting_key",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let settings = stmt
            .query_map([], |row| {
                Ok(Setting {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to list settings: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect settings: {}", e)))?;

        Ok(settings)
    }

    // ========== SUBSCRIPTION OPERATIONS ==========

    /// Record a subscription row (billing collaborator write path).
    pub fn save_subscription(&self, sub: &Subscription) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO subscriptions (user_id, status, current_period_end, plan_is_free, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                sub.user_id,
                sub.status,
                sub.current_period_end,
                sub.plan_is_free,
                sub.created_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save subscription: {}", e)))?;
        Ok(())
    }

    /// Get the most recent subscription row for a user, regardless of status.
    /// Activity is decided by [`Subscription::is_active`].
    pub fn get_latest_subscription(&self, user_id: &str) -> Result<Option<Subscription>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT user_id, status, current_period_end, plan_is_free, created_at
             FROM subscriptions WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT 1",
            params![user_id],
            |row| {
                Ok(Subscription {
                    user_id: row.get(0)?,
                    status: row.get(1)?,
                    current_period_end: row.get(2)?,
                    plan_is_free: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get subscription: {}", e)))
    }

    // ========== EDITION OPERATIONS ==========

    /// Insert an edition together with its pages and category links in one
    /// transaction. Nothing is visible to readers until the commit, so no
    /// zero-page edition ever leaks.
    pub fn create_edition_with_pages(
        &self,
        edition: &Edition,
        pages: &[NewPage],
        categories: &[String],
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to begin transaction: {}", e)))?;

        tx.execute(
            "INSERT INTO editions
             (id, title, description, edition_date, source_path, thumbnail_path,
              total_pages, status, is_public, is_free, created_by, created_at, publish_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                edition.id,
                edition.title,
                edition.description,
                edition.edition_date,
                edition.source_path,
                edition.thumbnail_path,
                edition.total_pages,
                edition.status.as_str(),
                edition.is_public,
                edition.is_free,
                edition.created_by,
                edition.created_at,
                edition.publish_date,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create edition: {}", e)))?;

        for page in pages {
            tx.execute(
                "INSERT INTO pages (id, edition_id, page_number, image_path)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    edition.id,
                    page.page_number,
                    page.image_path,
                ],
            )
            .map_err(|e| AppError::Internal(format!("Failed to create page: {}", e)))?;
        }

        for category_id in categories {
            tx.execute(
                "INSERT OR IGNORE INTO edition_categories (edition_id, category_id)
                 VALUES (?1, ?2)",
                params![edition.id, category_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to link category: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to commit edition: {}", e)))?;

        Ok(())
    }

    /// Get edition by ID.
    pub fn get_edition(&self, id: &str) -> Result<Option<Edition>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, title, description, edition_date, source_path, thumbnail_path,
                    total_pages, status, is_public, is_free, created_by, created_at, publish_date
             FROM editions WHERE id = ?1",
            params![id],
            Self::row_to_edition,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get edition: {}", e)))
    }

    /// List all editions, newest first.
    pub fn list_editions(&self) -> Result<Vec<Edition>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, title, description, edition_date, source_path, thumbnail_path,
                        total_pages, status, is_public, is_free, created_by, created_at, publish_date
                 FROM editions ORDER BY created_at DESC",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let editions = stmt
            .query_map([], Self::row_to_edition)
            .map_err(|e| AppError::Internal(format!("Failed to list editions: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect editions: {}", e)))?;

        Ok(editions)
    }

    /// Helper to convert a row to Edition.
    fn row_to_edition(row: &rusqlite::Row<'_>) -> rusqlite::Result<Edition> {
        let status: String = row.get(7)?;
        Ok(Edition {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            edition_date: row.get(3)?,
            source_path: row.get(4)?,
            thumbnail_path: row.get(5)?,
            total_pages: row.get(6)?,
            status: crate::config::EditionStatus::from_str(&status)
                .unwrap_or(crate::config::EditionStatus::Draft),
            is_public: row.get(8)?,
            is_free: row.get(9)?,
            created_by: row.get(10)?,
            created_at: row.get(11)?,
            publish_date: row.get(12)?,
        })
    }

    /// Apply a partial metadata update. Returns false when no row matched,
    /// errors when no field was given.
    pub fn update_edition(&self, id: &str, update: &EditionUpdate) -> Result<bool> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref title) = update.title {
            clauses.push("title = ?");
            values.push(Box::new(title.clone()));
        }
        if let Some(ref description) = update.description {
            clauses.push("description = ?");
            values.push(Box::new(description.clone()));
        }
        if let Some(status) = update.status {
            clauses.push("status = ?");
            values.push(Box::new(status.as_str().to_string()));
        }
        if let Some(is_public) = update.is_public {
            clauses.push("is_public = ?");
            values.push(Box::new(is_public));
        }
        if let Some(is_free) = update.is_free {
            clauses.push("is_free = ?");
            values.push(Box::new(is_free));
        }

        if clauses.is_empty() {
            return Err(AppError::Validation("No fields to update".to_string()));
        }

        values.push(Box::new(id.to_string()));

        let sql = format!("UPDATE editions SET {} WHERE id = ?", clauses.join(", "));

        let conn = self.conn.lock();
        let rows = conn
            .execute(&sql, rusqlite::params_from_iter(values.iter()))
            .map_err(|e| AppError::Internal(format!("Failed to update edition: {}", e)))?;
        Ok(rows > 0)
    }

    /// Mark an edition published and stamp the publish date.
    pub fn publish_edition(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE editions SET status = 'published', publish_date = ?1 WHERE id = ?2",
                params![now_timestamp(), id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to publish edition: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete an edition row; pages, area maps, shares and category links
    /// cascade. File cleanup is the caller's job (paths via
    /// [`Self::get_edition_file_paths`]).
    pub fn delete_edition(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM editions WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete edition: {}", e)))?;
        Ok(rows > 0)
    }

    /// Collect every stored web path backing an edition: source document,
    /// thumbnail, page images and crop-share images.
    pub fn get_edition_file_paths(&self, id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut paths: Vec<String> = Vec::new();

        let edition: Option<(Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT source_path, thumbnail_path FROM editions WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| AppError::Internal(format!("Failed to get edition paths: {}", e)))?;

        if let Some((source, thumbnail)) = edition {
            paths.extend(source);
            paths.extend(thumbnail);
        }

        let mut stmt = conn
            .prepare("SELECT image_path FROM pages WHERE edition_id = ?1")
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;
        let page_paths = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .map_err(|e| AppError::Internal(format!("Failed to get page paths: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect page paths: {}", e)))?;
        paths.extend(page_paths);

        let mut stmt = conn
            .prepare("SELECT image_path FROM cropped_shares WHERE edition_id = ?1")
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;
        let share_paths = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .map_err(|e| AppError::Internal(format!("Failed to get share paths: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect share paths: {}", e)))?;
        paths.extend(share_paths);

        Ok(paths)
    }

    /// Get category links for an edition.
    pub fn get_edition_categories(&self, id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT category_id FROM edition_categories
                 WHERE edition_id = ?1 ORDER BY category_id",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let categories = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .map_err(|e| AppError::Internal(format!("Failed to get categories: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect categories: {}", e)))?;

        Ok(categories)
    }

    // ========== PAGE OPERATIONS ==========

    /// Get all pages of an edition in page-number order.
    pub fn get_pages(&self, edition_id: &str) -> Result<Vec<Page>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, edition_id, page_number, image_path
                 FROM pages WHERE edition_id = ?1 ORDER BY page_number",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let pages = stmt
            .query_map(params![edition_id], Self::row_to_page)
            .map_err(|e| AppError::Internal(format!("Failed to get pages: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect pages: {}", e)))?;

        Ok(pages)
    }

    /// Get page by ID.
    pub fn get_page(&self, id: &str) -> Result<Option<Page>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, edition_id, page_number, image_path FROM pages WHERE id = ?1",
            params![id],
            Self::row_to_page,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get page: {}", e)))
    }

    /// Get a page only if it belongs to the given edition.
    pub fn get_page_in_edition(&self, page_id: &str, edition_id: &str) -> Result<Option<Page>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, edition_id, page_number, image_path
             FROM pages WHERE id = ?1 AND edition_id = ?2",
            params![page_id, edition_id],
            Self::row_to_page,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get page: {}", e)))
    }

    /// Helper to convert a row to Page.
    fn row_to_page(row: &rusqlite::Row<'_>) -> rusqlite::Result<Page> {
        Ok(Page {
            id: row.get(0)?,
            edition_id: row.get(1)?,
            page_number: row.get(2)?,
            image_path: row.get(3)?,
        })
    }

    // ========== AREA MAP OPERATIONS ==========

    /// Create an area map.
    pub fn create_area_map(&self, area: &AreaMap) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO area_maps
             (id, edition_id, page_id, area_type, coordinates, link_url,
              link_page_number, ad_id, tooltip_text, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                area.id,
                area.edition_id,
                area.page_id,
                area.area_type,
                area.coordinates,
                area.link_url,
                area.link_page_number,
                area.ad_id,
                area.tooltip_text,
                area.is_active,
                area.created_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create area map: {}", e)))?;
        Ok(())
    }

    /// Get area map by ID.
    pub fn get_area_map(&self, id: &str) -> Result<Option<AreaMap>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, edition_id, page_id, area_type, coordinates, link_url,
                    link_page_number, ad_id, tooltip_text, is_active, created_at
             FROM area_maps WHERE id = ?1",
            params![id],
            Self::row_to_area_map,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get area map: {}", e)))
    }

    /// Get active area maps for a page, oldest first.
    pub fn get_page_area_maps(&self, page_id: &str) -> Result<Vec<AreaMap>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, edition_id, page_id, area_type, coordinates, link_url,
                        link_page_number, ad_id, tooltip_text, is_active, created_at
                 FROM area_maps WHERE page_id = ?1 AND is_active = 1
                 ORDER BY created_at",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let areas = stmt
            .query_map(params![page_id], Self::row_to_area_map)
            .map_err(|e| AppError::Internal(format!("Failed to get area maps: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect area maps: {}", e)))?;

        Ok(areas)
    }

    /// Get active area maps for a whole edition, in page order.
    pub fn get_edition_area_maps(&self, edition_id: &str) -> Result<Vec<AreaMap>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT am.id, am.edition_id, am.page_id, am.area_type, am.coordinates,
                        am.link_url, am.link_page_number, am.ad_id, am.tooltip_text,
                        am.is_active, am.created_at
                 FROM area_maps am
                 JOIN pages p ON am.page_id = p.id
                 WHERE am.edition_id = ?1 AND am.is_active = 1
                 ORDER BY p.page_number, am.created_at",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let areas = stmt
            .query_map(params![edition_id], Self::row_to_area_map)
            .map_err(|e| AppError::Internal(format!("Failed to get area maps: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect area maps: {}", e)))?;

        Ok(areas)
    }

    /// Helper to convert a row to AreaMap.
    fn row_to_area_map(row: &rusqlite::Row<'_>) -> rusqlite::Result<AreaMap> {
        Ok(AreaMap {
            id: row.get(0)?,
            edition_id: row.get(1)?,
            page_id: row.get(2)?,
            area_type: row.get(3)?,
            coordinates: row.get(4)?,
            link_url: row.get(5)?,
            link_page_number: row.get(6)?,
            ad_id: row.get(7)?,
            tooltip_text: row.get(8)?,
            is_active: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    /// Apply a partial update to an area map.
    pub fn update_area_map(&self, id: &str, update: &AreaMapUpdate) -> Result<bool> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref area_type) = update.area_type {
            clauses.push("area_type = ?");
            values.push(Box::new(area_type.clone()));
        }
        if let Some(ref coordinates) = update.coordinates {
            clauses.push("coordinates = ?");
            values.push(Box::new(coordinates.clone()));
        }
        if let Some(ref link_url) = update.link_url {
            clauses.push("link_url = ?");
            values.push(Box::new(link_url.clone()));
        }
        if let Some(link_page_number) = update.link_page_number {
            clauses.push("link_page_number = ?");
            values.push(Box::new(link_page_number));
        }
        if let Some(ref ad_id) = update.ad_id {
            clauses.push("ad_id = ?");
            values.push(Box::new(ad_id.clone()));
        }
        if let Some(ref tooltip_text) = update.tooltip_text {
            clauses.push("tooltip_text = ?");
            values.push(Box::new(tooltip_text.clone()));
        }
        if let Some(is_active) = update.is_active {
            clauses.push("is_active = ?");
            values.push(Box::new(is_active));
        }

        if clauses.is_empty() {
            return Err(AppError::Validation("No fields to update".to_string()));
        }

        values.push(Box::new(id.to_string()));

        let sql = format!("UPDATE area_maps SET {} WHERE id = ?", clauses.join(", "));

        let conn = self.conn.lock();
        let rows = conn
            .execute(&sql, rusqlite::params_from_iter(values.iter()))
            .map_err(|e| AppError::Internal(format!("Failed to update area map: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete an area map.
    pub fn delete_area_map(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM area_maps WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete area map: {}", e)))?;
        Ok(rows > 0)
    }

    /// Count active areas by kind for an edition.
    pub fn get_area_map_stats(&self, edition_id: &str) -> Result<AreaMapStats> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*),
                    SUM(CASE WHEN area_type = 'link' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN area_type = 'ad' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN area_type = 'page_nav' THEN 1 ELSE 0 END)
             FROM area_maps WHERE edition_id = ?1 AND is_active = 1",
            params![edition_id],
            |row| {
                Ok(AreaMapStats {
                    total_areas: row.get(0)?,
                    link_areas: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    ad_areas: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    nav_areas: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                })
            },
        )
        .map_err(|e| AppError::Internal(format!("Failed to get area map stats: {}", e)))
    }

    // ========== CROP SHARE OPERATIONS ==========

    /// Create a crop share.
    pub fn create_share(&self, share: &CroppedShare) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO cropped_shares
             (id, edition_id, page_id, crop_x, crop_y, crop_width, crop_height,
              image_path, share_token, share_url, expires_at, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                share.id,
                share.edition_id,
                share.page_id,
                share.crop_x,
                share.crop_y,
                share.crop_width,
                share.crop_height,
                share.image_path,
                share.share_token,
                share.share_url,
                share.expires_at,
                share.created_by,
                share.created_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create share: {}", e)))?;
        Ok(())
    }

    /// Look up a share by token, visible only while unexpired. Expired and
    /// unknown tokens are indistinguishable.
    pub fn get_share_by_token(&self, token: &str, now: i64) -> Result<Option<CroppedShare>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, edition_id, page_id, crop_x, crop_y, crop_width, crop_height,
                    image_path, share_token, share_url, expires_at, created_by, created_at
             FROM cropped_shares WHERE share_token = ?1 AND expires_at > ?2",
            params![token, now],
            |row| {
                Ok(CroppedShare {
                    id: row.get(0)?,
                    edition_id: row.get(1)?,
                    page_id: row.get(2)?,
                    crop_x: row.get(3)?,
                    crop_y: row.get(4)?,
                    crop_width: row.get(5)?,
                    crop_height: row.get(6)?,
                    image_path: row.get(7)?,
                    share_token: row.get(8)?,
                    share_url: row.get(9)?,
                    expires_at: row.get(10)?,
                    created_by: row.get(11)?,
                    created_at: row.get(12)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get share: {}", e)))
    }
}

//! Durable store of learned element positions.
//!
//! Every confirmed (screenshot state, coordinate) pair is keyed by a blake3
//! hash of the full screenshot, so an identical screen state can be replayed
//! without any image matching at all.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::errors::AatError;
use crate::models::LearnedElement;

/// Side length of the context crop stored next to each learned element.
const CROP_SIZE: u32 = 100;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS learned_elements (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    scenario_id     TEXT NOT NULL,
    step_number     INTEGER NOT NULL,
    target_name     TEXT NOT NULL,
    screenshot_hash TEXT NOT NULL,
    correct_x       INTEGER NOT NULL,
    correct_y       INTEGER NOT NULL,
    cropped_image_path TEXT NOT NULL,
    confidence      REAL NOT NULL,
    use_count       INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_learned_target
    ON learned_elements (scenario_id, step_number, target_name);
CREATE INDEX IF NOT EXISTS idx_learned_hash
    ON learned_elements (screenshot_hash);
";

pub struct LearnedStore {
    conn: Mutex<Connection>,
}

impl LearnedStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, AatError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| AatError::Learning(format!("cannot open {}: {e}", path.display())))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| AatError::Learning(format!("cannot enable WAL: {e}")))?;
        Self::init(conn)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, AatError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AatError::Learning(format!("cannot open in-memory db: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, AatError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| AatError::Learning(format!("cannot create schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AatError> {
        self.conn
            .lock()
            .map_err(|_| AatError::Learning("store mutex poisoned".into()))
    }

    /// Insert the element when it carries no id, update that row when it
    /// does. Only `updated_at` is stamped here; `use_count` and
    /// `created_at` are taken from the element so exports re-import
    /// unchanged. Returns the element with its id populated.
    pub fn save(&self, element: &LearnedElement) -> Result<LearnedElement, AatError> {
        let conn = self.lock()?;
        let now = Utc::now();

        if let Some(id) = element.id {
            conn.execute(
                "UPDATE learned_elements
                 SET scenario_id = ?1, step_number = ?2, target_name = ?3,
                     screenshot_hash = ?4, correct_x = ?5, correct_y = ?6,
                     cropped_image_path = ?7, confidence = ?8, use_count = ?9,
                     updated_at = ?10
                 WHERE id = ?11",
                params![
                    element.scenario_id,
                    element.step_number,
                    element.target_name,
                    element.screenshot_hash,
                    element.correct_x,
                    element.correct_y,
                    element.cropped_image_path,
                    element.confidence,
                    element.use_count,
                    now.to_rfc3339(),
                    id
                ],
            )
            .map_err(|e| AatError::Learning(format!("update failed: {e}")))?;
            debug!("updated learned element id={id}");
            return Ok(LearnedElement {
                updated_at: now,
                ..element.clone()
            });
        }

        conn.execute(
            "INSERT INTO learned_elements
             (scenario_id, step_number, target_name, screenshot_hash,
              correct_x, correct_y, cropped_image_path, confidence,
              use_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                element.scenario_id,
                element.step_number,
                element.target_name,
                element.screenshot_hash,
                element.correct_x,
                element.correct_y,
                element.cropped_image_path,
                element.confidence,
                element.use_count,
                element.created_at.to_rfc3339(),
                now.to_rfc3339()
            ],
        )
        .map_err(|e| AatError::Learning(format!("insert failed: {e}")))?;
        let id = conn.last_insert_rowid();
        debug!("inserted learned element id={id}");
        Ok(LearnedElement {
            id: Some(id),
            updated_at: now,
            ..element.clone()
        })
    }

    /// Highest-confidence element recorded for this (scenario, step, target).
    pub fn find_by_target(
        &self,
        scenario_id: &str,
        step_number: u32,
        target_name: &str,
    ) -> Result<Option<LearnedElement>, AatError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM learned_elements
             WHERE scenario_id = ?1 AND step_number = ?2 AND target_name = ?3
             ORDER BY confidence DESC LIMIT 1",
            params![scenario_id, step_number, target_name],
            row_to_element,
        )
        .optional()
        .map_err(|e| AatError::Learning(format!("query failed: {e}")))
    }

    /// All elements recorded against an exact screenshot state.
    pub fn find_by_hash(&self, screenshot_hash: &str) -> Result<Vec<LearnedElement>, AatError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT * FROM learned_elements WHERE screenshot_hash = ?1
                 ORDER BY confidence DESC",
            )
            .map_err(|e| AatError::Learning(format!("query failed: {e}")))?;
        let rows = stmt
            .query_map(params![screenshot_hash], row_to_element)
            .map_err(|e| AatError::Learning(format!("query failed: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| AatError::Learning(format!("row decode failed: {e}")))
    }

    pub fn increment_use_count(&self, id: i64) -> Result<(), AatError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE learned_elements
             SET use_count = use_count + 1, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| AatError::Learning(format!("use_count update failed: {e}")))?;
        Ok(())
    }

    pub fn delete(&self, id: i64) -> Result<bool, AatError> {
        let conn = self.lock()?;
        let affected = conn
            .execute("DELETE FROM learned_elements WHERE id = ?1", params![id])
            .map_err(|e| AatError::Learning(format!("delete failed: {e}")))?;
        Ok(affected > 0)
    }

    pub fn list_all(&self) -> Result<Vec<LearnedElement>, AatError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT * FROM learned_elements ORDER BY id")
            .map_err(|e| AatError::Learning(format!("query failed: {e}")))?;
        let rows = stmt
            .query_map([], row_to_element)
            .map_err(|e| AatError::Learning(format!("query failed: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| AatError::Learning(format!("row decode failed: {e}")))
    }

    /// Export every element to a JSON array. Row ids are stripped so the
    /// file can be imported into any other store.
    pub fn export_json(&self, path: &Path) -> Result<usize, AatError> {
        let mut elements = self.list_all()?;
        for element in &mut elements {
            element.id = None;
        }
        let json = serde_json::to_string_pretty(&elements)
            .map_err(|e| AatError::Learning(format!("serialize failed: {e}")))?;
        std::fs::write(path, json)?;
        info!("exported {} learned elements to {}", elements.len(), path.display());
        Ok(elements.len())
    }

    /// Import elements from a JSON export, assigning fresh ids.
    pub fn import_json(&self, path: &Path) -> Result<usize, AatError> {
        let raw = std::fs::read_to_string(path)?;
        let mut elements: Vec<LearnedElement> = serde_json::from_str(&raw)
            .map_err(|e| AatError::Learning(format!("cannot parse {}: {e}", path.display())))?;
        for element in &mut elements {
            element.id = None;
            self.save(element)?;
        }
        info!("imported {} learned elements from {}", elements.len(), path.display());
        Ok(elements.len())
    }

    pub fn close(self) -> Result<(), AatError> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| AatError::Learning("store mutex poisoned".into()))?;
        conn.close()
            .map_err(|(_, e)| AatError::Learning(format!("close failed: {e}")))
    }
}

fn row_to_element(row: &Row<'_>) -> rusqlite::Result<LearnedElement> {
    let created: String = row.get("created_at")?;
    let updated: String = row.get("updated_at")?;
    Ok(LearnedElement {
        id: Some(row.get("id")?),
        scenario_id: row.get("scenario_id")?,
        step_number: row.get("step_number")?,
        target_name: row.get("target_name")?,
        screenshot_hash: row.get("screenshot_hash")?,
        correct_x: row.get("correct_x")?,
        correct_y: row.get("correct_y")?,
        cropped_image_path: row.get("cropped_image_path")?,
        confidence: row.get("confidence")?,
        use_count: row.get("use_count")?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// blake3 hash of the raw screenshot bytes, hex encoded.
pub fn screenshot_hash(screenshot: &[u8]) -> String {
    blake3::hash(screenshot).to_hex().to_string()
}

/// Build a [`LearnedElement`] from a confirmed position: hashes the
/// screenshot and writes a context crop next to the database so a human
/// can audit what was learned.
pub fn capture_learned_element(
    scenario_id: &str,
    step_number: u32,
    target_name: &str,
    screenshot: &[u8],
    x: i32,
    y: i32,
    confidence: f32,
    crops_dir: &Path,
) -> Result<LearnedElement, AatError> {
    let hash = screenshot_hash(screenshot);

    let img = image::load_from_memory(screenshot)
        .map_err(|e| AatError::Learning(format!("cannot decode screenshot: {e}")))?;
    let (w, h) = (img.width(), img.height());
    let half = CROP_SIZE / 2;
    let left = (x - half as i32).clamp(0, w.saturating_sub(1) as i32) as u32;
    let top = (y - half as i32).clamp(0, h.saturating_sub(1) as i32) as u32;
    let crop_w = CROP_SIZE.min(w - left);
    let crop_h = CROP_SIZE.min(h - top);
    let crop = img.crop_imm(left, top, crop_w, crop_h);

    std::fs::create_dir_all(crops_dir)?;
    let crop_path = crops_dir.join(format!(
        "{scenario_id}-{step_number}-{}.png",
        &hash[..12]
    ));
    crop.save(&crop_path)
        .map_err(|e| AatError::Learning(format!("cannot write crop: {e}")))?;

    let now = Utc::now();
    Ok(LearnedElement {
        id: None,
        scenario_id: scenario_id.to_string(),
        step_number,
        target_name: target_name.to_string(),
        screenshot_hash: hash,
        correct_x: x,
        correct_y: y,
        cropped_image_path: crop_path.to_string_lossy().into_owned(),
        confidence,
        use_count: 0,
        created_at: now,
        updated_at: now,
    })
}

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::policy::SprayAction;

/// Append-only capture → detection → action log.
///
/// Callers record in that order; each call returns the row id the next one
/// refers to.
pub trait DetectionStore: Send {
    fn record_capture(&mut self, image_ref: &str) -> Result<i64>;

    fn record_detection(
        &mut self,
        capture_id: i64,
        disease: Option<&str>,
        severity: f32,
        raw_payload: &Value,
    ) -> Result<i64>;

    fn record_action(
        &mut self,
        detection_id: i64,
        action: SprayAction,
        duration_ms: u32,
    ) -> Result<i64>;

    /// Latest rows of each table, newest first.
    fn recent(&mut self, limit: usize) -> Result<RecentActivity>;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaptureRecord {
    pub id: i64,
    pub image_path: String,
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionRecord {
    pub id: i64,
    pub capture_id: i64,
    pub disease: Option<String>,
    pub severity: f32,
    pub raw_json: String,
    pub image_path: String,
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionRecord {
    pub id: i64,
    pub detection_id: i64,
    pub action: String,
    pub duration_ms: u32,
    pub disease: Option<String>,
    pub severity: f32,
    pub created_at: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RecentActivity {
    pub captures: Vec<CaptureRecord>,
    pub detections: Vec<DetectionRecord>,
    pub actions: Vec<ActionRecord>,
}

pub struct SqliteDetectionStore {
    conn: Connection,
}

impl SqliteDetectionStore {
    /// Open (creating if needed) the database at `db_path`. `:memory:` is
    /// accepted for an ephemeral store.
    pub fn open(db_path: &str) -> Result<Self> {
        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("create db directory {}", parent.display()))?;
                }
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("open detection store {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS captures (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              image_path TEXT NOT NULL,
              created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              capture_id INTEGER NOT NULL REFERENCES captures(id),
              disease TEXT,
              severity REAL,
              raw_json TEXT,
              created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS actions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              detection_id INTEGER NOT NULL REFERENCES detections(id),
              action TEXT NOT NULL,
              duration_ms INTEGER NOT NULL DEFAULT 0,
              created_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl DetectionStore for SqliteDetectionStore {
    fn record_capture(&mut self, image_ref: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO captures(image_path, created_at) VALUES (?1, ?2)",
            params![image_ref, unix_now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn record_detection(
        &mut self,
        capture_id: i64,
        disease: Option<&str>,
        severity: f32,
        raw_payload: &Value,
    ) -> Result<i64> {
        let raw_json = serde_json::to_string(raw_payload)?;
        self.conn.execute(
            r#"
            INSERT INTO detections(capture_id, disease, severity, raw_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![capture_id, disease, severity as f64, raw_json, unix_now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn record_action(
        &mut self,
        detection_id: i64,
        action: SprayAction,
        duration_ms: u32,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO actions(detection_id, action, duration_ms, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![detection_id, action.as_str(), duration_ms, unix_now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn recent(&mut self, limit: usize) -> Result<RecentActivity> {
        let limit = limit as i64;

        let mut stmt = self.conn.prepare(
            "SELECT id, image_path, created_at FROM captures ORDER BY id DESC LIMIT ?1",
        )?;
        let captures = stmt
            .query_map(params![limit], |row| {
                Ok(CaptureRecord {
                    id: row.get(0)?,
                    image_path: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT d.id, d.capture_id, d.disease, d.severity, d.raw_json, c.image_path, d.created_at
            FROM detections d JOIN captures c ON d.capture_id = c.id
            ORDER BY d.id DESC LIMIT ?1
            "#,
        )?;
        let detections = stmt
            .query_map(params![limit], |row| {
                Ok(DetectionRecord {
                    id: row.get(0)?,
                    capture_id: row.get(1)?,
                    disease: row.get(2)?,
                    severity: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0) as f32,
                    raw_json: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    image_path: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT a.id, a.detection_id, a.action, a.duration_ms, d.disease, d.severity, a.created_at
            FROM actions a JOIN detections d ON a.detection_id = d.id
            ORDER BY a.id DESC LIMIT ?1
            "#,
        )?;
        let actions = stmt
            .query_map(params![limit], |row| {
                Ok(ActionRecord {
                    id: row.get(0)?,
                    detection_id: row.get(1)?,
                    action: row.get(2)?,
                    duration_ms: row.get(3)?,
                    disease: row.get(4)?,
                    severity: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0) as f32,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(RecentActivity {
            captures,
            detections,
            actions,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryDetectionStore {
    captures: Vec<CaptureRecord>,
    detections: Vec<DetectionRecord>,
    actions: Vec<ActionRecord>,
}

impl InMemoryDetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captures(&self) -> &[CaptureRecord] {
        &self.captures
    }

    pub fn detections(&self) -> &[DetectionRecord] {
        &self.detections
    }

    pub fn actions(&self) -> &[ActionRecord] {
        &self.actions
    }
}

impl DetectionStore for InMemoryDetectionStore {
    fn record_capture(&mut self, image_ref: &str) -> Result<i64> {
        let id = self.captures.len() as i64 + 1;
        self.captures.push(CaptureRecord {
            id,
            image_path: image_ref.to_string(),
            created_at: unix_now(),
        });
        Ok(id)
    }

    fn record_detection(
        &mut self,
        capture_id: i64,
        disease: Option<&str>,
        severity: f32,
        raw_payload: &Value,
    ) -> Result<i64> {
        let image_path = self
            .captures
            .iter()
            .find(|c| c.id == capture_id)
            .map(|c| c.image_path.clone())
            .ok_or_else(|| anyhow!("unknown capture id {}", capture_id))?;
        let id = self.detections.len() as i64 + 1;
        self.detections.push(DetectionRecord {
            id,
            capture_id,
            disease: disease.map(str::to_string),
            severity,
            raw_json: serde_json::to_string(raw_payload)?,
            image_path,
            created_at: unix_now(),
        });
        Ok(id)
    }

    fn record_action(
        &mut self,
        detection_id: i64,
        action: SprayAction,
        duration_ms: u32,
    ) -> Result<i64> {
        let detection = self
            .detections
            .iter()
            .find(|d| d.id == detection_id)
            .ok_or_else(|| anyhow!("unknown detection id {}", detection_id))?;
        let id = self.actions.len() as i64 + 1;
        let record = ActionRecord {
            id,
            detection_id,
            action: action.as_str().to_string(),
            duration_ms,
            disease: detection.disease.clone(),
            severity: detection.severity,
            created_at: unix_now(),
        };
        self.actions.push(record);
        Ok(id)
    }

    fn recent(&mut self, limit: usize) -> Result<RecentActivity> {
        Ok(RecentActivity {
            captures: self.captures.iter().rev().take(limit).cloned().collect(),
            detections: self.detections.iter().rev().take(limit).cloned().collect(),
            actions: self.actions.iter().rev().take(limit).cloned().collect(),
        })
    }
}

/// Where classified images are kept so capture rows can point at them.
#[derive(Clone, Debug)]
pub struct CropArchive {
    dir: Option<PathBuf>,
}

impl CropArchive {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// An archive that keeps nothing on disk.
    pub fn in_memory() -> Self {
        Self { dir: None }
    }

    /// Save an automatically detected leaf crop; returns its image reference.
    pub fn save_crop(&self, crop: &RgbImage, leaf_index: usize) -> Result<String> {
        self.save(crop, format!("auto_leaf_{}_{}.jpg", unix_now(), leaf_index))
    }

    /// Save a whole-frame field capture; returns its image reference.
    pub fn save_capture(&self, frame: &RgbImage, seq: u64) -> Result<String> {
        self.save(frame, format!("capture_{}_{}.jpg", unix_now(), seq))
    }

    fn save(&self, image: &RgbImage, name: String) -> Result<String> {
        let Some(dir) = self.dir.as_ref() else {
            return Ok(format!("memory:{}", name));
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create image directory {}", dir.display()))?;
        let path = dir.join(name);
        image
            .save_with_format(&path, image::ImageFormat::Jpeg)
            .with_context(|| format!("write {}", path.display()))?;
        Ok(path.to_string_lossy().into_owned())
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

//! SQLite-backed enrollment gallery and access log.

use crate::error::StoreError;
use crate::photos::{check_identifier, discard};
use crate::schema;
use chrono::{DateTime, Utc};
use doorward_core::{
    AccessLogEntry, AuditError, AuditLogger, Embedding, EnrollmentRecord, EnrollmentStatus, GalleryError,
    GalleryProvider,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const ENROLLMENT_COLUMNS: &str =
    "environment, subject_id, display_name, embedding, model_version, reference_image, status";

const LOG_COLUMNS: &str = "id, timestamp, environment, subject_id, display_name, access_granted, \
                           face_confidence, uniform_score, device_id, denial_reason";

fn encode_embedding(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Raw enrollment row; the embedding is decoded separately so that one
/// corrupt blob does not fail a whole listing.
struct EnrollmentRow {
    environment: String,
    subject_id: String,
    display_name: String,
    embedding: Vec<u8>,
    model_version: Option<String>,
    reference_image: Option<String>,
    status: String,
}

impl EnrollmentRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            environment: row.get(0)?,
            subject_id: row.get(1)?,
            display_name: row.get(2)?,
            embedding: row.get(3)?,
            model_version: row.get(4)?,
            reference_image: row.get(5)?,
            status: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<EnrollmentRecord, StoreError> {
        let values = decode_embedding(&self.embedding).ok_or_else(|| StoreError::CorruptEmbedding {
            environment: self.environment.clone(),
            subject_id: self.subject_id.clone(),
            len: self.embedding.len(),
        })?;
        let status: EnrollmentStatus = self.status.parse().map_err(|_| StoreError::InvalidValue {
            column: "status",
            value: self.status.clone(),
        })?;
        Ok(EnrollmentRecord {
            subject_id: self.subject_id,
            display_name: self.display_name,
            environment: self.environment,
            embedding: Embedding {
                values,
                model_version: self.model_version,
            },
            reference_image: self.reference_image,
            status,
        })
    }
}

fn read_log_entry(row: &Row<'_>) -> rusqlite::Result<(String, String, AccessLogEntry)> {
    let id: String = row.get(0)?;
    let timestamp: String = row.get(1)?;
    Ok((
        id,
        timestamp,
        AccessLogEntry {
            id: Uuid::nil(),
            timestamp: DateTime::<Utc>::default(),
            environment: row.get(2)?,
            subject_id: row.get(3)?,
            display_name: row.get(4)?,
            access_granted: row.get(5)?,
            face_confidence: row.get::<_, f64>(6)? as f32,
            uniform_score: row.get::<_, f64>(7)? as f32,
            device_id: row.get(8)?,
            denial_reason: row.get(9)?,
        },
    ))
}

fn finish_log_entry((id, timestamp, mut entry): (String, String, AccessLogEntry)) -> Result<AccessLogEntry, StoreError> {
    entry.id = Uuid::parse_str(&id).map_err(|_| StoreError::InvalidValue { column: "id", value: id })?;
    entry.timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|_| StoreError::InvalidValue {
            column: "timestamp",
            value: timestamp.clone(),
        })?
        .with_timezone(&Utc);
    Ok(entry)
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }
        let conn = Connection::open(path)?;
        schema::apply_pragmas(&conn)?;
        schema::migrate(&conn)?;
        tracing::info!(path = %path.display(), "opened store");
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(schema::schema_version(&*self.conn()?)?)
    }

    // --- enrollments ---

    pub fn enroll(&self, record: &EnrollmentRecord) -> Result<(), StoreError> {
        check_identifier(&record.environment)?;
        check_identifier(&record.subject_id)?;
        if !record.embedding.is_well_formed() {
            return Err(StoreError::InvalidEmbedding);
        }

        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO enrollments (environment, subject_id, display_name, embedding, model_version,
                                      reference_image, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT (environment, subject_id) DO NOTHING",
            params![
                record.environment,
                record.subject_id,
                record.display_name,
                encode_embedding(&record.embedding.values),
                record.embedding.model_version,
                record.reference_image,
                record.status.as_str(),
                now,
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyEnrolled {
                environment: record.environment.clone(),
                subject_id: record.subject_id.clone(),
            });
        }
        tracing::info!(environment = %record.environment, subject_id = %record.subject_id, "enrolled subject");
        Ok(())
    }

    /// Replace a subject's embedding and reference photo. Enrollment order
    /// and status are kept. A replaced photo at a different path is deleted.
    pub fn reenroll(
        &self,
        environment: &str,
        subject_id: &str,
        embedding: &Embedding,
        reference_image: Option<&str>,
    ) -> Result<(), StoreError> {
        if !embedding.is_well_formed() {
            return Err(StoreError::InvalidEmbedding);
        }
        let conn = self.conn()?;
        let previous: Option<Option<String>> = conn
            .query_row(
                "SELECT reference_image FROM enrollments WHERE environment = ?1 AND subject_id = ?2",
                params![environment, subject_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(previous) = previous else {
            return Err(StoreError::not_found(environment, subject_id));
        };

        conn.execute(
            "UPDATE enrollments
             SET embedding = ?3, model_version = ?4, reference_image = ?5, updated_at = ?6
             WHERE environment = ?1 AND subject_id = ?2",
            params![
                environment,
                subject_id,
                encode_embedding(&embedding.values),
                embedding.model_version,
                reference_image,
                Utc::now().to_rfc3339(),
            ],
        )?;
        drop(conn);

        if let Some(old) = previous.filter(|old| Some(old.as_str()) != reference_image) {
            discard(&old);
        }
        tracing::info!(environment, subject_id, "re-enrolled subject");
        Ok(())
    }

    pub fn set_status(&self, environment: &str, subject_id: &str, status: EnrollmentStatus) -> Result<(), StoreError> {
        let changed = self.conn()?.execute(
            "UPDATE enrollments SET status = ?3, updated_at = ?4 WHERE environment = ?1 AND subject_id = ?2",
            params![environment, subject_id, status.as_str(), Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found(environment, subject_id));
        }
        tracing::info!(environment, subject_id, %status, "enrollment status changed");
        Ok(())
    }

    /// Flip active/inactive and return the new status.
    pub fn toggle_status(&self, environment: &str, subject_id: &str) -> Result<EnrollmentStatus, StoreError> {
        let status = self
            .status(environment, subject_id)?
            .ok_or_else(|| StoreError::not_found(environment, subject_id))?
            .toggled();
        self.set_status(environment, subject_id, status)?;
        Ok(status)
    }

    /// Delete the record and its reference photo.
    pub fn remove(&self, environment: &str, subject_id: &str) -> Result<EnrollmentRecord, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE environment = ?1 AND subject_id = ?2"),
                params![environment, subject_id],
                EnrollmentRow::read,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(environment, subject_id))?;
        let reference_image = row.reference_image.clone();

        conn.execute(
            "DELETE FROM enrollments WHERE environment = ?1 AND subject_id = ?2",
            params![environment, subject_id],
        )?;
        drop(conn);

        if let Some(path) = reference_image.as_deref() {
            discard(path);
        }
        tracing::info!(environment, subject_id, "removed subject");

        // The row is gone either way; report a corrupt embedding with an empty vector.
        Ok(row.into_record().unwrap_or_else(|_| EnrollmentRecord {
            reference_image,
            ..EnrollmentRecord::new(environment, subject_id, "", Embedding::new(Vec::new()))
        }))
    }

    /// Current status, read without decoding the embedding.
    pub fn status(&self, environment: &str, subject_id: &str) -> Result<Option<EnrollmentStatus>, StoreError> {
        let status: Option<String> = self
            .conn()?
            .query_row(
                "SELECT status FROM enrollments WHERE environment = ?1 AND subject_id = ?2",
                params![environment, subject_id],
                |row| row.get(0),
            )
            .optional()?;
        status
            .map(|s| {
                s.parse()
                    .map_err(|_| StoreError::InvalidValue { column: "status", value: s })
            })
            .transpose()
    }

    pub fn exists(&self, environment: &str, subject_id: &str) -> Result<bool, StoreError> {
        Ok(self.status(environment, subject_id)?.is_some())
    }

    pub fn get(&self, environment: &str, subject_id: &str) -> Result<Option<EnrollmentRecord>, StoreError> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE environment = ?1 AND subject_id = ?2"),
                params![environment, subject_id],
                EnrollmentRow::read,
            )
            .optional()?;
        row.map(EnrollmentRow::into_record).transpose()
    }

    fn rows(&self, environment: Option<&str>, active_only: bool) -> Result<Vec<EnrollmentRow>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments
             WHERE (?1 IS NULL OR environment = ?1) AND (?2 = 0 OR status = 'active')
             ORDER BY seq"
        ))?;
        let rows = stmt
            .query_map(params![environment, active_only], EnrollmentRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All readable records, optionally for one environment, in enrollment
    /// order. Rows that fail to decode are skipped with a warning; `get`
    /// still reports them.
    pub fn list(&self, environment: Option<&str>) -> Result<Vec<EnrollmentRecord>, StoreError> {
        Ok(readable(self.rows(environment, false)?))
    }

    // --- access log ---

    pub fn append_log(&self, entry: &AccessLogEntry) -> Result<(), StoreError> {
        self.conn()?.execute(
            &format!("INSERT INTO access_log ({LOG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                entry.id.to_string(),
                entry.timestamp.to_rfc3339(),
                entry.environment,
                entry.subject_id,
                entry.display_name,
                entry.access_granted,
                entry.face_confidence as f64,
                entry.uniform_score as f64,
                entry.device_id,
                entry.denial_reason,
            ],
        )?;
        Ok(())
    }

    /// Newest entries first, optionally for one environment.
    pub fn recent_logs(&self, environment: Option<&str>, limit: usize) -> Result<Vec<AccessLogEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM access_log
             WHERE (?1 IS NULL OR environment = ?1)
             ORDER BY seq DESC LIMIT ?2"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![environment, limit], read_log_entry)?;
        let entries = rows.map(|r| finish_log_entry(r?)).collect::<Result<Vec<_>, StoreError>>()?;
        Ok(entries)
    }
}

fn readable(rows: Vec<EnrollmentRow>) -> Vec<EnrollmentRecord> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let (environment, subject_id) = (row.environment.clone(), row.subject_id.clone());
        match row.into_record() {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(%environment, %subject_id, error = %e, "skipping unreadable enrollment"),
        }
    }
    records
}

impl GalleryProvider for SqliteStore {
    fn list_active(&self, environment: &str) -> Result<Vec<EnrollmentRecord>, GalleryError> {
        Ok(readable(self.rows(Some(environment), true)?))
    }
}

impl AuditLogger for SqliteStore {
    fn append(&self, entry: &AccessLogEntry) -> Result<(), AuditError> {
        Ok(self.append_log(entry)?)
    }
}

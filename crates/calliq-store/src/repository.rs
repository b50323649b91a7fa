//! Stateless repositories over the queue schema.
//!
//! Every method takes a `&Connection` so callers decide the transaction
//! boundary. [`crate::store::PipelineStore`] composes these inside
//! transactions; nothing here commits on its own.

use calliq_core::{
    AnalysisRecord, CheckpointKind, DiarizationMethod, DiarizationRecord, FileId, FileStatus,
    PipelineStage, ScoreBreakdown, TranscriptionResult,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::Result;
use crate::types::{FileRecord, NewFile, StageCheckpoint};

/// Current UTC time in the stored `YYYY-MM-DDTHH:MM:SSZ` form.
///
/// Fixed-width UTC strings compare lexicographically, which is what the
/// lease-expiry scans rely on.
pub(crate) fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// UTC time `lease_secs` from now, in the stored form.
pub(crate) fn lease_expiry(lease_secs: u64) -> String {
    let secs = i64::try_from(lease_secs).unwrap_or(86_400);
    (Utc::now() + chrono::Duration::seconds(secs))
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Files
// ─────────────────────────────────────────────────────────────────────────────

/// Queue rows — stateless, every method takes `&Connection`.
pub struct FileRepo;

impl FileRepo {
    /// Insert a fresh `queued` row at stage 0 and return it.
    pub fn insert(conn: &Connection, file: &NewFile) -> Result<FileRecord> {
        let id = FileId::new();
        let now = now_iso();
        let _ = conn.execute(
            "INSERT INTO files
               (id, file_name, audio_path, content_hash, size_bytes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                id.as_str(),
                file.file_name,
                file.audio_path,
                file.content_hash,
                file.size_bytes,
                now
            ],
        )?;

        Ok(FileRecord {
            id,
            file_name: file.file_name.clone(),
            audio_path: file.audio_path.clone(),
            content_hash: file.content_hash.clone(),
            size_bytes: file.size_bytes,
            duration_secs: None,
            channels: None,
            stage: PipelineStage::Queued,
            status: FileStatus::Queued,
            retry_count: 0,
            last_error: None,
            cancel_requested: false,
            lease_expires_at: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Get a file by id.
    pub fn get(conn: &Connection, file_id: &str) -> Result<Option<FileRecord>> {
        let row = conn
            .query_row(
                "SELECT * FROM files WHERE id = ?1",
                params![file_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Newest non-failed row with the given content hash, if any.
    ///
    /// `failed` rows never block a re-upload; everything else does.
    pub fn find_active_by_hash(conn: &Connection, content_hash: &str) -> Result<Option<FileRecord>> {
        let row = conn
            .query_row(
                "SELECT * FROM files
                 WHERE content_hash = ?1
                   AND status IN ('queued', 'running', 'done', 'degraded')
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1",
                params![content_hash],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Id of the next leasable file: oldest `queued` row, or oldest `running`
    /// row whose lease has expired.
    pub fn lease_candidate(conn: &Connection, now: &str) -> Result<Option<String>> {
        let id = conn
            .query_row(
                "SELECT id FROM files
                 WHERE status = 'queued'
                    OR (status = 'running'
                        AND lease_expires_at IS NOT NULL
                        AND lease_expires_at <= ?1)
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1",
                params![now],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Mark a file `running` with a fresh lease.
    pub fn mark_running(conn: &Connection, file_id: &str, expires_at: &str) -> Result<()> {
        let _ = conn.execute(
            "UPDATE files
             SET status = 'running', lease_expires_at = ?2, updated_at = ?3
             WHERE id = ?1",
            params![file_id, expires_at, now_iso()],
        )?;
        Ok(())
    }

    /// Record that a stage started executing and refresh the lease.
    ///
    /// MAX keeps the stage monotonic even if a stale lease holder commits
    /// after a takeover.
    pub fn start_stage(
        conn: &Connection,
        file_id: &str,
        stage: PipelineStage,
        expires_at: &str,
    ) -> Result<()> {
        let _ = conn.execute(
            "UPDATE files
             SET stage = MAX(stage, ?2), lease_expires_at = ?3, updated_at = ?4
             WHERE id = ?1",
            params![file_id, stage.ordinal(), expires_at, now_iso()],
        )?;
        Ok(())
    }

    /// Advance past a completed stage: bump the stage pointer, reset the
    /// per-stage retry counter, clear the last error, refresh the lease.
    pub fn advance(
        conn: &Connection,
        file_id: &str,
        next_stage: PipelineStage,
        expires_at: &str,
    ) -> Result<()> {
        let _ = conn.execute(
            "UPDATE files
             SET stage = MAX(stage, ?2), retry_count = 0, last_error = NULL,
                 lease_expires_at = ?3, updated_at = ?4
             WHERE id = ?1",
            params![file_id, next_stage.ordinal(), expires_at, now_iso()],
        )?;
        Ok(())
    }

    /// Record a retry attempt on the current stage and refresh the lease.
    pub fn record_retry(
        conn: &Connection,
        file_id: &str,
        retry_count: u32,
        error: &str,
        expires_at: &str,
    ) -> Result<()> {
        let _ = conn.execute(
            "UPDATE files
             SET retry_count = ?2, last_error = ?3, lease_expires_at = ?4, updated_at = ?5
             WHERE id = ?1",
            params![file_id, retry_count, error, expires_at, now_iso()],
        )?;
        Ok(())
    }

    /// Store the probed audio properties from validation.
    ///
    /// `None` fields write NULL; compressed containers the validator cannot
    /// parse leave both columns unset.
    pub fn set_audio_properties(
        conn: &Connection,
        file_id: &str,
        duration_secs: Option<f64>,
        channels: Option<u16>,
    ) -> Result<()> {
        let _ = conn.execute(
            "UPDATE files
             SET duration_secs = ?2, channels = ?3, updated_at = ?4
             WHERE id = ?1",
            params![file_id, duration_secs, channels, now_iso()],
        )?;
        Ok(())
    }

    /// Move a file to a terminal status and drop the lease.
    pub fn finalize(
        conn: &Connection,
        file_id: &str,
        status: FileStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let _ = conn.execute(
            "UPDATE files
             SET status = ?2, last_error = ?3, lease_expires_at = NULL, updated_at = ?4
             WHERE id = ?1",
            params![file_id, status.as_sql(), error, now_iso()],
        )?;
        Ok(())
    }

    /// Return a running file to the queue, preserving stage and retry count.
    pub fn requeue(conn: &Connection, file_id: &str) -> Result<()> {
        let _ = conn.execute(
            "UPDATE files
             SET status = 'queued', lease_expires_at = NULL, updated_at = ?2
             WHERE id = ?1",
            params![file_id, now_iso()],
        )?;
        Ok(())
    }

    /// Requeue every `running` row whose lease is missing or expired.
    pub fn requeue_stale(conn: &Connection, now: &str) -> Result<usize> {
        let changed = conn.execute(
            "UPDATE files
             SET status = 'queued', lease_expires_at = NULL, updated_at = ?1
             WHERE status = 'running'
               AND (lease_expires_at IS NULL OR lease_expires_at <= ?1)",
            params![now],
        )?;
        Ok(changed)
    }

    /// Put a `degraded` file back in the queue at the analysis stage.
    pub fn reopen_for_analysis(conn: &Connection, file_id: &str) -> Result<()> {
        let _ = conn.execute(
            "UPDATE files
             SET status = 'queued', stage = ?2, retry_count = 0, last_error = NULL,
                 cancel_requested = 0, lease_expires_at = NULL, updated_at = ?3
             WHERE id = ?1",
            params![file_id, PipelineStage::Analyzing.ordinal(), now_iso()],
        )?;
        Ok(())
    }

    /// Flag a file for cancellation. Returns whether a row changed.
    pub fn request_cancel(conn: &Connection, file_id: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE files
             SET cancel_requested = 1, updated_at = ?2
             WHERE id = ?1 AND status IN ('queued', 'running')",
            params![file_id, now_iso()],
        )?;
        Ok(changed > 0)
    }

    /// Number of `queued` rows.
    pub fn queue_depth(conn: &Connection) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE status = 'queued'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
        let stage: i64 = row.get("stage")?;
        let status: String = row.get("status")?;
        Ok(FileRecord {
            id: FileId::from_string(row.get("id")?),
            file_name: row.get("file_name")?,
            audio_path: row.get("audio_path")?,
            content_hash: row.get("content_hash")?,
            size_bytes: row.get("size_bytes")?,
            duration_secs: row.get("duration_secs")?,
            channels: row.get("channels")?,
            stage: PipelineStage::from_ordinal(stage).unwrap_or(PipelineStage::Queued),
            status: FileStatus::from_sql(&status).unwrap_or(FileStatus::Queued),
            retry_count: row.get("retry_count")?,
            last_error: row.get("last_error")?,
            cancel_requested: row.get("cancel_requested")?,
            lease_expires_at: row.get("lease_expires_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stage outputs
// ─────────────────────────────────────────────────────────────────────────────

/// Per-stage output tables — one row per file, idempotent writes.
///
/// A stale lease holder may replay a stage after a takeover, so inserts
/// upsert instead of failing on the primary key.
pub struct OutputRepo;

impl OutputRepo {
    /// Store the transcription output for a file.
    pub fn upsert_transcription(
        conn: &Connection,
        file_id: &str,
        transcription: &TranscriptionResult,
    ) -> Result<()> {
        let words = serde_json::to_string(&transcription.words)?;
        let _ = conn.execute(
            "INSERT INTO transcriptions (file_id, full_text, language, words, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(file_id) DO UPDATE SET
                 full_text = excluded.full_text,
                 language = excluded.language,
                 words = excluded.words",
            params![
                file_id,
                transcription.full_text,
                transcription.language,
                words,
                now_iso()
            ],
        )?;
        Ok(())
    }

    /// Read back the transcription output, if present.
    pub fn get_transcription(
        conn: &Connection,
        file_id: &str,
    ) -> Result<Option<TranscriptionResult>> {
        let raw = conn
            .query_row(
                "SELECT full_text, language, words FROM transcriptions WHERE file_id = ?1",
                params![file_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((full_text, language, words_json)) = raw else {
            return Ok(None);
        };
        let words = serde_json::from_str(&words_json)?;
        Ok(Some(TranscriptionResult {
            full_text,
            language,
            words,
        }))
    }

    /// Store the diarization output for a file.
    pub fn upsert_diarization(
        conn: &Connection,
        file_id: &str,
        diarization: &DiarizationRecord,
    ) -> Result<()> {
        let segments = serde_json::to_string(&diarization.segments)?;
        let _ = conn.execute(
            "INSERT INTO diarizations (file_id, method, confidence, speaker_count,
                 low_confidence, multi_speaker, segments, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(file_id) DO UPDATE SET
                 method = excluded.method,
                 confidence = excluded.confidence,
                 speaker_count = excluded.speaker_count,
                 low_confidence = excluded.low_confidence,
                 multi_speaker = excluded.multi_speaker,
                 segments = excluded.segments",
            params![
                file_id,
                diarization.method.as_sql(),
                diarization.confidence,
                diarization.speaker_count,
                diarization.low_confidence,
                diarization.multi_speaker,
                segments,
                now_iso()
            ],
        )?;
        Ok(())
    }

    /// Read back the diarization output, if present.
    pub fn get_diarization(conn: &Connection, file_id: &str) -> Result<Option<DiarizationRecord>> {
        let raw = conn
            .query_row(
                "SELECT method, confidence, speaker_count, low_confidence, multi_speaker, segments
                 FROM diarizations WHERE file_id = ?1",
                params![file_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((method, confidence, speaker_count, low_confidence, multi_speaker, segments_json)) =
            raw
        else {
            return Ok(None);
        };
        let segments = serde_json::from_str(&segments_json)?;
        Ok(Some(DiarizationRecord {
            method: DiarizationMethod::from_sql(&method).unwrap_or(DiarizationMethod::ModelBased),
            confidence,
            speaker_count,
            low_confidence,
            multi_speaker,
            segments,
        }))
    }

    /// Store the analysis output for a file.
    pub fn upsert_analysis(
        conn: &Connection,
        file_id: &str,
        analysis: &AnalysisRecord,
    ) -> Result<()> {
        let quotes = serde_json::to_string(&analysis.quotes)?;
        let _ = conn.execute(
            "INSERT INTO analyses (file_id, standard, loyalty, kindness, overall,
                 summary, quotes, clamped, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(file_id) DO UPDATE SET
                 standard = excluded.standard,
                 loyalty = excluded.loyalty,
                 kindness = excluded.kindness,
                 overall = excluded.overall,
                 summary = excluded.summary,
                 quotes = excluded.quotes,
                 clamped = excluded.clamped",
            params![
                file_id,
                analysis.scores.standard,
                analysis.scores.loyalty,
                analysis.scores.kindness,
                analysis.overall,
                analysis.summary,
                quotes,
                analysis.clamped,
                now_iso()
            ],
        )?;
        Ok(())
    }

    /// Read back the analysis output, if present.
    pub fn get_analysis(conn: &Connection, file_id: &str) -> Result<Option<AnalysisRecord>> {
        let raw = conn
            .query_row(
                "SELECT standard, loyalty, kindness, overall, summary, quotes, clamped
                 FROM analyses WHERE file_id = ?1",
                params![file_id],
                |row| {
                    Ok((
                        row.get::<_, u8>(0)?,
                        row.get::<_, u8>(1)?,
                        row.get::<_, u8>(2)?,
                        row.get::<_, u8>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, bool>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((standard, loyalty, kindness, overall, summary, quotes_json, clamped)) = raw
        else {
            return Ok(None);
        };
        let quotes = serde_json::from_str(&quotes_json)?;
        Ok(Some(AnalysisRecord {
            scores: ScoreBreakdown {
                standard,
                loyalty,
                kindness,
            },
            overall,
            summary,
            quotes,
            clamped,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Checkpoints
// ─────────────────────────────────────────────────────────────────────────────

/// Append-only stage audit log.
pub struct CheckpointRepo;

impl CheckpointRepo {
    /// Append one checkpoint row.
    pub fn insert(
        conn: &Connection,
        file_id: &str,
        stage: PipelineStage,
        kind: CheckpointKind,
        retry_count: u32,
        error: Option<&str>,
    ) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO stage_checkpoints (file_id, stage, kind, retry_count, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                file_id,
                stage.ordinal(),
                kind.as_sql(),
                retry_count,
                error,
                now_iso()
            ],
        )?;
        Ok(())
    }

    /// All checkpoints for a file in insertion order.
    pub fn list(conn: &Connection, file_id: &str) -> Result<Vec<StageCheckpoint>> {
        let mut stmt = conn.prepare(
            "SELECT id, file_id, stage, kind, retry_count, error, created_at
             FROM stage_checkpoints
             WHERE file_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![file_id], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StageCheckpoint> {
        let stage: i64 = row.get("stage")?;
        let kind: String = row.get("kind")?;
        Ok(StageCheckpoint {
            id: row.get("id")?,
            file_id: FileId::from_string(row.get("file_id")?),
            stage: PipelineStage::from_ordinal(stage).unwrap_or(PipelineStage::Queued),
            kind: CheckpointKind::from_sql(&kind).unwrap_or(CheckpointKind::Started),
            retry_count: row.get("retry_count")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use calliq_core::WordTimestamp;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        let _ = crate::migrations::run_migrations(&conn).expect("migrations");
        conn
    }

    fn sample_file(name: &str, hash: &str) -> NewFile {
        NewFile {
            file_name: name.to_owned(),
            audio_path: format!("/tmp/audio/{name}"),
            content_hash: hash.to_owned(),
            size_bytes: 2048,
        }
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let conn = setup_conn();
        let created = FileRepo::insert(&conn, &sample_file("a.mp3", "h1")).unwrap();
        let fetched = FileRepo::get(&conn, created.id.as_str()).unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.status, FileStatus::Queued);
        assert_eq!(fetched.stage, PipelineStage::Queued);
    }

    #[test]
    fn get_missing_returns_none() {
        let conn = setup_conn();
        assert!(FileRepo::get(&conn, "file-missing").unwrap().is_none());
    }

    #[test]
    fn find_active_by_hash_ignores_failed_rows() {
        let conn = setup_conn();
        let failed = FileRepo::insert(&conn, &sample_file("a.mp3", "h1")).unwrap();
        FileRepo::finalize(&conn, failed.id.as_str(), FileStatus::Failed, Some("boom")).unwrap();
        assert!(FileRepo::find_active_by_hash(&conn, "h1").unwrap().is_none());

        let active = FileRepo::insert(&conn, &sample_file("a.mp3", "h1")).unwrap();
        let found = FileRepo::find_active_by_hash(&conn, "h1").unwrap().unwrap();
        assert_eq!(found.id, active.id);
    }

    #[test]
    fn lease_candidate_prefers_oldest() {
        let conn = setup_conn();
        let first = FileRepo::insert(&conn, &sample_file("a.mp3", "h1")).unwrap();
        let _second = FileRepo::insert(&conn, &sample_file("b.mp3", "h2")).unwrap();
        let candidate = FileRepo::lease_candidate(&conn, &now_iso()).unwrap().unwrap();
        assert_eq!(candidate, first.id.as_str());
    }

    #[test]
    fn lease_candidate_sees_expired_running_rows() {
        let conn = setup_conn();
        let file = FileRepo::insert(&conn, &sample_file("a.mp3", "h1")).unwrap();
        FileRepo::mark_running(&conn, file.id.as_str(), &lease_expiry(0)).unwrap();
        let candidate = FileRepo::lease_candidate(&conn, &now_iso()).unwrap();
        assert_eq!(candidate.as_deref(), Some(file.id.as_str()));

        FileRepo::mark_running(&conn, file.id.as_str(), &lease_expiry(300)).unwrap();
        assert!(FileRepo::lease_candidate(&conn, &now_iso()).unwrap().is_none());
    }

    #[test]
    fn stage_updates_are_monotonic() {
        let conn = setup_conn();
        let file = FileRepo::insert(&conn, &sample_file("a.mp3", "h1")).unwrap();
        FileRepo::advance(&conn, file.id.as_str(), PipelineStage::Diarizing, &lease_expiry(300))
            .unwrap();
        // A stale holder trying to rewind to an earlier stage is a no-op.
        FileRepo::start_stage(
            &conn,
            file.id.as_str(),
            PipelineStage::Validating,
            &lease_expiry(300),
        )
        .unwrap();
        let fetched = FileRepo::get(&conn, file.id.as_str()).unwrap().unwrap();
        assert_eq!(fetched.stage, PipelineStage::Diarizing);
    }

    #[test]
    fn transcription_upsert_is_idempotent() {
        let conn = setup_conn();
        let file = FileRepo::insert(&conn, &sample_file("a.mp3", "h1")).unwrap();
        let first = TranscriptionResult {
            full_text: "добрый день".to_owned(),
            language: Some("ru".to_owned()),
            words: vec![WordTimestamp {
                word: "добрый".to_owned(),
                start: 0.0,
                end: 0.4,
            }],
        };
        OutputRepo::upsert_transcription(&conn, file.id.as_str(), &first).unwrap();

        let replay = TranscriptionResult {
            full_text: "добрый день!".to_owned(),
            language: Some("ru".to_owned()),
            words: Vec::new(),
        };
        OutputRepo::upsert_transcription(&conn, file.id.as_str(), &replay).unwrap();

        let stored = OutputRepo::get_transcription(&conn, file.id.as_str())
            .unwrap()
            .unwrap();
        assert_eq!(stored, replay);
    }

    #[test]
    fn checkpoint_list_preserves_insertion_order() {
        let conn = setup_conn();
        let file = FileRepo::insert(&conn, &sample_file("a.mp3", "h1")).unwrap();
        let id = file.id.as_str();
        CheckpointRepo::insert(&conn, id, PipelineStage::Validating, CheckpointKind::Started, 0, None)
            .unwrap();
        CheckpointRepo::insert(
            &conn,
            id,
            PipelineStage::Validating,
            CheckpointKind::Completed,
            0,
            None,
        )
        .unwrap();
        CheckpointRepo::insert(
            &conn,
            id,
            PipelineStage::Transcribing,
            CheckpointKind::Retry,
            1,
            Some("timeout"),
        )
        .unwrap();

        let rows = CheckpointRepo::list(&conn, id).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].kind, CheckpointKind::Started);
        assert_eq!(rows[1].kind, CheckpointKind::Completed);
        assert_eq!(rows[2].kind, CheckpointKind::Retry);
        assert_eq!(rows[2].retry_count, 1);
        assert_eq!(rows[2].error.as_deref(), Some("timeout"));
    }
}

use super::{
    CompletedPlay, LogLevel, SkipSettings, SkipStore, SkippedTrack, TrackStatistics, TrackStatisticsUpdate,
};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::task;

pub struct BehaviorDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl BehaviorDatabase {
    /// Open (or create) the database and store `settings` as the active settings row.
    /// The config file is the source of truth, so whatever was stored before is replaced.
    pub fn new<P: AsRef<Path>>(db_path: P, settings: &SkipSettings) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Self::initialize_tables(&conn)?;
        Self::write_settings(&conn, settings)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn initialize_tables(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                data TEXT NOT NULL, -- JSON SkipSettings
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        // Aggregated skips, one row per track
        conn.execute(
            "CREATE TABLE IF NOT EXISTS skipped_tracks (
                track_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                artist TEXT NOT NULL,
                skip_count INTEGER NOT NULL DEFAULT 0,
                last_skipped INTEGER NOT NULL,
                data TEXT NOT NULL -- JSON SkippedTrack
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS track_statistics (
                track_id TEXT PRIMARY KEY,
                data TEXT NOT NULL, -- JSON TrackStatistics
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_skipped_tracks_skip_count ON skipped_tracks(skip_count)",
            [],
        )?;

        Ok(())
    }

    /// Run `f` against the connection on the blocking pool, off the async workers.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || f(&mut conn.lock())).await?
    }

    fn write_settings(conn: &Connection, settings: &SkipSettings) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO settings (id, data, updated_at) VALUES (1, ?1, CURRENT_TIMESTAMP)",
            params![serde_json::to_string(settings)?],
        )?;
        Ok(())
    }

    pub async fn save_settings(&self, settings: &SkipSettings) -> Result<()> {
        let settings = settings.clone();
        self.with_conn(move |conn| Self::write_settings(conn, &settings))
            .await
    }

    pub async fn most_skipped(&self, limit: usize) -> Result<Vec<SkippedTrack>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM skipped_tracks ORDER BY skip_count DESC, last_skipped DESC LIMIT ?1",
            )?;

            let rows = stmt
                .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            rows.iter()
                .map(|data| Ok(serde_json::from_str(data)?))
                .collect()
        })
        .await
    }

    pub async fn get_track_statistics(&self, track_id: &str) -> Result<Option<TrackStatistics>> {
        let track_id = track_id.to_string();
        self.with_conn(move |conn| Self::load_track_statistics(conn, &track_id))
            .await
    }

    fn save_track_statistics(conn: &Connection, stats: &TrackStatistics) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO track_statistics (track_id, data, updated_at)
             VALUES (?1, ?2, CURRENT_TIMESTAMP)",
            params![stats.track_id, serde_json::to_string(stats)?],
        )?;
        Ok(())
    }

    fn load_track_statistics(conn: &Connection, track_id: &str) -> Result<Option<TrackStatistics>> {
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM track_statistics WHERE track_id = ?1",
                params![track_id],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SkipStore for BehaviorDatabase {
    async fn get_settings(&self) -> Result<SkipSettings> {
        self.with_conn(|conn| {
            let data: Option<String> = conn
                .query_row("SELECT data FROM settings WHERE id = 1", [], |row| row.get(0))
                .optional()?;

            match data {
                Some(data) => Ok(serde_json::from_str(&data)?),
                None => Ok(SkipSettings::default()),
            }
        })
        .await
    }

    async fn get_skipped_tracks(&self) -> Result<Vec<SkippedTrack>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT data FROM skipped_tracks ORDER BY last_skipped DESC")?;

            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            // a row we cannot decode is an error, not an empty history
            rows.iter()
                .map(|data| Ok(serde_json::from_str(data)?))
                .collect()
        })
        .await
    }

    async fn save_skipped_tracks(&self, tracks: &[SkippedTrack]) -> Result<()> {
        let tracks = tracks.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            tx.execute("DELETE FROM skipped_tracks", [])?;
            for track in &tracks {
                tx.execute(
                    "INSERT INTO skipped_tracks (track_id, name, artist, skip_count, last_skipped, data)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        track.id,
                        track.name,
                        track.artist,
                        track.skip_count,
                        track.last_skipped,
                        serde_json::to_string(track)?,
                    ],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn update_track_statistics(&self, update: &TrackStatisticsUpdate) -> Result<()> {
        let update = update.clone();
        self.with_conn(move |conn| {
            let mut stats = Self::load_track_statistics(conn, &update.track_id)?.unwrap_or_else(|| {
                TrackStatistics::new(&update.track_id, &update.track_name, &update.artist_name)
            });

            stats.apply_skip(&update);
            Self::save_track_statistics(conn, &stats)
        })
        .await
    }

    async fn update_not_skipped_track(&self, play: &CompletedPlay) -> Result<()> {
        let play = play.clone();
        self.with_conn(move |conn| {
            let skipped: Option<String> = conn
                .query_row(
                    "SELECT data FROM skipped_tracks WHERE track_id = ?1",
                    params![play.track_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(data) = skipped {
                let mut track: SkippedTrack = serde_json::from_str(&data)?;
                track.not_skipped_count += 1;
                conn.execute(
                    "UPDATE skipped_tracks SET data = ?2 WHERE track_id = ?1",
                    params![play.track_id, serde_json::to_string(&track)?],
                )?;
            }

            let mut stats = Self::load_track_statistics(conn, &play.track_id)?
                .unwrap_or_else(|| TrackStatistics::new(&play.track_id, &play.track_name, &play.artist_name));
            stats.apply_completion(&play);
            Self::save_track_statistics(conn, &stats)
        })
        .await
    }

    async fn save_log(&self, message: &str, level: LogLevel) -> Result<()> {
        let level = serde_json::to_value(level)?;
        let level = level.as_str().unwrap_or("info").to_string();
        let message = message.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO logs (level, message) VALUES (?1, ?2)",
                params![level, message],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{record_skip, SkipRecord, SkipType};
    use tempfile::tempdir;

    fn record(track_id: &str) -> SkipRecord {
        SkipRecord {
            track_id: track_id.to_string(),
            track_name: format!("Song {}", track_id),
            artist_name: "Band".to_string(),
            album_name: Some("Album".to_string()),
            skipped_at: 1_700_000_000_000,
            play_duration: 20_000,
            track_duration: 200_000,
            play_percentage: 10,
            skip_type: SkipType::Standard,
            is_manual_skip: true,
            confidence: 0.85,
            reason: "test".to_string(),
            context: None,
        }
    }

    #[tokio::test]
    async fn test_reopening_applies_current_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("skipwatch.db");

        let db = BehaviorDatabase::new(&path, &SkipSettings::default()).unwrap();
        assert_eq!(db.get_settings().await.unwrap().skip_threshold, 0.7);
        drop(db);

        // edited config on the next run wins over what is stored
        let edited = SkipSettings {
            skip_threshold: 0.3,
            auto_unlike: true,
            ..Default::default()
        };
        let db = BehaviorDatabase::new(&path, &edited).unwrap();
        let settings = db.get_settings().await.unwrap();
        assert_eq!(settings.effective_threshold(), 0.3);
        assert!(settings.auto_unlike);

        db.save_settings(&SkipSettings::default()).await.unwrap();
        assert!(!db.get_settings().await.unwrap().auto_unlike);
    }

    #[tokio::test]
    async fn test_skipped_tracks_roundtrip_and_ordering() {
        let dir = tempdir().unwrap();
        let db = BehaviorDatabase::new(dir.path().join("skipwatch.db"), &SkipSettings::default()).unwrap();

        let mut tracks = Vec::new();
        record_skip(&mut tracks, &record("A"));
        record_skip(&mut tracks, &record("B"));
        record_skip(&mut tracks, &record("B"));
        db.save_skipped_tracks(&tracks).await.unwrap();

        let loaded = db.get_skipped_tracks().await.unwrap();
        assert_eq!(loaded.len(), 2);

        let top = db.most_skipped(1).await.unwrap();
        assert_eq!(top[0].id, "B");
        assert_eq!(top[0].skip_count, 2);
        assert_eq!(top[0].skip_types[&SkipType::Standard], 2);
    }

    #[tokio::test]
    async fn test_completion_bumps_not_skipped_count() {
        let dir = tempdir().unwrap();
        let db = BehaviorDatabase::new(dir.path().join("skipwatch.db"), &SkipSettings::default()).unwrap();

        let mut tracks = Vec::new();
        record_skip(&mut tracks, &record("A"));
        db.save_skipped_tracks(&tracks).await.unwrap();

        db.update_not_skipped_track(&CompletedPlay {
            track_id: "A".into(),
            track_name: "Song A".into(),
            artist_name: "Band".into(),
            played_at: 1,
            played_duration: 196_000,
            track_duration: 200_000,
            device_name: None,
        })
        .await
        .unwrap();

        assert_eq!(db.get_skipped_tracks().await.unwrap()[0].not_skipped_count, 1);
        let stats = db.get_track_statistics("A").await.unwrap().unwrap();
        assert_eq!(stats.completed_count, 1);
    }

    #[tokio::test]
    async fn test_logs_are_written() {
        let dir = tempdir().unwrap();
        let db = BehaviorDatabase::new(dir.path().join("skipwatch.db"), &SkipSettings::default()).unwrap();
        db.save_log("Skipped Song by Band", LogLevel::Info).await.unwrap();

        let count: i64 = db
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM logs WHERE level = 'info'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}

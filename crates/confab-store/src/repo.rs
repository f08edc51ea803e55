use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::types::*;

/// The persistence contract the core depends on.
///
/// Every method may fail with [`StoreError`]; read operations return
/// `Ok(None)` or an empty collection on miss, never a "not found" error.
/// Implementations must be safe for concurrent callers. The core never
/// holds a transaction across an LLM call.
pub trait Repository: Send + Sync {
    // Principals
    fn get_user(&self, id: i64) -> Result<Option<UserRecord>>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>>;
    fn add_user(&self, username: &str, preferred_language: Option<&str>) -> Result<UserRecord>;
    fn set_user_temperature(&self, id: i64, temperature: f64) -> Result<()>;
    fn set_user_language(&self, id: i64, language: &str) -> Result<()>;
    /// Return the user's encryption key, generating and persisting one on
    /// first need.
    fn ensure_encryption_key(&self, id: i64) -> Result<String>;

    // Encrypted memory
    fn get_encrypted_memory(&self, user_id: i64) -> Result<Option<String>>;
    fn set_encrypted_memory(&self, user_id: i64, blob: &str) -> Result<()>;
    /// Legacy plaintext-history column; read-only compatibility fallback.
    fn get_legacy_messages(&self, user_id: i64) -> Result<Option<String>>;

    // Preferences
    fn get_preferences(&self, user_id: i64, ptype: Option<&str>)
        -> Result<Vec<PreferenceRecord>>;
    fn set_preference(
        &self,
        user_id: i64,
        ptype: &str,
        key: &str,
        value: &serde_json::Value,
        confidence: f64,
    ) -> Result<()>;
    /// Delete matching preferences; both filters absent wipes the user's
    /// preference set. Returns the number of rows removed.
    fn delete_preference(
        &self,
        user_id: i64,
        ptype: Option<&str>,
        key: Option<&str>,
    ) -> Result<usize>;

    // Skills & trainings
    fn get_or_create_skill(&self, name: &str) -> Result<SkillRecord>;
    fn get_skill_level(&self, user_id: i64, skill_id: i64) -> Result<i64>;
    fn set_skill_level(&self, user_id: i64, skill_id: i64, level: i64) -> Result<()>;
    /// Snapshot of (skill name → level) for a user.
    fn get_user_skills(&self, user_id: i64) -> Result<HashMap<String, i64>>;
    fn add_training(
        &self,
        user_id: i64,
        skill_id: i64,
        status: TrainingStatus,
        progress: f64,
        notes: Option<&str>,
    ) -> Result<()>;
    fn get_training(&self, user_id: i64, skill_id: i64) -> Result<Option<TrainingRecord>>;
    fn update_training_status(
        &self,
        user_id: i64,
        skill_id: i64,
        status: TrainingStatus,
        progress: f64,
    ) -> Result<()>;

    // Life events
    fn add_life_event(&self, user_id: i64, input: &LifeEventInput) -> Result<LifeEvent>;
    fn get_life_event(&self, user_id: i64, event_id: i64) -> Result<Option<LifeEvent>>;
    fn update_life_event(
        &self,
        user_id: i64,
        event_id: i64,
        input: &LifeEventInput,
    ) -> Result<bool>;
    fn delete_life_event(&self, user_id: i64, event_id: i64) -> Result<bool>;
    fn list_life_events(&self, user_id: i64, event_type: Option<&str>) -> Result<Vec<LifeEvent>>;

    // Rooms
    fn add_room_message(&self, room_id: i64, user_id: i64, content: &str) -> Result<RoomMessage>;
    fn get_room_messages(
        &self,
        room_id: i64,
        limit: usize,
        before_id: Option<i64>,
    ) -> Result<Vec<RoomMessage>>;
    fn is_user_in_room(&self, user_id: i64, room_id: i64) -> Result<bool>;
    fn add_room_member(&self, room_id: i64, user_id: i64) -> Result<()>;
}

/// SQLite-backed repository. Each call locks the single connection; SQLite
/// serialises writes anyway, and nothing here outlives one call.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Backfill helper for rows migrated from the pre-encryption schema.
    /// The trait exposes the column read-only; only migration tooling and
    /// tests write it.
    pub fn seed_legacy_messages(&self, user_id: i64, raw_json: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE users SET legacy_messages = ?1 WHERE id = ?2",
            rusqlite::params![raw_json, user_id],
        )?;
        Ok(())
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

const USER_COLUMNS: &str =
    "id, username, preferred_language, temperature, encryption_key, created_at";

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        preferred_language: row.get(2)?,
        temperature: row.get(3)?,
        encryption_key: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<LifeEvent> {
    Ok(LifeEvent {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        event_type: row.get(3)?,
        date: row.get(4)?,
        description: row.get(5)?,
        emotional_impact: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl Repository for SqliteRepository {
    fn get_user(&self, id: i64) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock().unwrap();
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock().unwrap();
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                [username],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    fn add_user(&self, username: &str, preferred_language: Option<&str>) -> Result<UserRecord> {
        let conn = self.conn.lock().unwrap();
        let created_at = now();
        conn.execute(
            "INSERT INTO users (username, preferred_language, created_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![username, preferred_language, created_at],
        )?;
        let id = conn.last_insert_rowid();
        debug!(user_id = id, username, "user created");
        Ok(UserRecord {
            id,
            username: username.to_string(),
            preferred_language: preferred_language.map(str::to_string),
            temperature: None,
            encryption_key: None,
            created_at,
        })
    }

    fn set_user_temperature(&self, id: i64, temperature: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&temperature) {
            return Err(StoreError::Invalid(format!(
                "temperature {temperature} outside [0,1]"
            )));
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE users SET temperature = ?1 WHERE id = ?2",
            rusqlite::params![temperature, id],
        )?;
        Ok(())
    }

    fn set_user_language(&self, id: i64, language: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE users SET preferred_language = ?1 WHERE id = ?2",
            rusqlite::params![language, id],
        )?;
        Ok(())
    }

    fn ensure_encryption_key(&self, id: i64) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<Option<String>> = conn
            .query_row("SELECT encryption_key FROM users WHERE id = ?1", [id], |r| {
                r.get(0)
            })
            .optional()?;

        match existing {
            Some(Some(key)) if !key.is_empty() => Ok(key),
            Some(_) => {
                let key = confab_crypto::generate_key();
                conn.execute(
                    "UPDATE users SET encryption_key = ?1 WHERE id = ?2",
                    rusqlite::params![key, id],
                )?;
                debug!(user_id = id, "generated encryption key");
                Ok(key)
            }
            None => Err(StoreError::Invalid(format!("no such user: {id}"))),
        }
    }

    fn get_encrypted_memory(&self, user_id: i64) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let blob: Option<Option<String>> = conn
            .query_row(
                "SELECT encrypted_memory FROM users WHERE id = ?1",
                [user_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(blob.flatten().filter(|b| !b.is_empty()))
    }

    fn set_encrypted_memory(&self, user_id: i64, blob: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE users SET encrypted_memory = ?1 WHERE id = ?2",
            rusqlite::params![blob, user_id],
        )?;
        if changed == 0 {
            return Err(StoreError::Invalid(format!("no such user: {user_id}")));
        }
        Ok(())
    }

    fn get_legacy_messages(&self, user_id: i64) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<Option<String>> = conn
            .query_row(
                "SELECT legacy_messages FROM users WHERE id = ?1",
                [user_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(raw.flatten().filter(|b| !b.is_empty()))
    }

    fn get_preferences(
        &self,
        user_id: i64,
        ptype: Option<&str>,
    ) -> Result<Vec<PreferenceRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut out = Vec::new();

        let mut push_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<()> {
            let raw: String = row.get(3)?;
            out.push(PreferenceRecord {
                user_id: row.get(0)?,
                ptype: row.get(1)?,
                key: row.get(2)?,
                value: serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)),
                confidence: row.get(4)?,
                updated_at: row.get(5)?,
            });
            Ok(())
        };

        match ptype {
            Some(t) => {
                let mut stmt = conn.prepare(
                    "SELECT user_id, ptype, key, value, confidence, updated_at
                     FROM user_preferences WHERE user_id = ?1 AND ptype = ?2
                     ORDER BY ptype, key",
                )?;
                let mut rows = stmt.query(rusqlite::params![user_id, t])?;
                while let Some(row) = rows.next()? {
                    push_row(row)?;
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT user_id, ptype, key, value, confidence, updated_at
                     FROM user_preferences WHERE user_id = ?1
                     ORDER BY ptype, key",
                )?;
                let mut rows = stmt.query([user_id])?;
                while let Some(row) = rows.next()? {
                    push_row(row)?;
                }
            }
        }
        Ok(out)
    }

    fn set_preference(
        &self,
        user_id: i64,
        ptype: &str,
        key: &str,
        value: &serde_json::Value,
        confidence: f64,
    ) -> Result<()> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(StoreError::Invalid(format!(
                "confidence {confidence} outside [0,1]"
            )));
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_preferences (user_id, ptype, key, value, confidence, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id, ptype, key) DO UPDATE SET
                value = excluded.value,
                confidence = excluded.confidence,
                updated_at = excluded.updated_at",
            rusqlite::params![user_id, ptype, key, serde_json::to_string(value)?, confidence, now()],
        )?;
        Ok(())
    }

    fn delete_preference(
        &self,
        user_id: i64,
        ptype: Option<&str>,
        key: Option<&str>,
    ) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = match (ptype, key) {
            (Some(t), Some(k)) => conn.execute(
                "DELETE FROM user_preferences WHERE user_id = ?1 AND ptype = ?2 AND key = ?3",
                rusqlite::params![user_id, t, k],
            )?,
            (Some(t), None) => conn.execute(
                "DELETE FROM user_preferences WHERE user_id = ?1 AND ptype = ?2",
                rusqlite::params![user_id, t],
            )?,
            (None, Some(k)) => conn.execute(
                "DELETE FROM user_preferences WHERE user_id = ?1 AND key = ?2",
                rusqlite::params![user_id, k],
            )?,
            (None, None) => conn.execute(
                "DELETE FROM user_preferences WHERE user_id = ?1",
                [user_id],
            )?,
        };
        Ok(removed)
    }

    fn get_or_create_skill(&self, name: &str) -> Result<SkillRecord> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO skills (name) VALUES (?1)",
            [name],
        )?;
        let record = conn.query_row(
            "SELECT id, name FROM skills WHERE name = ?1",
            [name],
            |row| {
                Ok(SkillRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )?;
        Ok(record)
    }

    fn get_skill_level(&self, user_id: i64, skill_id: i64) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let level: Option<i64> = conn
            .query_row(
                "SELECT level FROM user_skills WHERE user_id = ?1 AND skill_id = ?2",
                rusqlite::params![user_id, skill_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(level.unwrap_or(0))
    }

    fn set_skill_level(&self, user_id: i64, skill_id: i64, level: i64) -> Result<()> {
        if !(0..=10).contains(&level) {
            return Err(StoreError::Invalid(format!(
                "skill level {level} outside [0,10]"
            )));
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_skills (user_id, skill_id, level) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, skill_id) DO UPDATE SET level = excluded.level",
            rusqlite::params![user_id, skill_id, level],
        )?;
        Ok(())
    }

    fn get_user_skills(&self, user_id: i64) -> Result<HashMap<String, i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT s.name, us.level FROM user_skills us
             JOIN skills s ON s.id = us.skill_id
             WHERE us.user_id = ?1",
        )?;
        let rows = stmt.query_map([user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn add_training(
        &self,
        user_id: i64,
        skill_id: i64,
        status: TrainingStatus,
        progress: f64,
        notes: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let ts = now();
        conn.execute(
            "INSERT INTO trainings
                (user_id, skill_id, status, progress, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(user_id, skill_id) DO UPDATE SET
                status = excluded.status,
                progress = excluded.progress,
                updated_at = excluded.updated_at",
            rusqlite::params![user_id, skill_id, status.to_string(), progress, notes, ts],
        )?;
        Ok(())
    }

    fn get_training(&self, user_id: i64, skill_id: i64) -> Result<Option<TrainingRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT id, user_id, skill_id, status, progress, notes, created_at, updated_at
                 FROM trainings WHERE user_id = ?1 AND skill_id = ?2",
                rusqlite::params![user_id, skill_id],
                |row| {
                    use std::str::FromStr;
                    let status: String = row.get(3)?;
                    Ok(TrainingRecord {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        skill_id: row.get(2)?,
                        status: TrainingStatus::from_str(&status)
                            .unwrap_or(TrainingStatus::Pending),
                        progress: row.get(4)?,
                        notes: row.get(5)?,
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn update_training_status(
        &self,
        user_id: i64,
        skill_id: i64,
        status: TrainingStatus,
        progress: f64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE trainings SET status = ?1, progress = ?2, updated_at = ?3
             WHERE user_id = ?4 AND skill_id = ?5",
            rusqlite::params![status.to_string(), progress, now(), user_id, skill_id],
        )?;
        Ok(())
    }

    fn add_life_event(&self, user_id: i64, input: &LifeEventInput) -> Result<LifeEvent> {
        let title = input
            .title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| StoreError::Invalid("life event requires a title".to_string()))?;
        let conn = self.conn.lock().unwrap();
        let created_at = now();
        let event_type = input.event_type.as_deref().unwrap_or("other");
        let date = input.date.clone().unwrap_or_else(now);
        conn.execute(
            "INSERT INTO life_events
                (user_id, title, event_type, date, description, emotional_impact, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                user_id,
                title,
                event_type,
                date,
                input.description,
                input.emotional_impact,
                created_at
            ],
        )?;
        Ok(LifeEvent {
            id: conn.last_insert_rowid(),
            user_id,
            title: title.to_string(),
            event_type: event_type.to_string(),
            date,
            description: input.description.clone(),
            emotional_impact: input.emotional_impact.clone(),
            created_at,
        })
    }

    fn get_life_event(&self, user_id: i64, event_id: i64) -> Result<Option<LifeEvent>> {
        let conn = self.conn.lock().unwrap();
        let event = conn
            .query_row(
                "SELECT id, user_id, title, event_type, date, description,
                        emotional_impact, created_at
                 FROM life_events WHERE user_id = ?1 AND id = ?2",
                rusqlite::params![user_id, event_id],
                row_to_event,
            )
            .optional()?;
        Ok(event)
    }

    fn update_life_event(
        &self,
        user_id: i64,
        event_id: i64,
        input: &LifeEventInput,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE life_events SET
                title = COALESCE(?1, title),
                event_type = COALESCE(?2, event_type),
                date = COALESCE(?3, date),
                description = COALESCE(?4, description),
                emotional_impact = COALESCE(?5, emotional_impact)
             WHERE user_id = ?6 AND id = ?7",
            rusqlite::params![
                input.title,
                input.event_type,
                input.date,
                input.description,
                input.emotional_impact,
                user_id,
                event_id
            ],
        )?;
        Ok(changed > 0)
    }

    fn delete_life_event(&self, user_id: i64, event_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "DELETE FROM life_events WHERE user_id = ?1 AND id = ?2",
            rusqlite::params![user_id, event_id],
        )?;
        Ok(changed > 0)
    }

    fn list_life_events(&self, user_id: i64, event_type: Option<&str>) -> Result<Vec<LifeEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut out = Vec::new();
        match event_type {
            Some(t) => {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, title, event_type, date, description,
                            emotional_impact, created_at
                     FROM life_events WHERE user_id = ?1 AND event_type = ?2
                     ORDER BY date",
                )?;
                let rows = stmt.query_map(rusqlite::params![user_id, t], row_to_event)?;
                out.extend(rows.filter_map(|r| r.ok()));
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, title, event_type, date, description,
                            emotional_impact, created_at
                     FROM life_events WHERE user_id = ?1
                     ORDER BY date",
                )?;
                let rows = stmt.query_map([user_id], row_to_event)?;
                out.extend(rows.filter_map(|r| r.ok()));
            }
        }
        Ok(out)
    }

    fn add_room_message(&self, room_id: i64, user_id: i64, content: &str) -> Result<RoomMessage> {
        let conn = self.conn.lock().unwrap();
        let created_at = now();
        conn.execute(
            "INSERT INTO room_messages (room_id, user_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![room_id, user_id, content, created_at],
        )?;
        Ok(RoomMessage {
            id: conn.last_insert_rowid(),
            room_id,
            user_id,
            content: content.to_string(),
            created_at,
        })
    }

    fn get_room_messages(
        &self,
        room_id: i64,
        limit: usize,
        before_id: Option<i64>,
    ) -> Result<Vec<RoomMessage>> {
        let conn = self.conn.lock().unwrap();
        let before = before_id.unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            "SELECT id, room_id, user_id, content, created_at
             FROM room_messages
             WHERE room_id = ?1 AND id < ?2
             ORDER BY id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![room_id, before, limit as i64],
            |row| {
                Ok(RoomMessage {
                    id: row.get(0)?,
                    room_id: row.get(1)?,
                    user_id: row.get(2)?,
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )?;
        // Reverse so oldest first.
        let mut msgs: Vec<_> = rows.filter_map(|r| r.ok()).collect();
        msgs.reverse();
        Ok(msgs)
    }

    fn is_user_in_room(&self, user_id: i64, room_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM room_members WHERE user_id = ?1 AND room_id = ?2",
                rusqlite::params![user_id, room_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn add_room_member(&self, room_id: i64, user_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO room_members (room_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![room_id, user_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> SqliteRepository {
        SqliteRepository::open_in_memory().unwrap()
    }

    #[test]
    fn user_lifecycle() {
        let repo = repo();
        let user = repo.add_user("alice", Some("English")).unwrap();
        assert_eq!(user.preferred_language.as_deref(), Some("English"));

        let fetched = repo.get_user(user.id).unwrap().unwrap();
        assert_eq!(fetched.username, "alice");
        assert!(repo.get_user(9999).unwrap().is_none());

        repo.set_user_temperature(user.id, 0.4).unwrap();
        assert!(repo.set_user_temperature(user.id, 1.5).is_err());

        let by_name = repo.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
    }

    #[test]
    fn encryption_key_is_stable_once_generated() {
        let repo = repo();
        let user = repo.add_user("bob", None).unwrap();
        let key1 = repo.ensure_encryption_key(user.id).unwrap();
        let key2 = repo.ensure_encryption_key(user.id).unwrap();
        assert_eq!(key1, key2);
        assert!(repo.ensure_encryption_key(42).is_err());
    }

    #[test]
    fn memory_blob_round_trip() {
        let repo = repo();
        let user = repo.add_user("carol", None).unwrap();
        assert!(repo.get_encrypted_memory(user.id).unwrap().is_none());
        repo.set_encrypted_memory(user.id, "enc1:abc").unwrap();
        assert_eq!(
            repo.get_encrypted_memory(user.id).unwrap().as_deref(),
            Some("enc1:abc")
        );
    }

    #[test]
    fn preferences_upsert_and_delete() {
        let repo = repo();
        let user = repo.add_user("dave", None).unwrap();
        repo.set_preference(
            user.id,
            "communication",
            "preferred_language",
            &serde_json::json!("German"),
            0.95,
        )
        .unwrap();
        repo.set_preference(
            user.id,
            "communication",
            "preferred_language",
            &serde_json::json!("French"),
            1.0,
        )
        .unwrap();

        let prefs = repo.get_preferences(user.id, Some("communication")).unwrap();
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].value, serde_json::json!("French"));

        assert!(repo
            .set_preference(user.id, "x", "y", &serde_json::json!(1), 2.0)
            .is_err());

        let removed = repo
            .delete_preference(user.id, Some("communication"), None)
            .unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get_preferences(user.id, None).unwrap().is_empty());
    }

    #[test]
    fn skills_and_trainings() {
        let repo = repo();
        let user = repo.add_user("erin", None).unwrap();
        let skill = repo.get_or_create_skill("empathy").unwrap();
        let again = repo.get_or_create_skill("empathy").unwrap();
        assert_eq!(skill.id, again.id);

        assert_eq!(repo.get_skill_level(user.id, skill.id).unwrap(), 0);
        repo.set_skill_level(user.id, skill.id, 4).unwrap();
        assert_eq!(repo.get_skill_level(user.id, skill.id).unwrap(), 4);
        assert!(repo.set_skill_level(user.id, skill.id, 11).is_err());

        repo.add_training(user.id, skill.id, TrainingStatus::Active, 0.4, None)
            .unwrap();
        let training = repo.get_training(user.id, skill.id).unwrap().unwrap();
        assert_eq!(training.status, TrainingStatus::Active);

        repo.update_training_status(user.id, skill.id, TrainingStatus::Completed, 1.0)
            .unwrap();
        let training = repo.get_training(user.id, skill.id).unwrap().unwrap();
        assert_eq!(training.status, TrainingStatus::Completed);

        let skills = repo.get_user_skills(user.id).unwrap();
        assert_eq!(skills.get("empathy"), Some(&4));
    }

    #[test]
    fn life_event_crud() {
        let repo = repo();
        let user = repo.add_user("frank", None).unwrap();
        let event = repo
            .add_life_event(
                user.id,
                &LifeEventInput {
                    title: Some("Started new job".to_string()),
                    event_type: Some("career".to_string()),
                    date: Some("2025-03-01".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(repo.get_life_event(user.id, event.id).unwrap().is_some());
        assert!(repo
            .update_life_event(
                user.id,
                event.id,
                &LifeEventInput {
                    emotional_impact: Some("positive".to_string()),
                    ..Default::default()
                }
            )
            .unwrap());
        let updated = repo.get_life_event(user.id, event.id).unwrap().unwrap();
        assert_eq!(updated.emotional_impact.as_deref(), Some("positive"));
        assert_eq!(updated.title, "Started new job");

        assert_eq!(repo.list_life_events(user.id, Some("career")).unwrap().len(), 1);
        assert!(repo.delete_life_event(user.id, event.id).unwrap());
        assert!(repo.list_life_events(user.id, None).unwrap().is_empty());

        // Missing title is a validation error, not a panic.
        assert!(repo.add_life_event(user.id, &LifeEventInput::default()).is_err());
    }

    #[test]
    fn room_messages_paginate_oldest_first() {
        let repo = repo();
        let user = repo.add_user("gail", None).unwrap();
        repo.add_room_member(7, user.id).unwrap();
        assert!(repo.is_user_in_room(user.id, 7).unwrap());
        assert!(!repo.is_user_in_room(user.id, 8).unwrap());

        for i in 0..5 {
            repo.add_room_message(7, user.id, &format!("msg {i}")).unwrap();
        }
        let page = repo.get_room_messages(7, 3, None).unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].content, "msg 2");
        assert_eq!(page[2].content, "msg 4");

        let earlier = repo.get_room_messages(7, 10, Some(page[0].id)).unwrap();
        assert_eq!(earlier.len(), 2);
        assert_eq!(earlier[0].content, "msg 0");
    }

    #[test]
    fn user_isolation_for_preferences_and_memory() {
        let repo = repo();
        let u = repo.add_user("u", None).unwrap();
        let v = repo.add_user("v", None).unwrap();

        repo.set_encrypted_memory(u.id, "enc1:u-blob").unwrap();
        repo.set_preference(u.id, "personal_info", "name", &serde_json::json!("U"), 1.0)
            .unwrap();

        assert!(repo.get_encrypted_memory(v.id).unwrap().is_none());
        assert!(repo.get_preferences(v.id, None).unwrap().is_empty());
    }
}

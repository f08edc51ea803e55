use rusqlite::{Connection, Result};

/// Initialise all tables. Safe to call on every startup — CREATE IF NOT
/// EXISTS means it's idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_users_table(conn)?;
    create_preferences_table(conn)?;
    create_skills_tables(conn)?;
    create_trainings_table(conn)?;
    create_life_events_table(conn)?;
    create_rooms_tables(conn)?;
    Ok(())
}

fn create_users_table(conn: &Connection) -> Result<()> {
    // `legacy_messages` is the pre-encryption JSON history column. It is
    // read-only compatibility: recall falls back to it when
    // `encrypted_memory` is absent, and nothing ever writes it.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            username            TEXT NOT NULL UNIQUE,
            preferred_language  TEXT,
            temperature         REAL,
            encryption_key      TEXT,
            encrypted_memory    TEXT,
            legacy_messages     TEXT,
            created_at          TEXT NOT NULL
        );",
    )
}

fn create_preferences_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_preferences (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            ptype       TEXT NOT NULL,
            key         TEXT NOT NULL,
            value       TEXT NOT NULL,  -- JSON
            confidence  REAL NOT NULL DEFAULT 1.0,
            updated_at  TEXT NOT NULL,
            UNIQUE(user_id, ptype, key)
        );
        CREATE INDEX IF NOT EXISTS idx_prefs_user
            ON user_preferences(user_id, ptype);",
    )
}

fn create_skills_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS skills (
            id    INTEGER PRIMARY KEY AUTOINCREMENT,
            name  TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS user_skills (
            user_id   INTEGER NOT NULL REFERENCES users(id),
            skill_id  INTEGER NOT NULL REFERENCES skills(id),
            level     INTEGER NOT NULL DEFAULT 0,
            UNIQUE(user_id, skill_id)
        );",
    )
}

fn create_trainings_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS trainings (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            skill_id    INTEGER NOT NULL REFERENCES skills(id),
            status      TEXT NOT NULL DEFAULT 'pending',
            progress    REAL NOT NULL DEFAULT 0,
            notes       TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            UNIQUE(user_id, skill_id)
        );",
    )
}

fn create_life_events_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS life_events (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id           INTEGER NOT NULL REFERENCES users(id),
            title             TEXT NOT NULL,
            event_type        TEXT NOT NULL DEFAULT 'other',
            date              TEXT NOT NULL,
            description       TEXT,
            emotional_impact  TEXT,
            created_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_user
            ON life_events(user_id, date);",
    )
}

fn create_rooms_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS room_members (
            room_id  INTEGER NOT NULL,
            user_id  INTEGER NOT NULL REFERENCES users(id),
            UNIQUE(room_id, user_id)
        );
        CREATE TABLE IF NOT EXISTS room_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id     INTEGER NOT NULL,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_room_msgs
            ON room_messages(room_id, id DESC);",
    )
}

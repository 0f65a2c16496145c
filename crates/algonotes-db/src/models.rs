//! Database row types. These map directly to SQLite rows; conversion into
//! the shared models happens here so callers never see raw strings.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

use algonotes_types::models::{Note, NotePayload, User};

pub struct UserRow {
    pub id: String,
    pub handle: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

pub struct NoteRow {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub use_cases: String,
    pub language: Option<String>,
    pub code: Option<String>,
    pub rank: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRow {
    pub fn into_user(self) -> Result<User> {
        Ok(User {
            id: self.id.parse().with_context(|| format!("corrupt user id '{}'", self.id))?,
            created_at: parse_timestamp(&self.created_at)?,
            handle: self.handle,
            email: self.email,
        })
    }
}

impl NoteRow {
    pub fn into_note(self) -> Result<Note> {
        Ok(Note {
            id: self.id.parse().with_context(|| format!("corrupt note id '{}'", self.id))?,
            owner_id: self
                .owner_id
                .parse()
                .with_context(|| format!("corrupt owner_id on note '{}'", self.id))?,
            rank: u32::try_from(self.rank)
                .with_context(|| format!("negative rank on note '{}'", self.id))?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            payload: NotePayload {
                name: self.name,
                category: self.category,
                description: self.description,
                use_cases: self.use_cases,
                language: self.language,
                code: self.code,
            },
        })
    }
}

/// Accepts RFC 3339 (written by us) and SQLite's `datetime('now')` format,
/// which has no timezone and is UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("corrupt timestamp '{}'", raw))
}

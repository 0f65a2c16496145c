use crate::Database;
use crate::models::{NoteRow, UserRow};
use algonotes_types::models::NotePayload;
use anyhow::{Result, bail};
use rusqlite::{Connection, ErrorCode, Row};

const NOTE_COLUMNS: &str = "id, owner_id, name, category, description, use_cases, language, code, rank, created_at, updated_at";

impl Database {
    // -- Users --

    /// Insert a user. Returns `false` when the handle or email is already
    /// taken (unique constraint), so callers can report a conflict even if
    /// two registrations race past their pre-checks.
    pub fn create_user(&self, id: &str, handle: &str, email: &str, password_hash: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let res = conn.execute(
                "INSERT INTO users (id, handle, email, password) VALUES (?1, ?2, ?3, ?4)",
                (id, handle, email, password_hash),
            );
            match res {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_handle(&self, handle: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "handle", handle))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Notes --

    /// Append a note at the end of its owner's order (rank = current count).
    pub fn insert_note(&self, id: &str, owner_id: &str, payload: &NotePayload, now: &str) -> Result<NoteRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM notes WHERE owner_id = ?1",
                [owner_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO notes (id, owner_id, name, category, description, use_cases, language, code, rank, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                rusqlite::params![
                    id,
                    owner_id,
                    payload.name,
                    payload.category,
                    payload.description,
                    payload.use_cases,
                    payload.language,
                    payload.code,
                    count,
                    now,
                ],
            )?;
            let row = query_note(&tx, owner_id, id)?
                .ok_or_else(|| anyhow::anyhow!("note {} vanished after insert", id))?;
            tx.commit()?;
            Ok(row)
        })
    }

    pub fn list_notes(&self, owner_id: &str) -> Result<Vec<NoteRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM notes WHERE owner_id = ?1 ORDER BY rank ASC",
                NOTE_COLUMNS
            ))?;
            let rows = stmt
                .query_map([owner_id], note_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_note(&self, owner_id: &str, id: &str) -> Result<Option<NoteRow>> {
        self.with_conn(|conn| query_note(conn, owner_id, id))
    }

    /// Note ids of one owner in rank order.
    pub fn note_ids(&self, owner_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| query_note_ids(conn, owner_id))
    }

    /// Replace the payload of a note, leaving its rank alone.
    /// Returns `None` if the owner has no such note.
    pub fn update_note(&self, owner_id: &str, id: &str, payload: &NotePayload, now: &str) -> Result<Option<NoteRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE notes
                 SET name = ?3, category = ?4, description = ?5, use_cases = ?6, language = ?7, code = ?8, updated_at = ?9
                 WHERE owner_id = ?1 AND id = ?2",
                rusqlite::params![
                    owner_id,
                    id,
                    payload.name,
                    payload.category,
                    payload.description,
                    payload.use_cases,
                    payload.language,
                    payload.code,
                    now,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let row = query_note(&tx, owner_id, id)?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// Delete a note and close the gap it leaves in the owner's ranks.
    /// Returns the deleted note's rank, or `None` if the owner has no such note.
    pub fn delete_note(&self, owner_id: &str, id: &str) -> Result<Option<i64>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let rank: Option<i64> = tx
                .query_row(
                    "SELECT rank FROM notes WHERE owner_id = ?1 AND id = ?2",
                    [owner_id, id],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(rank) = rank else {
                return Ok(None);
            };

            tx.execute("DELETE FROM notes WHERE owner_id = ?1 AND id = ?2", [owner_id, id])?;
            tx.execute(
                "UPDATE notes SET rank = rank - 1 WHERE owner_id = ?1 AND rank > ?2",
                rusqlite::params![owner_id, rank],
            )?;
            tx.commit()?;
            Ok(Some(rank))
        })
    }

    /// Assign rank = position for every id, in one transaction on the
    /// writer. Returns `false` and changes nothing unless `ordered_ids` lists
    /// every note of the owner exactly once.
    pub fn reorder_notes(&self, owner_id: &str, ordered_ids: &[String]) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let current = query_note_ids(&tx, owner_id)?;
            if !is_permutation(&current, ordered_ids) {
                return Ok(false);
            }
            {
                let mut stmt = tx.prepare("UPDATE notes SET rank = ?3 WHERE owner_id = ?1 AND id = ?2")?;
                for (rank, id) in ordered_ids.iter().enumerate() {
                    let changed = stmt.execute(rusqlite::params![owner_id, id, rank as i64])?;
                    if changed != 1 {
                        bail!("note {} of owner {} vanished during reorder", id, owner_id);
                    }
                }
            }
            tx.commit()?;
            Ok(true)
        })
    }
}

/// Same ids, same multiplicity. `current` never repeats an id, so this also
/// rejects duplicates in `proposed`.
fn is_permutation(current: &[String], proposed: &[String]) -> bool {
    if current.len() != proposed.len() {
        return false;
    }
    let mut current: Vec<&str> = current.iter().map(String::as_str).collect();
    let mut proposed: Vec<&str> = proposed.iter().map(String::as_str).collect();
    current.sort_unstable();
    proposed.sort_unstable();
    current == proposed
}

fn query_note_ids(conn: &Connection, owner_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM notes WHERE owner_id = ?1 ORDER BY rank ASC")?;
    let ids = stmt
        .query_map([owner_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, handle, email, password, created_at FROM users WHERE {} = ?1",
        column
    ))?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                handle: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_note(conn: &Connection, owner_id: &str, id: &str) -> Result<Option<NoteRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notes WHERE owner_id = ?1 AND id = ?2",
        NOTE_COLUMNS
    ))?;
    let row = stmt.query_row([owner_id, id], note_from_row).optional()?;
    Ok(row)
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<NoteRow> {
    Ok(NoteRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        category: row.get(3)?,
        description: row.get(4)?,
        use_cases: row.get(5)?,
        language: row.get(6)?,
        code: row.get(7)?,
        rank: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

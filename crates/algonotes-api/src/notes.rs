use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};
use uuid::Uuid;

use algonotes_db::Database;
use algonotes_db::models::NoteRow;
use algonotes_types::api::{NoteRequest, ReorderRequest};
use algonotes_types::error::{CoreError, CoreResult, ValidationError};
use algonotes_types::models::{Identity, Note, NotePayload};

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};

/// Per-user ordered note collections.
///
/// Every mutation of one owner's notes runs under that owner's lock, so
/// insert, update, delete and reorder are totally ordered per owner. Owners
/// never wait on each other here. Each mutation is also a single SQLite
/// transaction, so the dense 0..count ranks are never observed half-updated.
/// A lock entry lives only while some request holds or waits for it.
pub struct NoteStore {
    db: Arc<Database>,
    owner_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl NoteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            owner_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn list(&self, owner: Uuid) -> CoreResult<Vec<Note>> {
        let db = self.db.clone();
        run_blocking(move || {
            let rows = db.list_notes(&owner.to_string())?;
            into_notes(rows)
        })
        .await
    }

    pub async fn get(&self, owner: Uuid, id: Uuid) -> CoreResult<Note> {
        let db = self.db.clone();
        run_blocking(move || {
            let row = db
                .get_note(&owner.to_string(), &id.to_string())?
                .ok_or(CoreError::NotFound)?;
            Ok(row.into_note()?)
        })
        .await
    }

    /// Append at the end of the owner's order.
    pub async fn insert(&self, owner: Uuid, payload: NotePayload) -> CoreResult<Note> {
        let _guard = self.lock_owner(owner).await;

        let db = self.db.clone();
        let note = run_blocking(move || {
            let id = Uuid::new_v4();
            let row = db.insert_note(&id.to_string(), &owner.to_string(), &payload, &now())?;
            Ok(row.into_note()?)
        })
        .await?;

        debug!("Note {} added for {} at rank {}", note.id, owner, note.rank);
        Ok(note)
    }

    pub async fn update(&self, owner: Uuid, id: Uuid, payload: NotePayload) -> CoreResult<Note> {
        let _guard = self.lock_owner(owner).await;

        let db = self.db.clone();
        run_blocking(move || {
            let row = db
                .update_note(&owner.to_string(), &id.to_string(), &payload, &now())?
                .ok_or(CoreError::NotFound)?;
            Ok(row.into_note()?)
        })
        .await
    }

    /// Remove a note; every note ranked after it moves up by one.
    pub async fn delete(&self, owner: Uuid, id: Uuid) -> CoreResult<()> {
        let _guard = self.lock_owner(owner).await;

        let db = self.db.clone();
        let rank = run_blocking(move || {
            db.delete_note(&owner.to_string(), &id.to_string())?
                .ok_or(CoreError::NotFound)
        })
        .await?;

        debug!("Note {} of {} deleted from rank {}", id, owner, rank);
        Ok(())
    }

    /// Replace the whole order. `ordered_ids` must name every note of the
    /// owner exactly once; otherwise nothing changes. Concurrent reorders are
    /// last-writer-wins.
    pub async fn reorder(&self, owner: Uuid, ordered_ids: Vec<Uuid>) -> CoreResult<Vec<Note>> {
        let _guard = self.lock_owner(owner).await;

        let db = self.db.clone();
        let notes = run_blocking(move || {
            let owner = owner.to_string();
            let ordered: Vec<String> = ordered_ids.iter().map(Uuid::to_string).collect();
            if !db.reorder_notes(&owner, &ordered)? {
                return Err(ValidationError::BadPermutation.into());
            }
            into_notes(db.list_notes(&owner)?)
        })
        .await?;

        info!("Reordered {} notes for {}", notes.len(), owner);
        Ok(notes)
    }

    async fn lock_owner(&self, owner: Uuid) -> OwnerGuard<'_> {
        let lock = {
            let mut locks = self.locks();
            locks.entry(owner).or_default().clone()
        };
        OwnerGuard {
            store: self,
            owner,
            guard: Some(lock.lock_owned().await),
        }
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>> {
        self.owner_locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds one owner's lock. On drop, the map entry is removed once nobody
/// else holds or waits for it.
struct OwnerGuard<'a> {
    store: &'a NoteStore,
    owner: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.store.locks();
        // the map's own reference is the last one
        if locks.get(&self.owner).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.owner);
        }
    }
}

fn into_notes(rows: Vec<NoteRow>) -> CoreResult<Vec<Note>> {
    rows.into_iter()
        .map(|row| row.into_note().map_err(CoreError::from))
        .collect()
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

// -- Handlers --

pub async fn list_notes(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let notes = state.notes.list(identity.user_id).await?;
    Ok(Json(notes))
}

pub async fn get_note(
    State(state): State<AppState>,
    Path(note_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let note = state.notes.get(identity.user_id, note_id).await?;
    Ok(Json(note))
}

pub async fn create_note(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<NoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = req.into_payload()?;
    let note = state.notes.insert(identity.user_id, payload).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

pub async fn update_note(
    State(state): State<AppState>,
    Path(note_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<NoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = req.into_payload()?;
    let note = state.notes.update(identity.user_id, note_id, payload).await?;
    Ok(Json(note))
}

pub async fn delete_note(
    State(state): State<AppState>,
    Path(note_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    state.notes.delete(identity.user_id, note_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reorder_notes(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<ReorderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let notes = state.notes.reorder(identity.user_id, req.ids).await?;
    Ok(Json(notes))
}

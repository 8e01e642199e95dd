//! Per-browser session state.
//!
//! Each session owns one accepted upload, at most one listing draft, and the
//! PNG last rendered from that draft. Nothing is shared across sessions and
//! nothing outlives the process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::editor::{apply_edit, EditError};
use crate::intake::Upload;
use crate::models::{DraftEdit, ListingDraft};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found or expired, please upload the photo again")]
    NotFound,
    #[error("The photo has not been analyzed yet")]
    NoDraft,
    #[error(transparent)]
    Edit(#[from] EditError),
}

struct Session {
    upload: Arc<Upload>,
    draft: Option<ListingDraft>,
    /// PNG bytes and the draft revision they were rendered from.
    flyer: Option<(u64, Arc<Vec<u8>>)>,
    last_seen: Instant,
}

/// What the composer needs for one render.
pub struct RenderInput {
    pub upload: Arc<Upload>,
    pub draft: ListingDraft,
    pub cached_png: Option<Arc<Vec<u8>>>,
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Opens a session around an accepted upload. Idle sessions are evicted
    /// here rather than on a timer.
    pub async fn create(&self, upload: Upload) -> Uuid {
        let id = Uuid::new_v4();
        let now = Instant::now();
        let mut w = self.sessions.write().await;
        let before = w.len();
        w.retain(|_, s| now.duration_since(s.last_seen) < self.ttl);
        if w.len() < before {
            tracing::debug!(evicted = before - w.len(), "expired sessions dropped");
        }
        w.insert(
            id,
            Session {
                upload: Arc::new(upload),
                draft: None,
                flyer: None,
                last_seen: now,
            },
        );
        id
    }

    pub async fn upload(&self, id: Uuid) -> Result<Arc<Upload>, SessionError> {
        let mut w = self.sessions.write().await;
        let session = live(&mut w, id, self.ttl)?;
        Ok(session.upload.clone())
    }

    pub async fn draft(&self, id: Uuid) -> Result<ListingDraft, SessionError> {
        let mut w = self.sessions.write().await;
        let session = live(&mut w, id, self.ttl)?;
        session.draft.clone().ok_or(SessionError::NoDraft)
    }

    /// Stores a freshly described draft, replacing any previous one. The
    /// revision continues from the replaced draft so stale renders never match.
    pub async fn set_draft(&self, id: Uuid, mut draft: ListingDraft) -> Result<ListingDraft, SessionError> {
        let mut w = self.sessions.write().await;
        let session = live(&mut w, id, self.ttl)?;
        if let Some(old) = &session.draft {
            draft.revision = old.revision + 1;
        }
        session.draft = Some(draft.clone());
        session.flyer = None;
        Ok(draft)
    }

    /// Empties the draft after a failed analysis.
    pub async fn clear_draft(&self, id: Uuid) -> Result<(), SessionError> {
        let mut w = self.sessions.write().await;
        let session = live(&mut w, id, self.ttl)?;
        session.draft = None;
        session.flyer = None;
        Ok(())
    }

    pub async fn edit_draft(&self, id: Uuid, edit: DraftEdit) -> Result<ListingDraft, SessionError> {
        let mut w = self.sessions.write().await;
        let session = live(&mut w, id, self.ttl)?;
        let current = session.draft.as_ref().ok_or(SessionError::NoDraft)?;
        let next = apply_edit(current, edit)?;
        session.draft = Some(next.clone());
        session.flyer = None;
        Ok(next)
    }

    pub async fn render_input(&self, id: Uuid) -> Result<RenderInput, SessionError> {
        let mut w = self.sessions.write().await;
        let session = live(&mut w, id, self.ttl)?;
        let draft = session.draft.clone().ok_or(SessionError::NoDraft)?;
        let cached_png = session
            .flyer
            .as_ref()
            .filter(|(revision, _)| *revision == draft.revision)
            .map(|(_, png)| png.clone());
        Ok(RenderInput {
            upload: session.upload.clone(),
            draft,
            cached_png,
        })
    }

    /// Caches a render unless the draft moved on while it was being drawn.
    pub async fn store_flyer(&self, id: Uuid, revision: u64, png: Arc<Vec<u8>>) {
        let mut w = self.sessions.write().await;
        if let Some(session) = w.get_mut(&id) {
            if session.draft.as_ref().map(|d| d.revision) == Some(revision) {
                session.flyer = Some((revision, png));
            }
        }
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Looks up a session, dropping it if it has idled past the TTL, and marks
/// it as seen.
fn live(
    sessions: &mut HashMap<Uuid, Session>,
    id: Uuid,
    ttl: Duration,
) -> Result<&mut Session, SessionError> {
    let now = Instant::now();
    let expired = match sessions.get(&id) {
        Some(s) => now.duration_since(s.last_seen) >= ttl,
        None => return Err(SessionError::NotFound),
    };
    if expired {
        sessions.remove(&id);
        return Err(SessionError::NotFound);
    }
    let session = sessions.get_mut(&id).ok_or(SessionError::NotFound)?;
    session.last_seen = now;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::{accept_upload, tests::sample_png};
    use crate::models::Price;
    use serde_json::json;

    fn upload() -> Upload {
        accept_upload(&sample_png(8, 8), None, 1 << 20).unwrap()
    }

    fn draft() -> ListingDraft {
        ListingDraft {
            category: "Furniture".to_string(),
            title: "Wooden Chair".to_string(),
            description: "Solid teak.".to_string(),
            features: vec!["Solid teak".to_string()],
            price: Price::new(1200, "INR"),
            location: None,
            contact: None,
            revision: 0,
        }
    }

    #[tokio::test]
    async fn draft_lifecycle() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create(upload()).await;

        assert!(matches!(store.draft(id).await, Err(SessionError::NoDraft)));
        store.set_draft(id, draft()).await.unwrap();
        assert_eq!(store.draft(id).await.unwrap().title, "Wooden Chair");

        let edited = store
            .edit_draft(
                id,
                DraftEdit {
                    price: Some(json!("1,500")),
                    ..DraftEdit::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.price.amount, 1500);
        assert_eq!(edited.revision, 1);

        store.clear_draft(id).await.unwrap();
        assert!(matches!(store.draft(id).await, Err(SessionError::NoDraft)));
    }

    #[tokio::test]
    async fn failed_edit_leaves_draft_alone() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create(upload()).await;
        store.set_draft(id, draft()).await.unwrap();

        let result = store
            .edit_draft(
                id,
                DraftEdit {
                    title: Some("Changed".to_string()),
                    price: Some(json!("free-ish")),
                    ..DraftEdit::default()
                },
            )
            .await;
        assert!(matches!(result, Err(SessionError::Edit(_))));
        assert_eq!(store.draft(id).await.unwrap(), draft());
    }

    #[tokio::test]
    async fn flyer_cache_follows_revision() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create(upload()).await;
        store.set_draft(id, draft()).await.unwrap();

        store.store_flyer(id, 0, Arc::new(vec![1, 2, 3])).await;
        let input = store.render_input(id).await.unwrap();
        assert_eq!(input.cached_png.as_deref(), Some(&vec![1, 2, 3]));

        store
            .edit_draft(
                id,
                DraftEdit {
                    title: Some("Teak Chair".to_string()),
                    ..DraftEdit::default()
                },
            )
            .await
            .unwrap();
        let input = store.render_input(id).await.unwrap();
        assert!(input.cached_png.is_none());
        assert_eq!(input.draft.revision, 1);

        // A render of an old revision is not cached.
        store.store_flyer(id, 0, Arc::new(vec![9])).await;
        assert!(store.render_input(id).await.unwrap().cached_png.is_none());
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = SessionStore::new(Duration::from_secs(60));
        let a = store.create(upload()).await;
        let b = store.create(upload()).await;
        store.set_draft(a, draft()).await.unwrap();
        assert!(matches!(store.draft(b).await, Err(SessionError::NoDraft)));
        assert!(store.remove(a).await);
        assert!(matches!(store.draft(a).await, Err(SessionError::NotFound)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn idle_sessions_expire() {
        let store = SessionStore::new(Duration::from_millis(20));
        let id = store.create(upload()).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(store.upload(id).await, Err(SessionError::NotFound)));

        let stale = store.create(upload()).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        store.create(upload()).await;
        assert_eq!(store.len().await, 1);
        assert!(matches!(store.draft(stale).await, Err(SessionError::NotFound)));
    }
}

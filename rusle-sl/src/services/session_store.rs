//! In-memory upload sessions with expiry
//!
//! Expired sessions are evicted lazily on access and eagerly by
//! [`SessionStore::purge_expired`], which the background sweeper calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusle_common::events::{EventBus, RusleEvent};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::UploadSession;
use crate::services::aoi_resolver::ResolvedUpload;

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, UploadSession>>>,
    ttl: Duration,
    event_bus: EventBus,
}

impl SessionStore {
    pub fn new(ttl: Duration, event_bus: EventBus) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            event_bus,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn create(&self, upload: ResolvedUpload) -> UploadSession {
        let session = UploadSession {
            session_id: Uuid::new_v4(),
            filename: upload.aoi.source().upload_filename().map(str::to_string),
            feature_count: upload.feature_count,
            declared_crs: upload.declared_crs,
            aoi: Arc::new(upload.aoi),
            created_at: Utc::now(),
            ttl: self.ttl,
        };

        self.sessions
            .write()
            .await
            .insert(session.session_id, session.clone());

        info!(
            session_id = %session.session_id,
            area_km2 = session.aoi.area_km2(),
            features = session.feature_count,
            "Upload session created"
        );
        self.event_bus.emit_lossy(RusleEvent::SessionCreated {
            session_id: session.session_id,
            area_km2: session.aoi.area_km2(),
            timestamp: session.created_at,
        });

        session
    }

    /// Live session, or `None` if unknown or expired
    pub async fn get(&self, session_id: Uuid) -> Option<UploadSession> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(&session_id) {
                Some(session) if !session.is_expired(now) => return Some(session.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Re-check under the write lock, the sweeper may have raced us
        let mut sessions = self.sessions.write().await;
        if sessions.get(&session_id).is_some_and(|s| s.is_expired(now)) {
            sessions.remove(&session_id);
            drop(sessions);
            debug!(session_id = %session_id, "Evicted expired session on access");
            self.emit_removed(session_id, true);
        }
        None
    }

    /// Returns true if the session existed
    pub async fn remove(&self, session_id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&session_id).is_some();
        if removed {
            info!(session_id = %session_id, "Upload session removed");
            self.emit_removed(session_id, false);
        }
        removed
    }

    /// Evict every expired session. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<Uuid> = {
            let mut sessions = self.sessions.write().await;
            let expired: Vec<Uuid> = sessions
                .values()
                .filter(|s| s.is_expired(now))
                .map(|s| s.session_id)
                .collect();
            for id in &expired {
                sessions.remove(id);
            }
            expired
        };

        for id in &expired {
            self.emit_removed(*id, true);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Purged expired upload sessions");
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    fn emit_removed(&self, session_id: Uuid, expired: bool) {
        self.event_bus.emit_lossy(RusleEvent::SessionRemoved {
            session_id,
            expired,
            timestamp: Utc::now(),
        });
    }
}

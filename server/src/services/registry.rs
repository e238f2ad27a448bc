//! Room registry: room code to live `RoomHandle`.
//!
//! DESIGN
//! ======
//! The map only holds handles; all board state lives inside the room actors.
//! A handle whose actor has stopped (an evicted hostless room) is treated as
//! absent and replaced on the next `get_or_open`.

use std::collections::HashMap;
use std::sync::Arc;

use actions::Renderer;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::renderer::TracingRenderer;
use crate::services::room::{RoomHandle, RoomOptions, RoomSnapshot, spawn_room};

const ROOM_CODE_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid room code {0:?}")]
    InvalidCode(String),
}

impl frames::ErrorCode for RegistryError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCode(_) => "E_INVALID_ROOM",
        }
    }
}

#[derive(Clone)]
pub struct RoomRegistry {
    config: Arc<RelayConfig>,
    rooms: Arc<RwLock<HashMap<String, RoomHandle>>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new(config: Arc<RelayConfig>) -> Self {
        Self { config, rooms: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Open the room this process hosts, with the host registered under
    /// `host_name` and `renderer` as its local consumer. Replaces any
    /// existing room with the same code.
    pub async fn open_hosted(&self, code: &str, host_name: &str, renderer: Box<dyn Renderer>) -> RoomHandle {
        let handle = spawn_room(self.options(code, Some(host_name)), renderer);
        self.rooms.write().await.insert(code.to_owned(), handle.clone());
        info!(room = %code, host = %host_name, "registry: hosted room opened");
        handle
    }

    /// Live handle for `code`, opening a hostless room if there is none.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidCode`] for codes that are not valid room codes.
    pub async fn get_or_open(&self, code: &str) -> Result<RoomHandle, RegistryError> {
        if !frames::is_valid_room_code(code) {
            return Err(RegistryError::InvalidCode(code.to_owned()));
        }
        if let Some(handle) = self.get(code).await {
            return Ok(handle);
        }

        let mut rooms = self.rooms.write().await;
        if let Some(handle) = rooms.get(code).filter(|h| !h.is_closed()) {
            return Ok(handle.clone());
        }
        let handle = spawn_room(self.options(code, None), Box::new(TracingRenderer::new(code)));
        rooms.insert(code.to_owned(), handle.clone());
        info!(room = %code, "registry: room opened");
        Ok(handle)
    }

    /// Create a hostless room under a fresh 8-character code.
    pub async fn create(&self) -> RoomHandle {
        let mut rooms = self.rooms.write().await;
        let code = loop {
            let code = new_room_code();
            if rooms.get(&code).is_none_or(RoomHandle::is_closed) {
                break code;
            }
        };
        let handle = spawn_room(self.options(&code, None), Box::new(TracingRenderer::new(&code)));
        rooms.insert(code.clone(), handle.clone());
        info!(room = %code, "registry: room created");
        handle
    }

    /// Live handle for `code`, if any.
    pub async fn get(&self, code: &str) -> Option<RoomHandle> {
        let rooms = self.rooms.read().await;
        rooms.get(code).filter(|h| !h.is_closed()).cloned()
    }

    /// Snapshots of every live room, sorted by code. Stopped rooms are pruned.
    pub async fn list(&self) -> Vec<RoomSnapshot> {
        let handles: Vec<RoomHandle> = {
            let mut rooms = self.rooms.write().await;
            rooms.retain(|_, h| !h.is_closed());
            rooms.values().cloned().collect()
        };

        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(snapshot) = handle.snapshot().await {
                snapshots.push(snapshot);
            }
        }
        snapshots.sort_by(|a, b| a.code.cmp(&b.code));
        snapshots
    }

    fn options(&self, code: &str, host_name: Option<&str>) -> RoomOptions {
        RoomOptions {
            code: code.to_owned(),
            host_name: host_name.map(str::to_owned),
            replay_on_join: self.config.replay_on_join,
            evict_when_empty: true,
            queue: self.config.room_queue,
        }
    }
}

/// Eight upper-case hex characters taken from a v4 UUID.
fn new_room_code() -> String {
    Uuid::new_v4().simple().to_string()[..ROOM_CODE_LEN].to_ascii_uppercase()
}

//! Pages (windows) the worker knows about and whether it controls them.

use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::Mutex;

/// Maximum number of clients tracked.
/// Oldest entries are dropped first; a long-running proxy sees many page loads.
const MAX_CLIENTS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ClientId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub id: ClientId,
    pub url: String,
    pub controlled: bool,
}

#[derive(Debug, Default)]
struct ClientsInner {
    next_id: u64,
    clients: VecDeque<ClientInfo>,
    claimed: bool,
}

#[derive(Debug, Default)]
pub struct Clients {
    inner: Mutex<ClientsInner>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a window at `url`, reusing the entry if one is already open
    /// there. Windows opened after `claim` start out controlled.
    pub async fn register(&self, url: &str) -> ClientId {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.clients.iter().find(|c| c.url == url) {
            return existing.id;
        }
        if inner.clients.len() >= MAX_CLIENTS {
            inner.clients.pop_front();
        }
        inner.next_id += 1;
        let id = ClientId(inner.next_id);
        let controlled = inner.claimed;
        inner.clients.push_back(ClientInfo {
            id,
            url: url.to_string(),
            controlled,
        });
        id
    }

    /// Take control of every known window. Returns how many changed hands.
    pub async fn claim(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.claimed = true;
        let mut claimed = 0;
        for client in inner.clients.iter_mut().filter(|c| !c.controlled) {
            client.controlled = true;
            claimed += 1;
        }
        claimed
    }

    pub async fn find(&self, url: &str) -> Option<ClientId> {
        let inner = self.inner.lock().await;
        inner.clients.iter().find(|c| c.url == url).map(|c| c.id)
    }

    pub async fn list(&self) -> Vec<ClientInfo> {
        self.inner.lock().await.clients.iter().cloned().collect()
    }
}

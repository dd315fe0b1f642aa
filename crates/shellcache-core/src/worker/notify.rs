//! Background sync and push notification handling.
//!
//! Both are stubs: sync has no deferred-work queue behind it, and push only
//! shows a fixed notification.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::clients::ClientId;

/// The only sync tag pages register.
pub const SYNC_TAG: &str = "sync-data";

const NOTIFICATION_TITLE: &str = "Skanda Billing";
const DEFAULT_NOTIFICATION_BODY: &str = "New update available";
const NOTIFICATION_ICON: &str = "/static/icons/icon-192x192.png";
const NOTIFICATION_BADGE: &str = "/static/icons/icon-72x72.png";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Completed,
    Ignored,
}

/// Resolve a sync event. Nothing is queued, so there is nothing to replay.
pub fn handle_sync(tag: &str) -> SyncOutcome {
    if tag == SYNC_TAG {
        info!(tag, "Background sync completed");
        SyncOutcome::Completed
    } else {
        debug!(tag, "Ignoring unknown sync tag");
        SyncOutcome::Ignored
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
}

impl Notification {
    /// Build the notification for a push. Blank payloads get the default body.
    pub fn from_push(payload: Option<&str>) -> Self {
        let body = payload
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .unwrap_or(DEFAULT_NOTIFICATION_BODY);
        Self {
            title: NOTIFICATION_TITLE.to_string(),
            body: body.to_string(),
            icon: NOTIFICATION_ICON.to_string(),
            badge: NOTIFICATION_BADGE.to_string(),
            vibrate: vec![100, 50, 100],
        }
    }
}

/// What to do with the windows when a notification is clicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    Focus { client: ClientId, url: String },
    OpenWindow { url: String },
}

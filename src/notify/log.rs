use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use super::{AlertPayload, AlertType};
use crate::model::new_id;

/// Entries kept before the oldest are dropped.
pub const MAX_ENTRIES: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub device_id: String,
    pub device_name: String,
    pub ip_address: String,
    pub alert_type: AlertType,
    pub message: String,
    pub timestamp: String,
    pub read: bool,
}

/// In-memory alert history, newest first.
#[derive(Default)]
pub struct NotificationLog {
    entries: Mutex<VecDeque<Notification>>,
}

impl NotificationLog {
    fn entries(&self) -> MutexGuard<'_, VecDeque<Notification>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, device_id: &str, payload: &AlertPayload) -> Notification {
        let entry = Notification {
            id: new_id(),
            device_id: device_id.to_string(),
            device_name: payload.device_name.clone(),
            ip_address: payload.ip_address.clone(),
            alert_type: payload.alert_type,
            message: payload.message.clone(),
            timestamp: payload.timestamp.clone(),
            read: false,
        };
        let mut entries = self.entries();
        entries.push_front(entry.clone());
        entries.truncate(MAX_ENTRIES);
        entry
    }

    pub fn list(&self) -> Vec<Notification> {
        self.entries().iter().cloned().collect()
    }

    pub fn unread(&self) -> usize {
        self.entries().iter().filter(|n| !n.read).count()
    }

    /// Mark the given entries read, or all of them when `ids` is `None`.
    /// Returns how many changed.
    pub fn mark_read(&self, ids: Option<&[String]>) -> usize {
        let mut changed = 0;
        for entry in self.entries().iter_mut() {
            let selected = ids.is_none_or(|ids| ids.contains(&entry.id));
            if selected && !entry.read {
                entry.read = true;
                changed += 1;
            }
        }
        changed
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}

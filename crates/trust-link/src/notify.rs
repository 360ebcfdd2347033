//! User-facing notifications.
//!
//! Notifications carry a stable key. A sink shows at most one notification
//! per key, so repeated failures for the same controller replace each other
//! instead of stacking.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use smol_str::SmolStr;
use tracing::{error, info, warn};

use crate::registry::ControllerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub key: SmolStr,
    pub level: NotificationLevel,
    pub title: SmolStr,
    pub message: String,
    /// Persistent notifications stay until replaced or dismissed.
    pub persistent: bool,
}

impl Notification {
    fn new(
        key: impl Into<SmolStr>,
        level: NotificationLevel,
        title: impl Into<SmolStr>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            level,
            title: title.into(),
            message: message.into(),
            persistent: false,
        }
    }

    pub fn info(
        key: impl Into<SmolStr>,
        title: impl Into<SmolStr>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(key, NotificationLevel::Info, title, message)
    }

    pub fn success(
        key: impl Into<SmolStr>,
        title: impl Into<SmolStr>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(key, NotificationLevel::Success, title, message)
    }

    pub fn warning(
        key: impl Into<SmolStr>,
        title: impl Into<SmolStr>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(key, NotificationLevel::Warning, title, message)
    }

    pub fn error(
        key: impl Into<SmolStr>,
        title: impl Into<SmolStr>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(key, NotificationLevel::Error, title, message)
    }

    #[must_use]
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

/// Key shared by every connection notification of one controller.
#[must_use]
pub fn controller_key(id: &ControllerId) -> SmolStr {
    SmolStr::from(format!("controller:{id}"))
}

/// Key for inbound-message problems of one controller.
#[must_use]
pub fn message_key(id: &ControllerId) -> SmolStr {
    SmolStr::from(format!("message:{id}"))
}

/// Key for references to unregistered controllers.
#[must_use]
pub fn unknown_key(id: &str) -> SmolStr {
    SmolStr::from(format!("unknown:{id}"))
}

/// Key for subscription notices.
pub const SUBSCRIPTION_KEY: &str = "subscription";

/// Destination for user-facing notifications.
pub trait Notifier: Send + Sync {
    /// Show `notification`, replacing any notification with the same key.
    fn notify(&self, notification: Notification);

    /// Remove the notification with `key`, if shown.
    fn dismiss(&self, _key: &str) {}
}

/// Logs notifications instead of displaying them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let Notification {
            key,
            level,
            title,
            message,
            ..
        } = notification;
        match level {
            NotificationLevel::Info | NotificationLevel::Success => {
                info!(%key, %title, "{message}");
            }
            NotificationLevel::Warning => warn!(%key, %title, "{message}"),
            NotificationLevel::Error => error!(%key, %title, "{message}"),
        }
    }
}

#[derive(Debug, Default)]
struct CenterState {
    active: IndexMap<SmolStr, Notification>,
    history: Vec<Notification>,
}

/// Replace-in-place notification store.
///
/// Clones share the same store, so one clone can be handed to the hub while
/// another is read by the UI.
#[derive(Debug, Clone, Default)]
pub struct NotificationCenter {
    inner: Arc<Mutex<CenterState>>,
}

impl NotificationCenter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently shown notifications, oldest key first.
    #[must_use]
    pub fn active(&self) -> Vec<Notification> {
        self.inner.lock().active.values().cloned().collect()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Notification> {
        self.inner.lock().active.get(key).cloned()
    }

    /// Every notification ever raised, in order.
    #[must_use]
    pub fn history(&self) -> Vec<Notification> {
        self.inner.lock().history.clone()
    }

    /// How many notifications were raised under `key`.
    #[must_use]
    pub fn raised_for(&self, key: &str) -> usize {
        self.inner
            .lock()
            .history
            .iter()
            .filter(|notification| notification.key == key)
            .count()
    }

    #[must_use]
    pub fn raised(&self) -> usize {
        self.inner.lock().history.len()
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.active.clear();
        state.history.clear();
    }
}

impl Notifier for NotificationCenter {
    fn notify(&self, notification: Notification) {
        let mut state = self.inner.lock();
        state.history.push(notification.clone());
        state.active.insert(notification.key.clone(), notification);
    }

    fn dismiss(&self, key: &str) {
        self.inner.lock().active.shift_remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_replaces_in_place() {
        let center = NotificationCenter::new();
        let key = controller_key(&ControllerId::from("A"));
        center.notify(Notification::error(key.clone(), "A", "timed out").persistent());
        center.notify(Notification::info("other", "B", "hello"));
        center.notify(Notification::error(key.clone(), "A", "refused").persistent());

        let active = center.active();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].message, "refused");
        assert!(active[0].persistent);
        assert_eq!(center.raised_for(&key), 2);
        assert_eq!(center.raised(), 3);
    }

    #[test]
    fn dismiss_removes_only_active_entry() {
        let center = NotificationCenter::new();
        center.notify(Notification::warning(SUBSCRIPTION_KEY, "Watch", "nothing connected"));
        center.dismiss(SUBSCRIPTION_KEY);
        assert!(center.get(SUBSCRIPTION_KEY).is_none());
        assert_eq!(center.raised_for(SUBSCRIPTION_KEY), 1);
    }

    #[test]
    fn keys_are_namespaced() {
        let id = ControllerId::from("plc-1");
        assert_eq!(controller_key(&id), "controller:plc-1");
        assert_eq!(message_key(&id), "message:plc-1");
        assert_eq!(unknown_key("x"), "unknown:x");
    }
}

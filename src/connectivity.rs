use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Transition {
    WentOnline,
    WentOffline,
}

/// Online/offline state with edge-only change notification.
pub struct ConnectivityMonitor {
    online: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (online, _) = watch::channel(initially_online);
        Self { online }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Records a platform signal. Repeating the current state is not a transition.
    pub fn set_online(&self, online: bool) -> Option<Transition> {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if !changed {
            return None;
        }
        let transition = if online {
            Transition::WentOnline
        } else {
            Transition::WentOffline
        };
        tracing::info!(?transition, "connectivity changed");
        Some(transition)
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

//! Presence surface: online/offline notifications.

use std::sync::Arc;

use duet_core::{ConnectionId, PresenceRegistry, UserName};
use duet_proto::Payload;

use crate::notifier::Notifier;

/// Tracks presence connections and announces transitions.
///
/// Only a user's first connection announces `UserIsOnline`, and only their
/// last disconnect announces `UserIsOffline`. Every new presence connection
/// receives the current online list.
pub struct PresenceHub<N> {
    registry: Arc<PresenceRegistry>,
    notifier: N,
}

impl<N: Notifier> PresenceHub<N> {
    /// Create a presence hub over a shared registry.
    pub fn new(registry: Arc<PresenceRegistry>, notifier: N) -> Self {
        Self { registry, notifier }
    }

    /// Shared registry, also read by the message hub.
    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.registry
    }

    /// Register a presence connection.
    ///
    /// Returns `true` if the user came online with this connection.
    pub fn connect(&self, user: &UserName, connection_id: ConnectionId) -> bool {
        let came_online = self.registry.add_connection(user, connection_id);

        if came_online {
            let others = self
                .registry
                .all_connections()
                .into_iter()
                .filter_map(|(_, id)| (id != connection_id).then_some(id));
            let delivered = self.notifier.push_all(others, &Payload::UserIsOnline(user.to_string()));
            tracing::info!(user = %user, delivered, "user online");
        }

        let online = self.registry.online_users().iter().map(ToString::to_string).collect();
        if let Err(e) = self.notifier.push(connection_id, &Payload::GetOnlineUsers(online)) {
            tracing::debug!(connection = %connection_id, "online list dropped: {e}");
        }

        came_online
    }

    /// Remove a presence connection.
    ///
    /// Returns `true` if the user went offline with this connection.
    pub fn disconnect(&self, user: &UserName, connection_id: ConnectionId) -> bool {
        let went_offline = self.registry.remove_connection(user, connection_id);

        if went_offline {
            let everyone = self.registry.all_connections().into_iter().map(|(_, id)| id);
            let delivered =
                self.notifier.push_all(everyone, &Payload::UserIsOffline(user.to_string()));
            tracing::info!(user = %user, delivered, "user offline");
        }

        went_offline
    }
}

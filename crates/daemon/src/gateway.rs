// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notification gateway: routes grant pushes to subscribed connections

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use dlock_core::{Grant, GrantNotifier};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::{Push, ServerFrame};

/// Outbound frame queue of one connection
pub type FrameSender = mpsc::UnboundedSender<ServerFrame>;
pub type FrameReceiver = mpsc::UnboundedReceiver<ServerFrame>;

/// Identifies one accepted client connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Default)]
struct Routes {
    connections: HashMap<ConnectionId, FrameSender>,
    /// Token → connections subscribed to its grant
    groups: HashMap<String, HashSet<ConnectionId>>,
    /// Connection → tokens it subscribed to, for cleanup on disconnect
    by_connection: HashMap<ConnectionId, HashSet<String>>,
}

impl Routes {
    fn drop_membership(&mut self, conn: ConnectionId, token: &str) {
        if let Some(members) = self.groups.get_mut(token) {
            members.remove(&conn);
            if members.is_empty() {
                self.groups.remove(token);
            }
        }
        if let Some(tokens) = self.by_connection.get_mut(&conn) {
            tokens.remove(token);
        }
    }
}

/// Delivers `NotifyLockAcquired` pushes addressed by token
///
/// Clones share the same routing table.
#[derive(Clone, Default)]
pub struct NotificationGateway {
    routes: Arc<RwLock<Routes>>,
}

impl NotificationGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound queue
    pub fn connect(&self, conn: ConnectionId, sender: FrameSender) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.connections.insert(conn, sender);
        routes.by_connection.entry(conn).or_default();
    }

    /// Forget a connection and all of its subscriptions
    ///
    /// Returns the number of tokens that were still awaiting a grant.
    pub fn disconnect(&self, conn: ConnectionId) -> usize {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.connections.remove(&conn);
        let tokens = routes.by_connection.remove(&conn).unwrap_or_default();
        for token in &tokens {
            if let Some(members) = routes.groups.get_mut(token) {
                members.remove(&conn);
                if members.is_empty() {
                    routes.groups.remove(token);
                }
            }
        }
        tokens.len()
    }

    /// Route `token`'s grant to `conn`
    ///
    /// True when this call added the membership; false when it already
    /// existed or the connection is unknown.
    pub fn subscribe(&self, conn: ConnectionId, token: &str) -> bool {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        if !routes.connections.contains_key(&conn) {
            debug!(%conn, token, "subscribe from unknown connection ignored");
            return false;
        }
        routes
            .by_connection
            .entry(conn)
            .or_default()
            .insert(token.to_string());
        routes
            .groups
            .entry(token.to_string())
            .or_default()
            .insert(conn)
    }

    pub fn unsubscribe(&self, conn: ConnectionId, token: &str) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.drop_membership(conn, token);
    }

    /// Push a grant to every connection subscribed under its token
    ///
    /// The token's group is dissolved afterwards, since a token is granted
    /// at most once. Returns how many connections accepted the push.
    pub fn deliver(&self, resource: &str, token: &str) -> usize {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        let members = routes.groups.remove(token).unwrap_or_default();

        let mut delivered = 0;
        for conn in members {
            if let Some(tokens) = routes.by_connection.get_mut(&conn) {
                tokens.remove(token);
            }
            let Some(sender) = routes.connections.get(&conn) else {
                continue;
            };
            let push = ServerFrame::Push(Push::NotifyLockAcquired {
                resource: resource.to_string(),
                token: token.to_string(),
            });
            if sender.send(push).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .connections
            .len()
    }

    /// Number of tokens with at least one subscriber
    pub fn subscription_count(&self) -> usize {
        self.routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .groups
            .len()
    }

    pub fn is_subscribed(&self, conn: ConnectionId, token: &str) -> bool {
        self.routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .groups
            .get(token)
            .is_some_and(|members| members.contains(&conn))
    }
}

impl GrantNotifier for NotificationGateway {
    fn notify(&self, grant: Grant) {
        let delivered = self.deliver(&grant.resource, &grant.token);
        if delivered == 0 {
            warn!(
                resource = %grant.resource,
                token = %grant.token,
                requester = %grant.requester,
                "lock granted but no subscriber received the notification"
            );
        } else {
            debug!(
                resource = %grant.resource,
                token = %grant.token,
                delivered,
                "grant notification pushed"
            );
        }
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;

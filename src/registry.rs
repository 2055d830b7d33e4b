//! All registered connectors, their shared lifecycle and the text commands
//! a chat front-end forwards to them.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::error;
use log::info;
use log::warn;

use crate::connector::Connector;
use crate::entity::ConnectorKind;

pub struct ConnectorRegistry {
    connectors: BTreeMap<ConnectorKind, Arc<Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            connectors: BTreeMap::new(),
        }
    }

    /// Adds `connector`, replacing any earlier one of the same kind.
    pub fn register(&mut self, connector: Arc<Connector>) {
        let kind = connector.kind();
        if self.connectors.insert(kind, connector).is_some() {
            warn!("Replaced already registered {kind} connector");
        } else {
            info!("Registered {kind} connector");
        }
    }

    pub fn get(&self, kind: ConnectorKind) -> Option<&Arc<Connector>> {
        self.connectors.get(&kind)
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<Connector>> {
        self.connectors.values()
    }

    /// Initializes every connector. Returns how many succeeded; failures are logged.
    pub async fn init_all(&self) -> usize {
        let mut ok = 0;
        for (kind, connector) in &self.connectors {
            match connector.init().await {
                Ok(()) => ok += 1,
                Err(e) => error!("Failed to initialize {kind} connector: {e}"),
            }
        }
        info!("Initialized {ok}/{} connectors", self.connectors.len());
        ok
    }

    pub async fn start_all(&self) -> usize {
        let mut started = 0;
        for connector in self.connectors.values() {
            if connector.start().await {
                started += 1;
            }
        }
        info!("Started {started} connectors");
        started
    }

    pub async fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for connector in self.connectors.values() {
            if connector.stop().await {
                stopped += 1;
            }
        }
        info!("Stopped {stopped} connectors");
        stopped
    }

    fn resolve(&self, kind: &str) -> Result<&Arc<Connector>, String> {
        let parsed: ConnectorKind = kind.parse().map_err(|_| {
            format!(
                "❌ Unknown source `{kind}`. Available: {}",
                self.available().join(", ")
            )
        })?;
        self.get(parsed)
            .ok_or_else(|| format!("❌ Source `{parsed}` is not enabled."))
    }

    fn available(&self) -> Vec<&'static str> {
        self.connectors.keys().map(|k| k.as_str()).collect()
    }

    /// Handles `/add<kind> <target> [name...]` and returns the reply text.
    pub async fn handle_add_command(&self, kind: &str, user_id: i64, args: &[&str]) -> String {
        let connector = match self.resolve(kind) {
            Ok(c) => c,
            Err(reply) => return reply,
        };
        let Some((target, name)) = args.split_first() else {
            return format!("⚠️ Usage: /add{kind} <target> [name]");
        };
        let name = name.join(" ");
        let name = Some(name.as_str()).filter(|n| !n.trim().is_empty());

        match connector.add_subscription(user_id, target, name).await {
            Ok(sub) => format!(
                "✅ Subscribed to {}: {}",
                connector.info().name,
                sub.label()
            ),
            Err(e) => {
                warn!("User {user_id} failed to subscribe to {kind} {target}: {e}");
                format!("❌ Failed to subscribe: {e}")
            }
        }
    }

    /// Handles `/remove<kind> <target>`.
    pub async fn handle_remove_command(&self, kind: &str, user_id: i64, args: &[&str]) -> String {
        let connector = match self.resolve(kind) {
            Ok(c) => c,
            Err(reply) => return reply,
        };
        let Some(target) = args.first() else {
            return format!("⚠️ Usage: /remove{kind} <target>");
        };

        match connector.remove_subscription(user_id, target).await {
            Ok(true) => format!("✅ Unsubscribed from {}: {target}", connector.info().name),
            Ok(false) => format!("ℹ️ You are not subscribed to {target}."),
            Err(e) => {
                error!("User {user_id} failed to unsubscribe from {kind} {target}: {e}");
                format!("❌ Failed to unsubscribe: {e}")
            }
        }
    }

    /// Handles `/list<kind>`.
    pub async fn handle_list_command(&self, kind: &str, user_id: i64) -> String {
        let connector = match self.resolve(kind) {
            Ok(c) => c,
            Err(reply) => return reply,
        };

        match connector.list_subscriptions(user_id).await {
            Ok(subs) if subs.is_empty() => {
                format!("📭 No {} subscriptions yet.", connector.info().name)
            }
            Ok(subs) => {
                let lines: Vec<String> = subs
                    .iter()
                    .enumerate()
                    .map(|(i, sub)| match &sub.display_name {
                        Some(name) if !name.is_empty() => {
                            format!("{}. {name} ({})", i + 1, sub.target_id)
                        }
                        _ => format!("{}. {}", i + 1, sub.target_id),
                    })
                    .collect();
                format!(
                    "📋 {} subscriptions:\n{}",
                    connector.info().name,
                    lines.join("\n")
                )
            }
            Err(e) => {
                error!("Failed to list {kind} subscriptions of user {user_id}: {e}");
                format!("❌ Failed to list subscriptions: {e}")
            }
        }
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! This module keeps track of the open matches.
//! It provides:
//! - [`SessionRegistry`]: Creates matches, finds them by id and forgets them once they close
//! - [`AppState`]: Global state shared by all connections and routes

use crate::config::ServerConfig;
use crate::error::GameError;
use crate::id::random_id;
use crate::match_actor::{self, CHANNEL_BUFFER_SIZE, MatchHandle};
use crate::match_state::{ConnectionId, Match, MatchSummary};
use protocol::Rules;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

/// The registry of all open matches.
pub struct SessionRegistry {
    /// The open matches by id.
    matches: Mutex<HashMap<String, MatchHandle>>,
    /// The rules of matches that are created without their own.
    default_rules: Rules,
    /// How long a running game survives without connections.
    grace_period: Duration,
}

impl SessionRegistry {
    pub fn new(default_rules: Rules, grace_period: Duration) -> Self {
        SessionRegistry {
            matches: Mutex::new(HashMap::new()),
            default_rules,
            grace_period,
        }
    }

    /// Opens a new match in the preparing stage. The match removes itself from the registry
    /// once it closes, before the detach that closed it returns.
    pub async fn create_match(self: &Arc<Self>, rules: Option<Rules>) -> MatchHandle {
        let id = random_id();
        let (sender, receiver) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let handle = MatchHandle::new(&id, sender);
        let state = Match::new(
            id.clone(),
            rules.unwrap_or(self.default_rules),
            self.grace_period,
        );

        self.matches.lock().await.insert(id.clone(), handle.clone());
        tracing::info!(match_id = %id, "created new match");

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let pending = match_actor::run(state, receiver).await;
            if let Err(error) = registry.close_match(&id).await {
                tracing::error!(%error, "closed match was not registered");
            }
            if let Some(reply) = pending {
                let _ = reply.send(());
            }
        });
        handle
    }

    pub async fn find_match(&self, id: &str) -> Result<MatchHandle, GameError> {
        self.matches
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| GameError::NotFound(id.to_string()))
    }

    /// Forgets a match. Only ever triggered by the match itself when it closes.
    pub async fn close_match(&self, id: &str) -> Result<(), GameError> {
        tracing::info!(match_id = %id, "closing match");
        match self.matches.lock().await.remove(id) {
            Some(_) => Ok(()),
            None => Err(GameError::NotFound(id.to_string())),
        }
    }

    pub async fn match_count(&self) -> usize {
        self.matches.lock().await.len()
    }

    /// Removes matches whose actor is gone. This is a fallback, matches normally deregister
    /// themselves.
    pub async fn prune_closed(&self) -> usize {
        let mut matches = self.matches.lock().await;
        let before = matches.len();
        matches.retain(|id, handle| {
            let is_alive = !handle.is_closed();
            if !is_alive {
                tracing::info!(match_id = %id, "removing dead match");
            }
            is_alive
        });
        before - matches.len()
    }

    /// Summaries of all open matches, sorted by id.
    pub async fn describe(&self) -> Vec<MatchSummary> {
        // Collect the handles first, the actors must not be awaited under the lock.
        let handles: Vec<MatchHandle> = self.matches.lock().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(summary) = handle.describe().await {
                summaries.push(summary);
            }
        }
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }
}

/// The application state.
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub config: ServerConfig,
    /// The source of connection ids.
    next_connection: AtomicU64,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let registry = SessionRegistry::new(config.default_rules, config.grace_period());
        AppState {
            registry: Arc::new(registry),
            config,
            next_connection: AtomicU64::new(1),
        }
    }

    /// Hands out a process wide unique connection id.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection.fetch_add(1, Ordering::Relaxed)
    }
}

//! In-memory view of which servers are running, as which process

use crate::models::ProcessMapping;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lifecycle state of one logical server as seen by the sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerState {
    pub id: u32,
    pub running: bool,
    pub pid: Option<u32>,
}

/// Read access to the server lifecycle bookkeeping
pub trait ServerRegistry: Send + Sync {
    /// Every known server, in ID order
    fn servers(&self) -> Vec<ServerState>;
}

/// Registry of known servers keyed by ID
#[derive(Debug, Default)]
pub struct ServerTable {
    servers: DashMap<u32, ServerState>,
}

impl ServerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every ID registered as stopped
    pub fn with_servers(ids: impl IntoIterator<Item = u32>) -> Self {
        let table = Self::new();
        for id in ids {
            table.register(id);
        }
        table
    }

    pub fn register(&self, id: u32) {
        self.servers.entry(id).or_insert(ServerState {
            id,
            running: false,
            pid: None,
        });
    }

    pub fn unregister(&self, id: u32) -> Option<ServerState> {
        self.servers.remove(&id).map(|(_, v)| v)
    }

    pub fn mark_running(&self, id: u32, pid: u32) {
        debug!(server_id = id, pid = pid, "Server marked running");
        self.servers.insert(
            id,
            ServerState {
                id,
                running: true,
                pid: Some(pid),
            },
        );
    }

    pub fn mark_stopped(&self, id: u32) {
        if let Some(mut entry) = self.servers.get_mut(&id) {
            debug!(server_id = id, "Server marked stopped");
            entry.running = false;
            entry.pid = None;
        }
    }

    /// Adopt reconciled processes for known servers that are not already
    /// tracked as running. Returns the number of servers adopted.
    pub fn apply_mapping(&self, mapping: &ProcessMapping) -> usize {
        let mut adopted = 0;
        for (id, pid) in mapping.iter() {
            let Some(mut entry) = self.servers.get_mut(&id) else {
                continue;
            };
            if entry.running && entry.pid.is_some() {
                continue;
            }
            entry.running = true;
            entry.pid = Some(pid);
            adopted += 1;
        }
        adopted
    }

    pub fn get(&self, id: u32) -> Option<ServerState> {
        self.servers.get(&id).map(|r| *r)
    }

    pub fn list(&self) -> Vec<ServerState> {
        let mut servers: Vec<ServerState> = self.servers.iter().map(|r| *r.value()).collect();
        servers.sort_by_key(|s| s.id);
        servers
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl ServerRegistry for ServerTable {
    fn servers(&self) -> Vec<ServerState> {
        self.list()
    }
}

//! Clients API: the pages a worker can control.

use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

use crate::worker::ServiceWorkerId;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
}

/// A client (open page or worker).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Worker currently controlling this client.
    pub controller: Option<ServiceWorkerId>,
}

impl Client {
    /// A new, uncontrolled window client.
    pub fn window(url: Url) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed)),
            url,
            client_type: ClientType::Window,
            controller: None,
        }
    }
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Clients on `origin`, optionally including ones another worker (or
    /// none) controls.
    pub fn match_all(
        &self,
        origin: &Url,
        include_uncontrolled: bool,
        by: ServiceWorkerId,
    ) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| c.url.origin() == origin.origin())
            .filter(|c| include_uncontrolled || c.controller == Some(by))
            .collect()
    }

    /// Make `worker` the controller of every client on `origin`.
    /// Returns how many clients changed controller.
    pub fn claim(&mut self, origin: &Url, worker: ServiceWorkerId) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.url.origin() == origin.origin() && client.controller != Some(worker) {
                client.controller = Some(worker);
                claimed += 1;
            }
        }
        claimed
    }
}

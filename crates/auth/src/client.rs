use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use promptq_core::ClientId;

/// A registered API client.
///
/// Administration of clients lives outside this system; records are loaded
/// once at startup and only read afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub client_id: ClientId,
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Argon2 PHC string over `api_key || pepper`.
    pub api_key_hash: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn enabled_by_default() -> bool {
    true
}

/// Read-only lookup of clients by id.
#[derive(Debug, Clone, Default)]
pub struct ClientDirectory {
    clients: HashMap<ClientId, Client>,
}

impl ClientDirectory {
    pub fn new(clients: impl IntoIterator<Item = Client>) -> Self {
        Self {
            clients: clients.into_iter().map(|c| (c.client_id, c)).collect(),
        }
    }

    pub fn get(&self, id: &ClientId) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_records_default_to_enabled() {
        let id = ClientId::new();
        let client: Client = serde_json::from_value(serde_json::json!({
            "clientId": id.to_string(),
            "name": "acme",
            "apiKeyHash": "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA",
        }))
        .unwrap();

        assert!(client.enabled);
        let directory = ClientDirectory::new([client]);
        assert_eq!(directory.get(&id).map(|c| c.name.as_str()), Some("acme"));
    }
}

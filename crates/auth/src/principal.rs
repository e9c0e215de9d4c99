use serde::{Deserialize, Serialize};

use promptq_core::ClientId;

/// An authenticated caller.
///
/// `Admin` may act on every job; `Client` only on the jobs it owns.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "clientId", rename_all = "lowercase")]
pub enum Principal {
    Admin,
    Client(ClientId),
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        matches!(self, Principal::Admin)
    }

    /// The client id, if this principal is a client.
    pub fn client_id(&self) -> Option<ClientId> {
        match self {
            Principal::Admin => None,
            Principal::Client(id) => Some(*id),
        }
    }

    /// Whether this principal may act on a job owned by `owner`.
    pub fn can_access(&self, owner: ClientId) -> bool {
        match self {
            Principal::Admin => true,
            Principal::Client(id) => *id == owner,
        }
    }
}

impl core::fmt::Display for Principal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Principal::Admin => f.write_str("admin"),
            Principal::Client(id) => write!(f, "client:{id}"),
        }
    }
}

use promptq_auth::Principal;
use promptq_core::ClientId;

/// The authenticated caller of a request.
///
/// Inserted by the auth middleware; present on every route except `/health`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.principal.client_id()
    }
}

use promptq_core::{ClientId, DomainError, DomainResult};

use crate::api_key::{ApiKeyHasher, AuthError};
use crate::client::ClientDirectory;
use crate::principal::Principal;

/// Raw credentials lifted from a request, before verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Admin { api_key: String },
    Client { client_id: String, api_key: String },
    None,
}

/// Resolves [`Credentials`] into a [`Principal`].
///
/// - No IO
/// - No panics
/// - Argon2 verification is CPU-bound; async callers should run it off the
///   reactor (`spawn_blocking`).
/// - Every presented key costs one verification, also for unknown or
///   disabled clients, so response time does not reveal which ids exist.
#[derive(Debug, Clone)]
pub struct Authenticator {
    hasher: ApiKeyHasher,
    admin_key_hash: Option<String>,
    clients: ClientDirectory,
    decoy_hash: Option<String>,
}

impl Authenticator {
    /// `admin_key_hash` is `None` when no admin key is configured; admin
    /// credentials are then always rejected.
    pub fn new(hasher: ApiKeyHasher, admin_key_hash: Option<String>, clients: ClientDirectory) -> Self {
        let decoy_hash = hasher.hash("promptq-decoy-key").ok();
        Self {
            hasher,
            admin_key_hash,
            clients,
            decoy_hash,
        }
    }

    pub fn authenticate(&self, credentials: &Credentials) -> Result<Principal, AuthError> {
        match credentials {
            Credentials::None => Err(AuthError::MissingCredentials),
            Credentials::Admin { api_key } => {
                let verified = self.verify(api_key, self.admin_key_hash.as_deref())?;
                if verified && self.admin_key_hash.is_some() {
                    Ok(Principal::Admin)
                } else {
                    Err(AuthError::InvalidCredentials)
                }
            }
            Credentials::Client { client_id, api_key } => {
                let client = client_id
                    .parse::<ClientId>()
                    .ok()
                    .and_then(|id| self.clients.get(&id))
                    .filter(|c| c.enabled);
                let verified = self.verify(api_key, client.map(|c| c.api_key_hash.as_str()))?;
                match client {
                    Some(c) if verified => Ok(Principal::Client(c.client_id)),
                    _ => Err(AuthError::InvalidCredentials),
                }
            }
        }
    }

    /// Verify against `hash`, or against the decoy when there is nothing to
    /// verify against. A decoy match never authenticates anybody.
    fn verify(&self, api_key: &str, hash: Option<&str>) -> Result<bool, AuthError> {
        match hash.or(self.decoy_hash.as_deref()) {
            Some(phc) => self.hasher.verify(api_key, phc),
            None => Ok(false),
        }
    }
}

/// Check that `principal` may act on a job owned by `owner`.
///
/// A foreign job is reported as `NotFound` so that ownership is never
/// disclosed to other clients.
pub fn authorize_job_access(principal: &Principal, owner: ClientId) -> DomainResult<()> {
    if principal.can_access(owner) {
        Ok(())
    } else {
        Err(DomainError::not_found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use chrono::Utc;
    use std::time::Instant;

    fn client(hasher: &ApiKeyHasher, key: &str, enabled: bool) -> Client {
        Client {
            client_id: ClientId::new(),
            name: "acme".to_string(),
            enabled,
            api_key_hash: hasher.hash(key).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn client_with_valid_key_resolves_to_client_principal() {
        let hasher = ApiKeyHasher::new("pepper");
        let c = client(&hasher, "k1", true);
        let id = c.client_id;
        let auth = Authenticator::new(hasher, None, ClientDirectory::new([c]));

        let principal = auth
            .authenticate(&Credentials::Client {
                client_id: id.to_string(),
                api_key: "k1".to_string(),
            })
            .unwrap();
        assert_eq!(principal, Principal::Client(id));
    }

    #[test]
    fn disabled_unknown_or_wrong_key_is_rejected() {
        let hasher = ApiKeyHasher::new("pepper");
        let disabled = client(&hasher, "k1", false);
        let enabled = client(&hasher, "k2", true);
        let (disabled_id, enabled_id) = (disabled.client_id, enabled.client_id);
        let auth = Authenticator::new(hasher, None, ClientDirectory::new([disabled, enabled]));

        for (client_id, api_key) in [
            (disabled_id.to_string(), "k1"),
            (enabled_id.to_string(), "wrong"),
            (ClientId::new().to_string(), "k2"),
            ("garbage".to_string(), "k2"),
        ] {
            let result = auth.authenticate(&Credentials::Client {
                client_id,
                api_key: api_key.to_string(),
            });
            assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        }
    }

    #[test]
    fn admin_key_is_checked_against_configured_hash() {
        let hasher = ApiKeyHasher::new("");
        let admin_hash = hasher.hash("root").unwrap();
        let auth = Authenticator::new(hasher, Some(admin_hash), ClientDirectory::default());

        assert_eq!(
            auth.authenticate(&Credentials::Admin { api_key: "root".to_string() }),
            Ok(Principal::Admin)
        );
        assert!(auth
            .authenticate(&Credentials::Admin { api_key: "nope".to_string() })
            .is_err());
        assert_eq!(
            auth.authenticate(&Credentials::None),
            Err(AuthError::MissingCredentials)
        );
    }

    #[test]
    fn admin_is_rejected_when_not_configured() {
        let auth = Authenticator::new(ApiKeyHasher::new(""), None, ClientDirectory::default());
        assert!(auth
            .authenticate(&Credentials::Admin { api_key: "root".to_string() })
            .is_err());
    }

    #[test]
    fn decoy_key_never_authenticates() {
        let auth = Authenticator::new(ApiKeyHasher::new("pepper"), None, ClientDirectory::default());
        assert!(auth.decoy_hash.is_some());

        for credentials in [
            Credentials::Admin { api_key: "promptq-decoy-key".to_string() },
            Credentials::Client {
                client_id: ClientId::new().to_string(),
                api_key: "promptq-decoy-key".to_string(),
            },
        ] {
            assert_eq!(auth.authenticate(&credentials), Err(AuthError::InvalidCredentials));
        }
    }

    #[test]
    fn unknown_client_costs_a_verification() {
        let hasher = ApiKeyHasher::new("pepper");
        let known = client(&hasher, "k1", true);
        let known_id = known.client_id;
        let auth = Authenticator::new(hasher, None, ClientDirectory::new([known]));

        let timed = |client_id: String| {
            let started = Instant::now();
            let result = auth.authenticate(&Credentials::Client {
                client_id,
                api_key: "wrong".to_string(),
            });
            assert_eq!(result, Err(AuthError::InvalidCredentials));
            started.elapsed()
        };

        let wrong_key = timed(known_id.to_string());
        let unknown_id = timed(ClientId::new().to_string());
        let garbage_id = timed("garbage".to_string());
        assert!(unknown_id * 10 >= wrong_key, "{unknown_id:?} vs {wrong_key:?}");
        assert!(garbage_id * 10 >= wrong_key, "{garbage_id:?} vs {wrong_key:?}");
    }

    #[test]
    fn foreign_jobs_look_missing() {
        let owner = ClientId::new();
        assert!(authorize_job_access(&Principal::Client(owner), owner).is_ok());
        assert!(authorize_job_access(&Principal::Admin, owner).is_ok());
        assert_eq!(
            authorize_job_access(&Principal::Client(ClientId::new()), owner),
            Err(DomainError::NotFound)
        );
    }
}

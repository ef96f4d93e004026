// Credential and target context storage
// The only shared mutable state of a client instance

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};

use super::types::Credential;
use crate::models::{CloudOrganization, CloudSpace};

/// Organization and space subsequent resource operations apply to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<CloudOrganization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<CloudSpace>,
}

impl TargetContext {
    pub fn new(organization: Option<CloudOrganization>, space: Option<CloudSpace>) -> Self {
        Self {
            organization,
            space,
        }
    }

    /// Target a space; the organization comes from the space when it knows it
    pub fn for_space(space: CloudSpace) -> Self {
        Self {
            organization: space.organization.clone(),
            space: Some(space),
        }
    }

    pub fn organization_guid(&self) -> Option<&str> {
        self.organization
            .as_ref()
            .map(|o| o.guid.as_str())
            .or_else(|| {
                self.space
                    .as_ref()
                    .and_then(|s| s.organization.as_ref())
                    .map(|o| o.guid.as_str())
            })
    }

    pub fn space_guid(&self) -> Option<&str> {
        self.space.as_ref().map(|s| s.guid.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.organization.is_none() && self.space.is_none()
    }
}

impl From<CloudSpace> for TargetContext {
    fn from(space: CloudSpace) -> Self {
        Self::for_space(space)
    }
}

/// Holds exactly one credential and one target context
pub struct CredentialStore {
    credential: RwLock<Option<Credential>>,
    target: RwLock<TargetContext>,
    /// Critical section for every target context mutation
    context_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(credential: Option<Credential>, target: TargetContext) -> Self {
        Self {
            credential: RwLock::new(credential),
            target: RwLock::new(target),
            context_lock: Mutex::new(()),
        }
    }

    pub fn credential(&self) -> Option<Credential> {
        self.credential.read().clone()
    }

    /// Swap the whole credential, returning the previous one
    pub fn replace_credential(&self, credential: Option<Credential>) -> Option<Credential> {
        std::mem::replace(&mut *self.credential.write(), credential)
    }

    /// Replace the credential only if its access token is still `expected`
    ///
    /// Keeps a refresh that finishes after logout or `set_credential` from
    /// resurrecting the old session.
    pub fn replace_credential_if(&self, expected: &str, credential: Credential) -> bool {
        let mut slot = self.credential.write();
        match slot.as_ref() {
            Some(current) if current.access_token == expected => {
                *slot = Some(credential);
                true
            }
            _ => false,
        }
    }

    /// Unlocked read of the target context
    ///
    /// Advisory for callers outside the context critical section: a
    /// concurrent space-scoped operation may replace it right after.
    pub fn target(&self) -> TargetContext {
        self.target.read().clone()
    }

    /// Enter the context critical section, blocking until it is free
    pub fn lock_context(&self) -> ContextLease<'_> {
        ContextLease {
            store: self,
            _guard: self.context_lock.lock(),
        }
    }
}

/// Exclusive right to mutate the target context
///
/// Not reentrant: calling [`CredentialStore::lock_context`] again on the same
/// thread while a lease is alive deadlocks.
pub struct ContextLease<'a> {
    store: &'a CredentialStore,
    _guard: MutexGuard<'a, ()>,
}

impl ContextLease<'_> {
    pub fn current(&self) -> TargetContext {
        self.store.target()
    }

    /// Overwrite the target context, returning the previous one
    pub fn replace(&self, target: TargetContext) -> TargetContext {
        std::mem::replace(&mut *self.store.target.write(), target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn space(guid: &str) -> CloudSpace {
        CloudSpace::new(guid, format!("{}-name", guid))
            .in_organization(CloudOrganization::new("org-1", "org"))
    }

    #[test]
    fn test_replace_credential_is_wholesale() {
        let store = CredentialStore::new(Some(Credential::bearer("first")), TargetContext::default());

        let previous = store.replace_credential(Some(Credential::bearer("second")));
        assert_eq!(previous.unwrap().access_token, "first");
        assert_eq!(store.credential().unwrap().access_token, "second");

        store.replace_credential(None);
        assert!(store.credential().is_none());
    }

    #[test]
    fn test_replace_credential_if_matches_current() {
        let store = CredentialStore::new(Some(Credential::bearer("first")), TargetContext::default());

        assert!(!store.replace_credential_if("other", Credential::bearer("x")));
        assert_eq!(store.credential().unwrap().access_token, "first");

        assert!(store.replace_credential_if("first", Credential::bearer("second")));
        assert_eq!(store.credential().unwrap().access_token, "second");

        store.replace_credential(None);
        assert!(!store.replace_credential_if("second", Credential::bearer("third")));
        assert!(store.credential().is_none());
    }

    #[test]
    fn test_target_for_space_carries_organization() {
        let target = TargetContext::for_space(space("space-a"));
        assert_eq!(target.space_guid(), Some("space-a"));
        assert_eq!(target.organization_guid(), Some("org-1"));
        assert!(!target.is_empty());
        assert!(TargetContext::default().is_empty());
    }

    #[test]
    fn test_lease_replaces_target() {
        let store = CredentialStore::new(None, TargetContext::default());
        {
            let lease = store.lock_context();
            let previous = lease.replace(TargetContext::for_space(space("space-a")));
            assert!(previous.is_empty());
            assert_eq!(lease.current().space_guid(), Some("space-a"));
        }
        assert_eq!(store.target().space_guid(), Some("space-a"));
    }

    #[test]
    fn test_lease_is_exclusive() {
        let store = Arc::new(CredentialStore::new(None, TargetContext::default()));
        let lease = store.lock_context();

        let other = store.clone();
        let handle = std::thread::spawn(move || {
            let lease = other.lock_context();
            lease.replace(TargetContext::for_space(space("space-b")));
        });

        std::thread::sleep(Duration::from_millis(50));
        lease.replace(TargetContext::for_space(space("space-a")));
        assert_eq!(store.target().space_guid(), Some("space-a"));
        drop(lease);

        handle.join().unwrap();
        assert_eq!(store.target().space_guid(), Some("space-b"));
    }
}

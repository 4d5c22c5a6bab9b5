use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// The principals contributed by one realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct RealmPrincipals {
    /// The name of the realm that asserted these principals.
    pub realm: String,
    /// The principals, in insertion order.
    pub principals: Vec<String>,
}

/// An ordered collection of identity assertions, possibly from several realms.
///
/// The first principal added is the primary one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct PrincipalSet {
    realms: Vec<RealmPrincipals>,
}

impl PrincipalSet {
    /// Creates an empty `PrincipalSet`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a `PrincipalSet` holding a single principal.
    pub fn from_principal(principal: impl Into<String>, realm: impl Into<String>) -> Self {
        let mut set = Self::new();
        set.add(principal, realm);
        set
    }

    /// Adds a principal asserted by `realm`. Duplicates within a realm are ignored.
    pub fn add(&mut self, principal: impl Into<String>, realm: impl Into<String>) {
        let principal = principal.into();
        let realm = realm.into();

        match self.realms.iter_mut().find(|r| r.realm == realm) {
            Some(entry) => {
                if !entry.principals.contains(&principal) {
                    entry.principals.push(principal);
                }
            }
            None => self.realms.push(RealmPrincipals {
                realm,
                principals: vec![principal],
            }),
        }
    }

    /// Adds every principal from `other`, keeping realm attribution.
    pub fn add_all(&mut self, other: &PrincipalSet) {
        for entry in &other.realms {
            for principal in &entry.principals {
                self.add(principal.clone(), entry.realm.clone());
            }
        }
    }

    /// The primary principal, if any.
    pub fn primary(&self) -> Option<&str> {
        self.iter().next()
    }

    /// The principals asserted by `realm`.
    pub fn from_realm(&self, realm: &str) -> &[String] {
        self.realms
            .iter()
            .find(|r| r.realm == realm)
            .map(|r| r.principals.as_slice())
            .unwrap_or(&[])
    }

    /// The names of every realm that contributed a principal.
    pub fn realm_names(&self) -> impl Iterator<Item = &str> {
        self.realms.iter().map(|r| r.realm.as_str())
    }

    /// Iterates over all principals in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.realms
            .iter()
            .flat_map(|r| r.principals.iter().map(String::as_str))
    }

    /// The total number of principals.
    pub fn len(&self) -> usize {
        self.realms.iter().map(|r| r.principals.len()).sum()
    }

    /// Whether there are no principals.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! External collaborators: identity and category lookup
//!
//! The engine never owns user or catalog data; it resolves parties and
//! categories through these traits. The in-memory implementations back the
//! demo binary and the tests.

use crate::error::EngineError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "cliente")]
    Cliente,
    #[serde(rename = "experto")]
    Experto,
}

/// A resolved party. `active` is false once the account is deactivated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    pub party_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub roles: Vec<Role>,
    pub active: bool,
}

impl Party {
    /// Dual-role accounts satisfy either side of a booking
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Resolve parties by email or stable id
#[async_trait::async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Party>;
    async fn find_by_id(&self, party_id: Uuid) -> Result<Party>;
}

/// Confirm a category exists; the engine does not interpret it further
#[async_trait::async_trait]
pub trait CategoryCatalog: Send + Sync {
    async fn exists(&self, category: &str) -> Result<bool>;
}

/// In-memory identity directory for development and tests
pub struct InMemoryDirectory {
    parties: RwLock<HashMap<Uuid, Party>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            parties: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, party: Party) {
        let mut parties = self.parties.write().await;
        parties.insert(party.party_id, party);
    }

    pub async fn deactivate(&self, party_id: Uuid) {
        let mut parties = self.parties.write().await;
        if let Some(party) = parties.get_mut(&party_id) {
            party.active = false;
        }
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl IdentityDirectory for InMemoryDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Party> {
        let parties = self.parties.read().await;
        parties
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("party with email {}", email)))
    }

    async fn find_by_id(&self, party_id: Uuid) -> Result<Party> {
        let parties = self.parties.read().await;
        parties
            .get(&party_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("party {}", party_id)))
    }
}

/// In-memory category catalog
pub struct InMemoryCatalog {
    categories: RwLock<HashSet<String>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            categories: RwLock::new(HashSet::new()),
        }
    }

    pub fn with_categories(names: &[&str]) -> Self {
        let set: HashSet<String> = names.iter().map(|n| n.to_string()).collect();
        Self {
            categories: RwLock::new(set),
        }
    }

    pub async fn add(&self, name: &str) {
        let mut categories = self.categories.write().await;
        categories.insert(name.to_string());
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CategoryCatalog for InMemoryCatalog {
    async fn exists(&self, category: &str) -> Result<bool> {
        let categories = self.categories.read().await;
        Ok(categories.contains(category))
    }
}

use std::collections::HashMap;

use crate::principal::{LookupFlags, Principal, PrincipalEntry, PrincipalProvider, ProviderError};

/// Principal database kept in memory.
///
/// Suitable for tests, for small embedded deployments, and as a reference for real backends.
/// Lookups are exact unless the caller asks for canonicalization, in which case names and realms
/// are compared case-insensitively.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDatabase {
    entries: HashMap<Principal, PrincipalEntry>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the entry of its principal.
    pub fn insert(&mut self, entry: PrincipalEntry) -> Option<PrincipalEntry> {
        self.entries.insert(entry.principal.clone(), entry)
    }

    pub fn with_entry(mut self, entry: PrincipalEntry) -> Self {
        self.insert(entry);
        self
    }

    pub fn remove(&mut self, principal: &Principal) -> Option<PrincipalEntry> {
        self.entries.remove(principal)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn same_name_ignoring_case(a: &Principal, b: &Principal) -> bool {
    a.realm.eq_ignore_ascii_case(&b.realm)
        && a.components.len() == b.components.len()
        && a.components
            .iter()
            .zip(&b.components)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
}

impl PrincipalProvider for InMemoryDatabase {
    fn lookup(&self, principal: &Principal, flags: LookupFlags) -> Result<Option<PrincipalEntry>, ProviderError> {
        if let Some(entry) = self.entries.get(principal) {
            return Ok(Some(entry.clone()));
        }

        if !flags.contains(LookupFlags::CANONICALIZE) {
            return Ok(None);
        }

        Ok(self
            .entries
            .values()
            .find(|entry| same_name_ignoring_case(&entry.principal, principal))
            .cloned())
    }
}

//! Declaration storage seam.

use crate::declaration::TrustDeclaration;
use crate::error::{DomainError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Mutation applied to a stored declaration under the store's write lock.
pub type DeclarationMutation<'a> = &'a mut dyn FnMut(&mut TrustDeclaration) -> Result<()>;

pub trait DeclarationStore: Send + Sync {
    fn insert(&self, declaration: TrustDeclaration) -> Result<()>;

    fn get(&self, declaration_id: &str) -> Result<TrustDeclaration>;

    /// Apply `mutation` atomically; nothing is stored if it fails.
    fn modify(&self, declaration_id: &str, mutation: DeclarationMutation<'_>)
        -> Result<TrustDeclaration>;

    fn delete(&self, declaration_id: &str) -> Result<TrustDeclaration>;

    /// All declarations for an agent, newest `declaration_date` first.
    fn list_for_agent(&self, agent_id: &str) -> Result<Vec<TrustDeclaration>>;
}

#[derive(Debug, Default)]
pub struct InMemoryDeclarationStore {
    declarations: RwLock<HashMap<String, TrustDeclaration>>,
}

impl InMemoryDeclarationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.declarations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.read().is_empty()
    }
}

impl DeclarationStore for InMemoryDeclarationStore {
    fn insert(&self, declaration: TrustDeclaration) -> Result<()> {
        let mut declarations = self.declarations.write();
        if declarations.contains_key(&declaration.id) {
            return Err(DomainError::DuplicateDeclaration(declaration.id));
        }
        debug!(declaration_id = %declaration.id, agent_id = %declaration.agent_id, "Declaration stored");
        declarations.insert(declaration.id.clone(), declaration);
        Ok(())
    }

    fn get(&self, declaration_id: &str) -> Result<TrustDeclaration> {
        self.declarations
            .read()
            .get(declaration_id)
            .cloned()
            .ok_or_else(|| DomainError::DeclarationNotFound(declaration_id.to_string()))
    }

    fn modify(
        &self,
        declaration_id: &str,
        mutation: DeclarationMutation<'_>,
    ) -> Result<TrustDeclaration> {
        let mut declarations = self.declarations.write();
        let stored = declarations
            .get_mut(declaration_id)
            .ok_or_else(|| DomainError::DeclarationNotFound(declaration_id.to_string()))?;

        let mut working = stored.clone();
        mutation(&mut working)?;
        *stored = working.clone();
        Ok(working)
    }

    fn delete(&self, declaration_id: &str) -> Result<TrustDeclaration> {
        self.declarations
            .write()
            .remove(declaration_id)
            .ok_or_else(|| DomainError::DeclarationNotFound(declaration_id.to_string()))
    }

    fn list_for_agent(&self, agent_id: &str) -> Result<Vec<TrustDeclaration>> {
        let mut found: Vec<TrustDeclaration> = self
            .declarations
            .read()
            .values()
            .filter(|d| d.agent_id == agent_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.declaration_date
                .cmp(&a.declaration_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(found)
    }
}

//! Scope enforcement.
//!
//! Every read and write goes through the predicates in this module. There is no
//! parameter that skips them: search pushes [`visibility_clause`] into SQL and
//! re-checks each row with [`is_visible`]; writes call [`authorize_write`].

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};
use crate::memory::types::{MemoryRecord, Scope};

/// A resolved caller: identity plus the access scope its credential grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: String,
    pub scope: Scope,
}

impl Caller {
    pub fn new(id: impl Into<String>, scope: Scope) -> Self {
        Self {
            id: id.into(),
            scope,
        }
    }

    pub fn restricted(id: impl Into<String>) -> Self {
        Self::new(id, Scope::Restricted)
    }

    pub fn elevated(id: impl Into<String>) -> Self {
        Self::new(id, Scope::Full)
    }

    pub fn is_elevated(&self) -> bool {
        self.scope.is_elevated()
    }

    /// Whether this caller may tag a record (or filter a search) with `scope`.
    pub fn may_claim(&self, scope: Scope) -> bool {
        !scope.is_elevated() || self.is_elevated()
    }
}

/// The visibility rule, stated once:
/// owner match, or elevated caller, or a shared record.
pub fn can_see(caller: &Caller, owner_id: &str, record_scope: Scope) -> bool {
    owner_id == caller.id || caller.is_elevated() || record_scope == Scope::Shared
}

pub fn is_visible(record: &MemoryRecord, caller: &Caller) -> bool {
    can_see(caller, &record.owner_id, record.scope)
}

/// Can `caller` create a record owned by `owner_id` under `scope`?
///
/// Elevated scope requested without privilege is refused, never downgraded.
pub fn authorize_write(caller: &Caller, owner_id: &str, scope: Scope) -> Result<()> {
    if owner_id != caller.id && !caller.is_elevated() {
        return Err(MemoryError::authorization(format!(
            "caller '{}' may not write memories owned by another identity",
            caller.id
        )));
    }
    if !caller.may_claim(scope) {
        return Err(MemoryError::authorization(format!(
            "scope '{scope}' requires elevated privilege"
        )));
    }
    Ok(())
}

/// Validate requested search scopes; an empty request expands to every scope
/// the caller may ask for.
pub fn authorize_scopes(caller: &Caller, requested: &[Scope]) -> Result<Vec<Scope>> {
    if requested.is_empty() {
        return Ok(Scope::ALL
            .into_iter()
            .filter(|s| caller.may_claim(*s))
            .collect());
    }
    if let Some(denied) = requested.iter().find(|s| !caller.may_claim(**s)) {
        return Err(MemoryError::authorization(format!(
            "scope '{denied}' requires elevated privilege"
        )));
    }
    let mut scopes = Vec::with_capacity(requested.len());
    for scope in requested {
        if !scopes.contains(scope) {
            scopes.push(*scope);
        }
    }
    Ok(scopes)
}

/// Mutations of an existing record (importance, promotion) are for its owner or
/// an elevated caller. Missing and foreign records produce the same error.
pub fn authorize_mutation(caller: &Caller, record: Option<&MemoryRecord>) -> Result<()> {
    match record {
        Some(r) if r.owner_id == caller.id || caller.is_elevated() => Ok(()),
        _ => Err(not_accessible()),
    }
}

/// Administrative operations (hard delete, sweeps, full audit history).
pub fn require_elevated(caller: &Caller, operation: &str) -> Result<()> {
    if caller.is_elevated() {
        Ok(())
    } else {
        Err(MemoryError::authorization(format!(
            "{operation} requires elevated privilege"
        )))
    }
}

/// The single error used for "missing" and "not permitted" alike.
pub fn not_accessible() -> MemoryError {
    MemoryError::authorization("memory not accessible")
}

/// SQL fragment implementing [`can_see`], with the caller id and elevation flag
/// bound at positions `?{id_idx}` and `?{elevated_idx}`.
pub fn visibility_clause(id_idx: usize, elevated_idx: usize) -> String {
    format!("(owner_id = ?{id_idx} OR ?{elevated_idx} = 1 OR scope = 'shared')")
}

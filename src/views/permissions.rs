use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use tracing::warn;

use super::context::Principal;
use crate::database::{ModelDef, QuerySet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    ViewOwned,
    ViewAll,
    Create,
    EditOwned,
    EditAll,
    DeleteOwned,
    DeleteAll,
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "view_owned" => Ok(Capability::ViewOwned),
            "view_all" => Ok(Capability::ViewAll),
            "create" => Ok(Capability::Create),
            "edit_owned" => Ok(Capability::EditOwned),
            "edit_all" => Ok(Capability::EditAll),
            "delete_owned" => Ok(Capability::DeleteOwned),
            "delete_all" => Ok(Capability::DeleteAll),
            other => Err(format!("Unknown capability '{}'", other)),
        }
    }
}

/// The request verbs views distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet(BTreeSet<Capability>);

impl PermissionSet {
    pub fn new<I: IntoIterator<Item = Capability>>(capabilities: I) -> Self {
        Self(capabilities.into_iter().collect())
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Whether `action` is allowed at all, owned or not.
    pub fn allows(&self, action: Action) -> bool {
        use Capability::*;
        match action {
            Action::Get => self.contains(ViewOwned) || self.contains(ViewAll),
            Action::Post | Action::Put => self.contains(Create),
            Action::Patch => self.contains(EditOwned) || self.contains(EditAll),
            Action::Delete => self.contains(DeleteOwned) || self.contains(DeleteAll),
        }
    }

    /// Whether `action` may touch rows the principal does not own.
    pub fn unrestricted(&self, action: Action) -> bool {
        match action {
            Action::Get => self.contains(Capability::ViewAll),
            Action::Patch => self.contains(Capability::EditAll),
            Action::Delete => self.contains(Capability::DeleteAll),
            Action::Post | Action::Put => false,
        }
    }
}

/// A principal's capabilities per model permission key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolePermissions(HashMap<String, PermissionSet>);

impl RolePermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant<I: IntoIterator<Item = Capability>>(mut self, key: impl Into<String>, capabilities: I) -> Self {
        self.0.insert(key.into(), PermissionSet::new(capabilities));
        self
    }

    /// A key the principal has no entry for grants nothing.
    pub fn for_key(&self, key: &str) -> PermissionSet {
        self.0.get(key).cloned().unwrap_or_default()
    }

    /// Parses `projects:view_owned,edit_all;tasks:view_all`; unknown capabilities are skipped.
    pub fn parse(raw: &str) -> Self {
        let mut permissions = Self::new();
        for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (key, caps) = entry.split_once(':').unwrap_or((entry, ""));
            let set = caps
                .split(',')
                .filter(|c| !c.trim().is_empty())
                .filter_map(|c| match c.parse::<Capability>() {
                    Ok(cap) => Some(cap),
                    Err(e) => {
                        warn!("{}", e);
                        None
                    }
                })
                .collect::<BTreeSet<_>>();
            permissions.0.insert(key.trim().to_string(), PermissionSet(set));
        }
        permissions
    }
}

/// The capabilities that apply to `model`, or `None` when role checks do not apply
/// (no principal, no role permissions, or a model without a permission key).
pub fn role_permission(principal: Option<&Principal>, model: &ModelDef) -> Option<PermissionSet> {
    let roles = principal?.permissions.as_ref()?;
    let key = model.permission_key.as_deref()?;
    Some(roles.for_key(key))
}

pub fn has_role_permission(action: Action, permissions: Option<&PermissionSet>) -> bool {
    permissions.map_or(true, |p| p.allows(action))
}

/// Narrows `queryset` to the principal's own rows unless the "all" variant is held.
pub fn filter_queryset(
    queryset: QuerySet,
    action: Action,
    permissions: Option<&PermissionSet>,
    principal: Option<&Principal>,
    model: &ModelDef,
) -> QuerySet {
    let permissions = match permissions {
        Some(p) => p,
        None => return queryset,
    };
    if permissions.unrestricted(action) {
        return queryset;
    }

    match principal.and_then(|p| model.owner_filter(&p.id)) {
        Some(owned) => queryset.filter(owned),
        None => {
            warn!(
                "{} has no ownership rule; returning no rows for a restricted principal",
                model.table
            );
            queryset.filter(json!({ "id": { "$in": [] } }))
        }
    }
}

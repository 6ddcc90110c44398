//! Role-permission resolution with inheritance.
//!
//! The tables are static: roles never change at runtime, so resolution is a
//! pure lookup with no storage or network access. Unknown roles resolve to an
//! empty permission set rather than an error, which keeps the callers that
//! deal with stale or foreign role strings simple.

use std::collections::BTreeSet;

pub const AGENT: &str = "AGENT";
pub const MANAGER: &str = "MANAGER";
pub const ADMIN: &str = "ADMIN";
pub const COMPLIANCE: &str = "COMPLIANCE";

static ROLE_PERMISSIONS: &[(&str, &[&str])] = &[
    (AGENT, &["read_leads", "update_lead_status"]),
    (MANAGER, &["read_leads", "assign_leads", "view_team_performance"]),
    (
        ADMIN,
        &["read_leads", "assign_leads", "manage_users", "system_configuration"],
    ),
    (COMPLIANCE, &["read_leads", "audit_logs", "compliance_reports"]),
];

// Acyclic: ancestors never point back at a descendant.
static ROLE_HIERARCHY: &[(&str, &[&str])] = &[
    (ADMIN, &[MANAGER, AGENT, COMPLIANCE]),
    (MANAGER, &[AGENT]),
];

fn direct_permissions(role: &str) -> &'static [&'static str] {
    ROLE_PERMISSIONS
        .iter()
        .find(|(name, _)| *name == role)
        .map_or(&[], |(_, permissions)| permissions)
}

fn inherited_roles(role: &str) -> &'static [&'static str] {
    ROLE_HIERARCHY
        .iter()
        .find(|(name, _)| *name == role)
        .map_or(&[], |(_, ancestors)| ancestors)
}

/// All roles the tables know about.
#[must_use]
pub fn known_roles() -> Vec<&'static str> {
    ROLE_PERMISSIONS.iter().map(|(name, _)| *name).collect()
}

/// Whether the role carries the permission directly, ignoring inheritance.
#[must_use]
pub fn has_direct(role: &str, permission: &str) -> bool {
    direct_permissions(role).iter().any(|held| *held == permission)
}

/// Whether the role carries the permission directly or through any inherited
/// role.
#[must_use]
pub fn has_with_inheritance(role: &str, permission: &str) -> bool {
    if has_direct(role, permission) {
        return true;
    }
    inherited_roles(role)
        .iter()
        .any(|ancestor| has_direct(ancestor, permission))
}

/// The deduplicated union of the role's own permissions and every inherited
/// role's permissions.
#[must_use]
pub fn all_permissions(role: &str) -> BTreeSet<&'static str> {
    let mut permissions: BTreeSet<&'static str> =
        direct_permissions(role).iter().copied().collect();
    for ancestor in inherited_roles(role) {
        permissions.extend(direct_permissions(ancestor).iter().copied());
    }
    permissions
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_ROLES: &[&str] = &[AGENT, MANAGER, ADMIN, COMPLIANCE];

    fn all_known_permissions() -> Vec<&'static str> {
        let mut permissions: Vec<_> = ROLE_PERMISSIONS
            .iter()
            .flat_map(|(_, permissions)| permissions.iter().copied())
            .collect();
        permissions.sort_unstable();
        permissions.dedup();
        permissions
    }

    #[test]
    fn direct_permissions_match_tables() {
        assert!(has_direct(AGENT, "read_leads"));
        assert!(has_direct(AGENT, "update_lead_status"));
        assert!(!has_direct(AGENT, "assign_leads"));
        assert!(has_direct(COMPLIANCE, "audit_logs"));
        assert!(!has_direct(COMPLIANCE, "manage_users"));
    }

    #[test]
    fn manager_inherits_agent() {
        assert!(!has_direct(MANAGER, "update_lead_status"));
        assert!(has_with_inheritance(MANAGER, "update_lead_status"));
    }

    #[test]
    fn admin_inherits_every_role() {
        for permission in all_known_permissions() {
            assert!(
                has_with_inheritance(ADMIN, permission),
                "ADMIN should resolve {permission}"
            );
        }
    }

    #[test]
    fn inheritance_check_agrees_with_full_set() {
        // has_with_inheritance(r, p) must hold exactly when p is in
        // all_permissions(r), for every role/permission pair.
        for role in ALL_ROLES {
            let resolved = all_permissions(role);
            for permission in all_known_permissions() {
                assert_eq!(
                    has_with_inheritance(role, permission),
                    resolved.contains(permission),
                    "mismatch for role {role}, permission {permission}"
                );
            }
        }
    }

    #[test]
    fn hierarchy_forms_supersets() {
        let agent = all_permissions(AGENT);
        let manager = all_permissions(MANAGER);
        let admin = all_permissions(ADMIN);
        assert!(manager.is_superset(&agent));
        assert!(admin.is_superset(&manager));
        assert!(admin.is_superset(&all_permissions(COMPLIANCE)));
    }

    #[test]
    fn unknown_role_resolves_empty() {
        assert!(all_permissions("INTERN").is_empty());
        assert!(!has_direct("INTERN", "read_leads"));
        assert!(!has_with_inheritance("INTERN", "read_leads"));
    }

    #[test]
    fn known_roles_lists_all_four() {
        let roles = known_roles();
        assert_eq!(roles.len(), 4);
        for role in ALL_ROLES {
            assert!(roles.contains(role));
        }
    }
}

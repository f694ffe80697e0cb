//! Role and permission resolution. One predicate backs both route guarding and
//! conditional UI rendering; nothing else in the crate inspects role strings.

use std::collections::{BTreeMap, BTreeSet};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::session::state::User;

/// Closed role set. Parsed once at user-load time; call sites never re-derive
/// anything from the wire string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    BrandEnterprise,
    BrandPremium,
    BrandStandard,
    BrandFree,
}

/// Coarse category tag, resolved once alongside the role. Internal staff vs
/// brand customers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleCategory {
    Internal,
    Brand,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "super_admin" => Some(Role::SuperAdmin),
            "admin" => Some(Role::Admin),
            "brand_enterprise" => Some(Role::BrandEnterprise),
            "brand_premium" => Some(Role::BrandPremium),
            "brand_standard" => Some(Role::BrandStandard),
            "brand_free" => Some(Role::BrandFree),
            _ => None,
        }
    }

    /// Total ordering for hierarchy checks, independent of string matching.
    pub fn level(&self) -> i32 {
        match self {
            Role::SuperAdmin => 100,
            Role::Admin => 80,
            Role::BrandEnterprise => 40,
            Role::BrandPremium => 30,
            Role::BrandStandard => 20,
            Role::BrandFree => 10,
        }
    }

    pub fn category(&self) -> RoleCategory {
        match self {
            Role::SuperAdmin | Role::Admin => RoleCategory::Internal,
            Role::BrandEnterprise | Role::BrandPremium | Role::BrandStandard | Role::BrandFree => {
                RoleCategory::Brand
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::BrandEnterprise => "brand_enterprise",
            Role::BrandPremium => "brand_premium",
            Role::BrandStandard => "brand_standard",
            Role::BrandFree => "brand_free",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewAnalytics,
    ExportData,
    ManageTeam,
    ManageBilling,
    ManageBrands,
    ManageUsers,
    ManagePlatform,
    ViewAuditLog,
}

/// Fixed role -> permission-set table, built once. Per-user overrides, when
/// present on the user record, take precedence over this table.
static ROLE_PERMISSIONS: Lazy<BTreeMap<Role, BTreeSet<Permission>>> = Lazy::new(|| {
    use Permission::*;
    let mut table = BTreeMap::new();
    table.insert(Role::SuperAdmin, BTreeSet::from([
        ViewAnalytics, ExportData, ManageTeam, ManageBilling, ManageBrands,
        ManageUsers, ManagePlatform, ViewAuditLog,
    ]));
    table.insert(Role::Admin, BTreeSet::from([
        ViewAnalytics, ExportData, ManageTeam, ManageBrands, ManageUsers, ViewAuditLog,
    ]));
    table.insert(Role::BrandEnterprise, BTreeSet::from([
        ViewAnalytics, ExportData, ManageTeam, ManageBilling,
    ]));
    table.insert(Role::BrandPremium, BTreeSet::from([ViewAnalytics, ExportData, ManageBilling]));
    table.insert(Role::BrandStandard, BTreeSet::from([ViewAnalytics, ManageBilling]));
    table.insert(Role::BrandFree, BTreeSet::from([ViewAnalytics]));
    table
});

pub fn role_permissions(role: Role) -> &'static BTreeSet<Permission> {
    static EMPTY: BTreeSet<Permission> = BTreeSet::new();
    ROLE_PERMISSIONS.get(&role).unwrap_or(&EMPTY)
}

/// Permission predicate. Absent user yields no permissions (default-deny).
/// Explicit per-user overrides win over the role table.
pub fn has_permission(user: Option<&User>, permission: Permission) -> bool {
    let Some(user) = user else { return false };
    match &user.permission_overrides {
        Some(overrides) => overrides.contains(&permission),
        None => role_permissions(user.role).contains(&permission),
    }
}

pub fn is_internal_user(user: Option<&User>) -> bool {
    user.map(|u| u.category == RoleCategory::Internal).unwrap_or(false)
}

/// Effective permission set for display purposes; resolution is identical to
/// `has_permission`.
pub fn effective_permissions(user: &User) -> BTreeSet<Permission> {
    match &user.permission_overrides {
        Some(overrides) => overrides.clone(),
        None => role_permissions(user.role).clone(),
    }
}

/// Routing decision for a guarded route. The routing layer consumes this; the
/// predicate behind it is the same `has_permission` the UI uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    RedirectLogin,
    RedirectAccessDenied,
}

pub fn guard_route(
    is_authenticated: bool,
    user: Option<&User>,
    required: Option<Permission>,
) -> RouteDecision {
    if !is_authenticated || user.is_none() {
        return RouteDecision::RedirectLogin;
    }
    match required {
        None => RouteDecision::Allow,
        Some(p) if has_permission(user, p) => RouteDecision::Allow,
        Some(_) => RouteDecision::RedirectAccessDenied,
    }
}

pub fn login_path() -> &'static str { "/login" }

/// Post-login landing target, decided by the precomputed category tag.
pub fn dashboard_path(role: Role) -> &'static str {
    match role.category() {
        RoleCategory::Internal => "/admin/dashboard",
        RoleCategory::Brand => "/brand/dashboard",
    }
}

// src/navigation.rs
//
// Tenant route resolution for the panel: `/<clinic-slug>/<page>/...` for clinic
// staff and `/platform/...` for super-admins. Re-evaluated on every navigation.

use serde::Serialize;

use crate::permissions::{Capability, Role};

pub const PLATFORM_ROOT: &str = "platform";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RouteDecision {
    Allow,
    Redirect { to: String },
    Deny { reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Dashboard,
    Calendar,
    Appointments,
    Patients,
    Payments,
    Reports,
    Users,
    Settings,
}

impl Page {
    pub fn from_segment(segment: &str) -> Option<Self> {
        Some(match segment {
            "dashboard" => Page::Dashboard,
            "calendar" => Page::Calendar,
            "appointments" => Page::Appointments,
            "patients" => Page::Patients,
            "payments" => Page::Payments,
            "reports" => Page::Reports,
            "users" => Page::Users,
            "settings" => Page::Settings,
            _ => return None,
        })
    }

    /// Capability needed to open the page. Users is open to everyone: non-admins
    /// get their own account form there.
    pub fn required(self) -> Option<Capability> {
        match self {
            Page::Dashboard | Page::Users => None,
            Page::Calendar | Page::Appointments => Some(Capability::ViewAppointments),
            Page::Patients => Some(Capability::ViewPatients),
            Page::Payments => Some(Capability::ViewPayments),
            Page::Reports => Some(Capability::ViewReports),
            Page::Settings => Some(Capability::ManageClinicSettings),
        }
    }
}

fn redirect(to: String) -> RouteDecision {
    RouteDecision::Redirect { to }
}

fn dashboard(slug: &str) -> RouteDecision {
    redirect(format!("/{slug}/dashboard"))
}

/// Where a role lands after login.
pub fn landing_path(role: Role, own_slug: Option<&str>) -> String {
    match (role, own_slug) {
        (Role::SuperAdmin, _) | (_, None) => format!("/{PLATFORM_ROOT}"),
        (_, Some(slug)) => format!("/{slug}/dashboard"),
    }
}

pub fn resolve(role: Role, own_slug: Option<&str>, path: &str) -> RouteDecision {
    let segments: Vec<&str> = path
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if role == Role::SuperAdmin {
        return match segments.first() {
            Some(&PLATFORM_ROOT) => RouteDecision::Allow,
            _ => redirect(format!("/{PLATFORM_ROOT}")),
        };
    }

    let Some(own) = own_slug else {
        return RouteDecision::Deny { reason: "NO_CLINIC" };
    };

    let Some(&slug) = segments.first() else {
        return dashboard(own);
    };
    if slug == PLATFORM_ROOT {
        return dashboard(own);
    }
    if slug != own {
        let rest = segments[1..].join("/");
        return if rest.is_empty() {
            dashboard(own)
        } else {
            redirect(format!("/{own}/{rest}"))
        };
    }

    let Some(page) = segments.get(1).copied().and_then(Page::from_segment) else {
        return dashboard(own);
    };

    match page.required() {
        Some(cap) if !role.can(cap) => RouteDecision::Deny { reason: "FORBIDDEN" },
        _ => RouteDecision::Allow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn super_admin_goes_to_platform() {
        assert_eq!(resolve(Role::SuperAdmin, None, "/platform/clinics"), RouteDecision::Allow);
        assert_eq!(
            resolve(Role::SuperAdmin, None, "/gulus-dis/dashboard"),
            RouteDecision::Redirect { to: "/platform".into() }
        );
    }

    #[test]
    fn foreign_slug_redirects_to_own_clinic() {
        assert_eq!(
            resolve(Role::Reception, Some("gulus-dis"), "/baska-klinik/patients/42"),
            RouteDecision::Redirect { to: "/gulus-dis/patients/42".into() }
        );
        assert_eq!(
            resolve(Role::Reception, Some("gulus-dis"), "/baska-klinik"),
            RouteDecision::Redirect { to: "/gulus-dis/dashboard".into() }
        );
    }

    #[test]
    fn root_platform_and_unknown_pages_land_on_dashboard() {
        let home = RouteDecision::Redirect { to: "/gulus-dis/dashboard".into() };
        assert_eq!(resolve(Role::Doctor, Some("gulus-dis"), "/"), home);
        assert_eq!(resolve(Role::Doctor, Some("gulus-dis"), "/platform"), home);
        assert_eq!(resolve(Role::Doctor, Some("gulus-dis"), "/gulus-dis/nope"), home);
    }

    #[test]
    fn pages_follow_capabilities() {
        assert_eq!(resolve(Role::Doctor, Some("k"), "/k/calendar"), RouteDecision::Allow);
        assert_eq!(resolve(Role::Doctor, Some("k"), "/k/reports"), RouteDecision::Deny { reason: "FORBIDDEN" });
        assert_eq!(resolve(Role::Finance, Some("k"), "/k/reports"), RouteDecision::Allow);
        assert_eq!(resolve(Role::Assistant, Some("k"), "/k/users"), RouteDecision::Allow);
        assert_eq!(resolve(Role::Reception, Some("k"), "/k/settings"), RouteDecision::Deny { reason: "FORBIDDEN" });
        assert_eq!(resolve(Role::AdminDoctor, Some("k"), "/k/settings"), RouteDecision::Allow);
    }

    #[test]
    fn landing_paths() {
        assert_eq!(landing_path(Role::SuperAdmin, None), "/platform");
        assert_eq!(landing_path(Role::Finance, Some("gulus-dis")), "/gulus-dis/dashboard");
    }

    #[test]
    fn staff_without_clinic_is_denied() {
        assert_eq!(resolve(Role::Admin, None, "/x/dashboard"), RouteDecision::Deny { reason: "NO_CLINIC" });
    }
}

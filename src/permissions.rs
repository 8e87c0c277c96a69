// src/permissions.rs
//
// Every role check in the service goes through `authorize`. Handlers never
// compare role names themselves.

use serde::{Deserialize, Serialize};

use crate::{error::ApiError, middleware::auth_context::AuthContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SuperAdmin,
    Admin,
    AdminDoctor,
    Doctor,
    Assistant,
    Reception,
    Finance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ManagePlatform,
    ManageUsers,
    ManageClinicSettings,
    ViewAppointments,
    ManageAppointments,
    ViewPatients,
    ManagePatients,
    ViewPayments,
    ManagePayments,
    ViewReports,
}

use Capability::*;

const CLINIC_ADMIN: &[Capability] = &[
    ManageUsers,
    ManageClinicSettings,
    ViewAppointments,
    ManageAppointments,
    ViewPatients,
    ManagePatients,
    ViewPayments,
    ManagePayments,
    ViewReports,
];

impl Role {
    pub fn capabilities(self) -> &'static [Capability] {
        match self {
            Role::SuperAdmin => &[ManagePlatform, ManageUsers],
            Role::Admin | Role::AdminDoctor => CLINIC_ADMIN,
            Role::Doctor | Role::Assistant => &[
                ViewAppointments,
                ManageAppointments,
                ViewPatients,
                ManagePatients,
            ],
            Role::Reception => &[
                ViewAppointments,
                ManageAppointments,
                ViewPatients,
                ManagePatients,
                ViewPayments,
            ],
            Role::Finance => &[
                ViewAppointments,
                ViewPatients,
                ViewPayments,
                ManagePayments,
                ViewReports,
            ],
        }
    }

    pub fn can(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Whether this role may act as a treating doctor on an appointment.
    pub fn is_doctor(self) -> bool {
        matches!(self, Role::Doctor | Role::AdminDoctor)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::Admin => "ADMIN",
            Role::AdminDoctor => "ADMIN_DOCTOR",
            Role::Doctor => "DOCTOR",
            Role::Assistant => "ASSISTANT",
            Role::Reception => "RECEPTION",
            Role::Finance => "FINANCE",
        }
    }
}

pub fn authorize(auth: &AuthContext, capability: Capability) -> Result<(), ApiError> {
    if auth.role.can(capability) {
        Ok(())
    } else {
        tracing::debug!(user_id = %auth.user_id, role = auth.role.as_str(), ?capability, "capability denied");
        Err(ApiError::forbidden())
    }
}

/// Whether `actor` may create, edit or remove an account holding `target`.
/// Clinic admins never touch super-admin accounts.
pub fn can_manage_role(actor: Role, target: Role) -> bool {
    match actor {
        Role::SuperAdmin => true,
        Role::Admin | Role::AdminDoctor => target != Role::SuperAdmin,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ctx(role: Role) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            role,
            clinic_id: (role != Role::SuperAdmin).then(Uuid::new_v4),
            clinic_slug: None,
            session_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn only_admin_roles_manage_users() {
        for role in [Role::SuperAdmin, Role::Admin, Role::AdminDoctor] {
            assert!(authorize(&ctx(role), ManageUsers).is_ok(), "{role:?}");
        }
        for role in [Role::Doctor, Role::Assistant, Role::Reception, Role::Finance] {
            assert!(authorize(&ctx(role), ManageUsers).is_err(), "{role:?}");
        }
    }

    #[test]
    fn platform_is_super_admin_only() {
        assert!(Role::SuperAdmin.can(ManagePlatform));
        assert!(!Role::Admin.can(ManagePlatform));
        assert!(!Role::SuperAdmin.can(ViewAppointments));
    }

    #[test]
    fn finance_sees_money_but_not_schedule_edits() {
        assert!(Role::Finance.can(ManagePayments));
        assert!(Role::Finance.can(ViewReports));
        assert!(!Role::Finance.can(ManageAppointments));
        assert!(!Role::Reception.can(ManagePayments));
    }

    #[test]
    fn clinic_admin_cannot_touch_super_admin() {
        assert!(can_manage_role(Role::Admin, Role::Doctor));
        assert!(!can_manage_role(Role::AdminDoctor, Role::SuperAdmin));
        assert!(can_manage_role(Role::SuperAdmin, Role::SuperAdmin));
        assert!(!can_manage_role(Role::Reception, Role::Assistant));
    }

    #[test]
    fn role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::AdminDoctor).unwrap(), "\"ADMIN_DOCTOR\"");
        let r: Role = serde_json::from_str("\"RECEPTION\"").unwrap();
        assert_eq!(r, Role::Reception);
        assert_eq!(Role::SuperAdmin.as_str(), "SUPER_ADMIN");
    }
}

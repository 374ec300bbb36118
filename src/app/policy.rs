use uuid::Uuid;

use crate::domain::user::Caller;

/// Capabilities a caller may need for a mutating operation. Ownership is
/// carried inside the variant so the decision stays a pure function of
/// (caller, action).
#[derive(Debug, Clone, Copy)]
pub enum Action {
    /// Update or delete an incident report.
    ModifyIncident { owner_id: Uuid },
    /// Change an incident's status field.
    ChangeIncidentStatus,
    /// List users, toggle the admin flag, delete a user.
    ManageUsers,
    /// Flip a notification's read flag.
    MarkNotificationRead { recipient_id: Uuid },
    /// Add a comment, reaction, or review to any incident.
    Contribute,
}

/// The single place admin/ownership rules live. Handlers consult this for
/// every mutating operation instead of re-checking inline.
pub fn allows(caller: &Caller, action: Action) -> bool {
    match action {
        Action::ModifyIncident { owner_id } => caller.is_admin || caller.user_id == owner_id,
        Action::ChangeIncidentStatus => caller.is_admin,
        Action::ManageUsers => caller.is_admin,
        Action::MarkNotificationRead { recipient_id } => caller.user_id == recipient_id,
        Action::Contribute => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(is_admin: bool) -> Caller {
        Caller {
            user_id: Uuid::new_v4(),
            is_admin,
        }
    }

    #[test]
    fn owner_may_modify_own_incident() {
        let caller = user(false);
        assert!(allows(
            &caller,
            Action::ModifyIncident {
                owner_id: caller.user_id
            }
        ));
        assert!(!allows(
            &caller,
            Action::ModifyIncident {
                owner_id: Uuid::new_v4()
            }
        ));
    }

    #[test]
    fn admin_may_modify_any_incident() {
        let caller = user(true);
        assert!(allows(
            &caller,
            Action::ModifyIncident {
                owner_id: Uuid::new_v4()
            }
        ));
    }

    #[test]
    fn status_and_user_management_are_admin_only() {
        assert!(!allows(&user(false), Action::ChangeIncidentStatus));
        assert!(allows(&user(true), Action::ChangeIncidentStatus));
        assert!(!allows(&user(false), Action::ManageUsers));
        assert!(allows(&user(true), Action::ManageUsers));
    }

    #[test]
    fn only_the_recipient_marks_notifications() {
        let caller = user(false);
        assert!(allows(
            &caller,
            Action::MarkNotificationRead {
                recipient_id: caller.user_id
            }
        ));

        // Being an admin grants nothing here
        let admin = user(true);
        assert!(!allows(
            &admin,
            Action::MarkNotificationRead {
                recipient_id: Uuid::new_v4()
            }
        ));
    }

    #[test]
    fn anyone_may_contribute() {
        assert!(allows(&user(false), Action::Contribute));
        assert!(allows(&user(true), Action::Contribute));
    }
}

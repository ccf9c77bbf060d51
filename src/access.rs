//! Event-scoped authorization.
//!
//! Admins act as owners of every event. Everyone else is limited to the
//! role and optional scope recorded in `event_permissions`.

use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::domain::{PermissionRole, ScopeType};
use crate::error::{AppError, AppResult};
use crate::models::{Event, EventPermission, Position};
use crate::schema::{event_permissions, events};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAccess {
    pub role: PermissionRole,
    pub scope_type: Option<ScopeType>,
    pub scope_ids: Vec<String>,
}

impl EventAccess {
    pub fn owner() -> Self {
        Self {
            role: PermissionRole::Owner,
            scope_type: None,
            scope_ids: Vec::new(),
        }
    }

    pub fn from_permission(permission: &EventPermission) -> Option<Self> {
        let role = permission.role.parse().ok()?;
        let scope_type = permission
            .scope_type
            .as_deref()
            .and_then(|value| value.parse().ok());
        Some(Self {
            role,
            scope_type,
            scope_ids: permission.scope_ids.clone(),
        })
    }

    fn is_unscoped(&self) -> bool {
        self.scope_type.is_none()
    }

    pub fn has_role(&self, required: PermissionRole) -> bool {
        self.role.at_least(required)
    }

    pub fn can_manage_event(&self) -> bool {
        self.has_role(PermissionRole::Manager)
    }

    pub fn can_delete_event(&self) -> bool {
        self.role == PermissionRole::Owner
    }

    pub fn can_manage_permissions(&self) -> bool {
        self.role == PermissionRole::Owner
    }

    pub fn can_manage_attendants(&self) -> bool {
        match self.role {
            PermissionRole::Owner | PermissionRole::Manager => true,
            PermissionRole::Overseer => self.is_unscoped(),
            _ => false,
        }
    }

    pub fn can_manage_documents(&self) -> bool {
        self.can_manage_attendants()
    }

    pub fn can_manage_position(&self, position: &Position) -> bool {
        match self.role {
            PermissionRole::Owner | PermissionRole::Manager => true,
            PermissionRole::Overseer => self.is_unscoped() || self.scope_covers(position),
            _ => false,
        }
    }

    /// Keymen may annotate assignments of the attendant record linked to
    /// their own account; everyone else needs position management rights.
    pub fn can_edit_assignment(
        &self,
        position: &Position,
        attendant_user_id: Option<Uuid>,
        user_id: Uuid,
    ) -> bool {
        if self.can_manage_position(position) {
            return true;
        }
        self.role == PermissionRole::Keyman && attendant_user_id == Some(user_id)
    }

    fn scope_covers(&self, position: &Position) -> bool {
        match self.scope_type {
            None => true,
            Some(ScopeType::Position) => {
                let id = position.id.to_string();
                self.scope_ids.iter().any(|scope| *scope == id)
            }
            Some(ScopeType::Department) => position
                .area
                .as_deref()
                .map(|area| {
                    self.scope_ids
                        .iter()
                        .any(|scope| scope.eq_ignore_ascii_case(area))
                })
                .unwrap_or(false),
            Some(ScopeType::StationRange) => self
                .scope_ids
                .iter()
                .filter_map(|scope| parse_station_range(scope))
                .any(|(from, to)| (from..=to).contains(&position.position_number)),
        }
    }

    pub fn ensure(&self, allowed: bool, action: &str) -> AppResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "insufficient permissions to {action}"
            )))
        }
    }
}

/// Parses `"<from>-<to>"` or a single position number.
pub fn parse_station_range(raw: &str) -> Option<(i32, i32)> {
    match raw.split_once('-') {
        Some((from, to)) => {
            let from = from.trim().parse().ok()?;
            let to = to.trim().parse().ok()?;
            (from <= to).then_some((from, to))
        }
        None => {
            let single = raw.trim().parse().ok()?;
            Some((single, single))
        }
    }
}

/// Access of `user` on `event_id`, or `None` when the user holds no permission.
pub fn event_access(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    event_id: Uuid,
) -> AppResult<Option<EventAccess>> {
    if user.is_admin() {
        return Ok(Some(EventAccess::owner()));
    }

    let permission = event_permissions::table
        .filter(event_permissions::event_id.eq(event_id))
        .filter(event_permissions::user_id.eq(user.user_id))
        .first::<EventPermission>(conn)
        .optional()?;

    Ok(permission.as_ref().and_then(EventAccess::from_permission))
}

/// Loads the event and the caller's access to it. Unknown events are 404,
/// events the caller has no permission on are 403.
pub fn load_event(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    event_id: Uuid,
) -> AppResult<(Event, EventAccess)> {
    let event = events::table
        .find(event_id)
        .first::<Event>(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_entity("event"))?;

    let access = event_access(conn, user, event_id)?
        .ok_or_else(|| AppError::forbidden("no access to this event"))?;

    Ok((event, access))
}

use chrono::NaiveTime;
use thiserror::Error;

use crate::domain::AssignmentRole;
use crate::models::Shift;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssignmentConflict {
    #[error("attendant is already assigned to this shift")]
    DuplicateShift,
    #[error("attendant already works an overlapping shift: {position_name} ({shift_name})")]
    TimeOverlap {
        position_name: String,
        shift_name: String,
    },
    #[error("the {role} role on this shift is already filled")]
    RoleOccupied { role: AssignmentRole },
}

impl AssignmentConflict {
    pub fn conflict_type(&self) -> &'static str {
        match self {
            AssignmentConflict::DuplicateShift => "DUPLICATE_SHIFT_ASSIGNMENT",
            AssignmentConflict::TimeOverlap { .. } => "TIME_OVERLAP",
            AssignmentConflict::RoleOccupied { .. } => "ROLE_OCCUPIED",
        }
    }
}

/// Time-of-day window of a timed shift. All-day shifts have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ShiftWindow {
    pub fn of(shift: &Shift) -> Option<Self> {
        if shift.is_all_day {
            return None;
        }
        match (shift.start_time, shift.end_time) {
            (Some(start), Some(end)) if start < end => Some(Self { start, end }),
            _ => None,
        }
    }

    /// Half-open intervals: a shift ending at 10:00 does not overlap one
    /// starting at 10:00.
    pub fn overlaps(&self, other: &ShiftWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A shift the attendant already holds somewhere in the same event.
#[derive(Debug, Clone)]
pub struct HeldShift<'a> {
    pub shift: &'a Shift,
    pub position_name: &'a str,
}

/// Checks a prospective assignment in the order duplicate, overlap, role.
///
/// `held` are the attendant's current shifts in the event, `filled_roles`
/// the roles already taken on the target shift.
pub fn detect_conflict(
    target: &Shift,
    role: AssignmentRole,
    held: &[HeldShift<'_>],
    filled_roles: &[AssignmentRole],
) -> Result<(), AssignmentConflict> {
    if held.iter().any(|h| h.shift.id == target.id) {
        return Err(AssignmentConflict::DuplicateShift);
    }

    if let Some(window) = ShiftWindow::of(target) {
        let clash = held.iter().find(|h| {
            ShiftWindow::of(h.shift)
                .map(|other| other.overlaps(&window))
                .unwrap_or(false)
        });
        if let Some(clash) = clash {
            return Err(AssignmentConflict::TimeOverlap {
                position_name: clash.position_name.to_string(),
                shift_name: clash.shift.name.clone(),
            });
        }
    }

    if filled_roles.contains(&role) {
        return Err(AssignmentConflict::RoleOccupied { role });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;
    use uuid::Uuid;

    use super::*;

    fn shift(name: &str, window: Option<((u32, u32), (u32, u32))>) -> Shift {
        let time = |(h, m): (u32, u32)| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        Shift {
            id: Uuid::new_v4(),
            position_id: Uuid::new_v4(),
            name: name.to_string(),
            start_time: window.map(|(s, _)| time(s)),
            end_time: window.map(|(_, e)| time(e)),
            is_all_day: window.is_none(),
            sequence: 1,
            created_at: NaiveDateTime::default(),
            updated_at: NaiveDateTime::default(),
        }
    }

    #[test]
    fn duplicate_is_reported_first() {
        let morning = shift("Morning 1", Some(((7, 50), (10, 0))));
        let held = [HeldShift {
            shift: &morning,
            position_name: "Station 1",
        }];
        let err = detect_conflict(
            &morning,
            AssignmentRole::Attendant,
            &held,
            &[AssignmentRole::Attendant],
        )
        .unwrap_err();
        assert_eq!(err.conflict_type(), "DUPLICATE_SHIFT_ASSIGNMENT");
    }

    #[test]
    fn overlapping_timed_shift_is_rejected() {
        let held_shift = shift("Morning", Some(((8, 0), (11, 0))));
        let target = shift("Late Morning", Some(((10, 30), (12, 0))));
        let held = [HeldShift {
            shift: &held_shift,
            position_name: "Station 4",
        }];
        let err = detect_conflict(&target, AssignmentRole::Attendant, &held, &[]).unwrap_err();
        assert_eq!(
            err,
            AssignmentConflict::TimeOverlap {
                position_name: "Station 4".into(),
                shift_name: "Morning".into(),
            }
        );
        assert_eq!(err.conflict_type(), "TIME_OVERLAP");
    }

    #[test]
    fn touching_shifts_do_not_overlap() {
        let first = shift("Morning 1", Some(((7, 50), (10, 0))));
        let second = shift("Morning 2", Some(((10, 0), (12, 0))));
        let held = [HeldShift {
            shift: &first,
            position_name: "Station 1",
        }];
        assert!(detect_conflict(&second, AssignmentRole::Attendant, &held, &[]).is_ok());
    }

    #[test]
    fn all_day_shifts_are_not_time_checked() {
        let all_day = shift("All Day", None);
        let timed = shift("Morning", Some(((8, 0), (12, 0))));
        let held = [HeldShift {
            shift: &timed,
            position_name: "Station 2",
        }];
        assert!(detect_conflict(&all_day, AssignmentRole::Attendant, &held, &[]).is_ok());

        let held = [HeldShift {
            shift: &all_day,
            position_name: "Station 3",
        }];
        assert!(detect_conflict(&timed, AssignmentRole::Attendant, &held, &[]).is_ok());
    }

    #[test]
    fn occupied_role_is_rejected() {
        let target = shift("Morning", Some(((8, 0), (12, 0))));
        let err = detect_conflict(
            &target,
            AssignmentRole::Keyman,
            &[],
            &[AssignmentRole::Attendant, AssignmentRole::Keyman],
        )
        .unwrap_err();
        assert_eq!(err.conflict_type(), "ROLE_OCCUPIED");
        assert!(detect_conflict(
            &target,
            AssignmentRole::Overseer,
            &[],
            &[AssignmentRole::Attendant, AssignmentRole::Keyman],
        )
        .is_ok());
    }
}

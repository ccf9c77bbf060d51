use std::str::FromStr;

use chrono::NaiveTime;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{NewShift, Shift};
use crate::validation::{parse_time, FieldErrors};

pub const ALL_DAY_SHIFT_NAME: &str = "All Day";

const STANDARD: &[(&str, &str, &str)] = &[
    ("Morning 1", "07:50", "10:00"),
    ("Morning 2", "10:00", "12:00"),
    ("Afternoon 1", "12:00", "14:00"),
    ("Afternoon 2", "14:00", "17:00"),
];

const EXTENDED: &[(&str, &str, &str)] = &[
    ("Early Morning", "06:30", "08:30"),
    ("Morning", "08:30", "10:30"),
    ("Late Morning", "10:30", "12:45"),
    ("Early Afternoon", "12:45", "15:00"),
    ("Late Afternoon", "15:00", "21:00"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftTemplate {
    Standard,
    Extended,
    AllDay,
    Custom,
}

impl FromStr for ShiftTemplate {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "extended" => Ok(Self::Extended),
            "allday" | "all_day" => Ok(Self::AllDay),
            "custom" => Ok(Self::Custom),
            other => Err(format!(
                "unknown template {other} (expected standard, extended, allday or custom)"
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomShiftInput {
    pub name: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    #[serde(default)]
    pub is_all_day: bool,
}

/// A shift to be created, before it is attached to a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftSpec {
    pub name: String,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub is_all_day: bool,
}

impl ShiftSpec {
    pub fn all_day() -> Self {
        Self {
            name: ALL_DAY_SHIFT_NAME.to_string(),
            start_time: None,
            end_time: None,
            is_all_day: true,
        }
    }

    fn timed(name: &str, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            name: name.to_string(),
            start_time: Some(start),
            end_time: Some(end),
            is_all_day: false,
        }
    }

    pub fn into_new_shift(self, position_id: Uuid, sequence: i32) -> NewShift {
        NewShift {
            id: Uuid::new_v4(),
            position_id,
            name: self.name,
            start_time: self.start_time,
            end_time: self.end_time,
            is_all_day: self.is_all_day,
            sequence,
        }
    }
}

fn builtin(rows: &[(&str, &str, &str)]) -> Vec<ShiftSpec> {
    rows.iter()
        .filter_map(|(name, start, end)| {
            Some(ShiftSpec::timed(name, parse_time(start)?, parse_time(end)?))
        })
        .collect()
}

/// Parses one shift definition, reporting problems under `field`.
pub fn shift_spec_from_input(
    field: &str,
    name: Option<&str>,
    is_all_day: bool,
    start_time: Option<&str>,
    end_time: Option<&str>,
    errors: &mut FieldErrors,
) -> Option<ShiftSpec> {
    if is_all_day {
        return Some(ShiftSpec::all_day());
    }

    let start = start_time.and_then(parse_time);
    let end = end_time.and_then(parse_time);
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            errors.push(
                field,
                "timed shifts need start_time and end_time as HH:MM",
            );
            return None;
        }
    };
    if start >= end {
        errors.push(field, "start_time must be before end_time");
        return None;
    }

    let name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} - {}", start.format("%H:%M"), end.format("%H:%M")));

    Some(ShiftSpec {
        name,
        start_time: Some(start),
        end_time: Some(end),
        is_all_day: false,
    })
}

/// Expands a template into shift definitions. `custom` uses `custom_shifts`.
pub fn template_shifts(
    template: ShiftTemplate,
    custom_shifts: &[CustomShiftInput],
) -> Result<Vec<ShiftSpec>, FieldErrors> {
    let mut errors = FieldErrors::new();
    let specs = match template {
        ShiftTemplate::Standard => builtin(STANDARD),
        ShiftTemplate::Extended => builtin(EXTENDED),
        ShiftTemplate::AllDay => vec![ShiftSpec::all_day()],
        ShiftTemplate::Custom => {
            if custom_shifts.is_empty() {
                errors.push("custom_shifts", "custom template needs at least one shift");
            }
            custom_shifts
                .iter()
                .enumerate()
                .filter_map(|(index, input)| {
                    shift_spec_from_input(
                        &format!("custom_shifts[{index}]"),
                        Some(input.name.as_str()),
                        input.is_all_day,
                        input.start_time.as_deref(),
                        input.end_time.as_deref(),
                        &mut errors,
                    )
                })
                .collect::<Vec<_>>()
        }
    };

    if specs.iter().any(|s| s.is_all_day) && specs.len() > 1 {
        errors.push(
            "custom_shifts",
            "an all-day shift cannot be combined with other shifts",
        );
    }

    if errors.is_empty() {
        Ok(specs)
    } else {
        Err(errors)
    }
}

/// Why a shift cannot be added next to the existing ones, if it cannot.
pub fn mixing_violation(existing: &[Shift], adding_all_day: bool) -> Option<&'static str> {
    if existing.iter().any(|s| s.is_all_day) {
        return Some("position already has an All Day shift");
    }
    if adding_all_day && !existing.is_empty() {
        return Some("cannot create an All Day shift while other shifts exist");
    }
    None
}

//! String-backed enumerations stored in varchar columns.

use std::fmt;
use std::str::FromStr;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        "invalid {}: {other} (expected one of {})",
                        stringify!($name),
                        [$($text),+].join(", ")
                    )),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Account-level role of a user.
    UserRole {
        Admin => "ADMIN",
        Overseer => "OVERSEER",
        AssistantOverseer => "ASSISTANT_OVERSEER",
        Keyman => "KEYMAN",
        Attendant => "ATTENDANT",
    }
);

impl UserRole {
    pub fn can_create_events(&self) -> bool {
        matches!(
            self,
            UserRole::Admin | UserRole::Overseer | UserRole::AssistantOverseer
        )
    }

    pub fn can_manage_attendants(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Overseer)
    }
}

string_enum!(EventStatus {
    Upcoming => "UPCOMING",
    Current => "CURRENT",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
    Archived => "ARCHIVED",
});

string_enum!(
    /// Role a user holds on a single event.
    PermissionRole {
        Owner => "OWNER",
        Manager => "MANAGER",
        Overseer => "OVERSEER",
        Keyman => "KEYMAN",
        Viewer => "VIEWER",
    }
);

impl PermissionRole {
    pub fn rank(&self) -> u8 {
        match self {
            PermissionRole::Owner => 5,
            PermissionRole::Manager => 4,
            PermissionRole::Overseer => 3,
            PermissionRole::Keyman => 2,
            PermissionRole::Viewer => 1,
        }
    }

    pub fn at_least(&self, required: PermissionRole) -> bool {
        self.rank() >= required.rank()
    }
}

string_enum!(ScopeType {
    Department => "DEPARTMENT",
    StationRange => "STATION_RANGE",
    Position => "POSITION",
});

string_enum!(AssignmentRole {
    Attendant => "ATTENDANT",
    Overseer => "OVERSEER",
    Keyman => "KEYMAN",
});

string_enum!(FormOfService {
    Elder => "Elder",
    MinisterialServant => "Ministerial Servant",
    Exemplary => "Exemplary",
    RegularPioneer => "Regular Pioneer",
    OtherDepartment => "Other Department",
});

impl FormOfService {
    /// Parses a comma separated list, dropping unknown entries.
    pub fn parse_list(raw: &str) -> Vec<FormOfService> {
        let mut forms = Vec::new();
        for part in raw.split(',') {
            if let Ok(form) = FormOfService::from_str(part.trim()) {
                if !forms.contains(&form) {
                    forms.push(form);
                }
            }
        }
        forms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_roles_are_ranked() {
        assert!(PermissionRole::Owner.at_least(PermissionRole::Manager));
        assert!(PermissionRole::Manager.at_least(PermissionRole::Manager));
        assert!(!PermissionRole::Overseer.at_least(PermissionRole::Manager));
        assert!(PermissionRole::Keyman.at_least(PermissionRole::Viewer));
    }

    #[test]
    fn rejects_unknown_roles() {
        assert_eq!("ADMIN".parse::<UserRole>(), Ok(UserRole::Admin));
        let err = "SUPERUSER".parse::<UserRole>().unwrap_err();
        assert!(err.contains("ASSISTANT_OVERSEER"));
        assert!("admin".parse::<UserRole>().is_err());
    }

    #[test]
    fn forms_of_service_list_drops_unknown_entries() {
        let forms = FormOfService::parse_list("Elder, Pioneer ,Ministerial Servant,Elder");
        assert_eq!(
            forms,
            vec![FormOfService::Elder, FormOfService::MinisterialServant]
        );
        assert!(FormOfService::parse_list("").is_empty());
    }

    #[test]
    fn serializes_as_stored_text() {
        let json = serde_json::to_string(&FormOfService::RegularPioneer).unwrap();
        assert_eq!(json, "\"Regular Pioneer\"");
    }
}

use std::io::Write;

use diesel::{
    AsExpression, FromSqlRow,
    deserialize::{self, FromSql},
    pg::{Pg, PgValue},
    serialize::{self, IsNull, Output, ToSql},
    sql_types::Text,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error)]
#[error("'{value}' is not a valid {kind}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a string-backed enum stored in a `TEXT` column.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema,
            AsExpression, FromSqlRow,
        )]
        #[diesel(sql_type = diesel::sql_types::Text)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                Ok(raw.parse::<$name>()?)
            }
        }
    };
}

text_enum! {
    /// Lifecycle status of an appointment.
    AppointmentStatus {
        Pending => "pending",
        Confirmed => "confirmed",
        Waiting => "waiting",
        InProgress => "in_progress",
        Completed => "completed",
        Cancelled => "cancelled",
        NoShow => "no_show",
    }
}

impl AppointmentStatus {
    pub const TERMINAL: [AppointmentStatus; 3] = [
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    /// Statuses that count as "the pet already has an appointment".
    pub const ACTIVE: [AppointmentStatus; 4] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Waiting,
        AppointmentStatus::InProgress,
    ];

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }
}

text_enum! {
    /// Payment state derived from the appointment's payment records.
    PaymentStatus {
        Pending => "pending",
        Paid => "paid",
        Failed => "failed",
        Cancelled => "cancelled",
        Refunded => "refunded",
    }
}

text_enum! {
    /// Status of a single payment ledger row.
    PaymentRecordStatus {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

text_enum! {
    RefundStatus {
        NotRefunded => "not_refunded",
        Refunded => "refunded",
    }
}

text_enum! {
    SessionStatus {
        Active => "active",
        Completed => "completed",
    }
}

text_enum! {
    /// Role of the authenticated caller. `Owner` is the shop owner.
    ActorRole {
        PetOwner => "pet_owner",
        Staff => "staff",
        Owner => "owner",
    }
}

impl ActorRole {
    pub fn is_staff(&self) -> bool {
        matches!(self, ActorRole::Staff | ActorRole::Owner)
    }
}

text_enum! {
    UserStatus {
        Active => "active",
        Inactive => "inactive",
    }
}

text_enum! {
    ServiceAvailability {
        Available => "available",
        Unavailable => "unavailable",
    }
}

text_enum! {
    OutboxStatus {
        Pending => "PENDING",
        Sent => "SENT",
        Failed => "FAILED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stored_text() {
        assert_eq!(
            "in_progress".parse::<AppointmentStatus>().unwrap(),
            AppointmentStatus::InProgress
        );
        assert_eq!(ActorRole::PetOwner.to_string(), "pet_owner");
        assert!("groomer".parse::<ActorRole>().is_err());
    }

    #[test]
    fn serde_uses_storage_names() {
        let json = serde_json::to_string(&AppointmentStatus::NoShow).unwrap();
        assert_eq!(json, "\"no_show\"");
        let back: RefundStatus = serde_json::from_str("\"not_refunded\"").unwrap();
        assert_eq!(back, RefundStatus::NotRefunded);
    }

    #[test]
    fn terminal_and_active_sets_are_disjoint() {
        for status in AppointmentStatus::ACTIVE {
            assert!(!status.is_terminal());
        }
        assert!(AppointmentStatus::NoShow.is_terminal());
    }
}

//! Typed IDs for type-safe entity references.
//!
//! Using typed IDs prevents accidentally passing a `StudentId` where an `InvoiceId` is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Macro to generate typed ID wrappers.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random ID using UUID v7 (time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID.
            #[must_use]
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

typed_id!(UserId, "Unique identifier for a staff user acting on the books.");
typed_id!(StudentId, "Unique identifier for a student.");
typed_id!(TeacherId, "Unique identifier for a teacher.");
typed_id!(RoomId, "Unique identifier for a lesson room.");
typed_id!(CourseId, "Unique identifier for a course.");
typed_id!(EnrollmentId, "Unique identifier for a course enrollment.");
typed_id!(LessonId, "Unique identifier for a dated lesson.");
typed_id!(InvoiceId, "Unique identifier for an invoice.");
typed_id!(PaymentId, "Unique identifier for a payment.");
typed_id!(LedgerEntryId, "Unique identifier for a student ledger entry.");
typed_id!(
    LedgerApplicationId,
    "Unique identifier for an application of ledger credit to an invoice."
);
typed_id!(DecouplingId, "Unique identifier for a decoupling audit record.");
typed_id!(
    StudentTransactionId,
    "Unique identifier for a student transaction line."
);

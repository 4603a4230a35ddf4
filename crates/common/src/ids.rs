use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a UUID-backed identifier newtype.
///
/// Each entity gets its own type so an order id can never be passed where an
/// inventory unit id is expected.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
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

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Identifier of a customer order.
    OrderId
);
uuid_id!(
    /// Identifier of a single line on an order.
    OrderItemId
);
uuid_id!(
    /// Identifier of a location-scoped quantity of one product variant.
    InventoryUnitId
);
uuid_id!(
    /// Identifier of a reservation against an inventory unit.
    AllocationId
);
uuid_id!(
    /// Identifier of a sellable product variant (SKU).
    ProductVariantId
);
uuid_id!(
    /// Identifier of a warehouse storage location.
    LocationId
);
uuid_id!(
    /// Identifier of a picking or packing work task.
    WorkTaskId
);
uuid_id!(
    /// Identifier of one line of a work task.
    TaskItemId
);
uuid_id!(
    /// Identifier of a pick bin staged between picking and packing.
    PickBinId
);
uuid_id!(
    /// Identifier of a packed, shippable package.
    PackageId
);
uuid_id!(
    /// Identifier of an operator or system user.
    UserId
);
uuid_id!(
    /// Correlates events produced by one logical operation.
    CorrelationId
);

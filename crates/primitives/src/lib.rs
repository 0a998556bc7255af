//! Value types shared by the configuration, component and candidate registries.

/// Configuration identities: pids, factory pids and bound locations.
pub mod pid;
/// Service ordering: ranking plus service id tie-break.
pub mod order;
/// Property sets delivered with configurations and registrations.
pub mod properties;

pub use order::ServiceOrder;
pub use pid::{ConfigIdentity, Location, Pid};
pub use properties::{Properties, PropertyValue, keys};

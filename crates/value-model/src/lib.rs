//! Dynamic value and type model for the Statecraft machine runtime.
//!
//! Values are acyclic tagged trees with explicit ownership: a value lives in
//! exactly one container at a time, deep copies are explicit via [`Value::deep_clone`],
//! and release happens on drop. The runtime core consumes this crate through a
//! deliberately narrow surface: clone, null construction, and typed tuple
//! packing.

/// Opaque host-defined payload support.
pub mod foreign;
/// Process identity primitives.
pub mod guid;
/// Value typing for payloads and locals tuples.
pub mod types;
/// The tagged dynamic value tree.
pub mod value;

pub use foreign::{ForeignData, ForeignValue};
pub use guid::ProcessGuid;
pub use types::ValueType;
pub use value::{MachineRef, Value, ValueError, ValueKind};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;

//! Value object trait: equality by value, not identity.
//!
//! Value objects have **no identity**; two value objects with the same
//! attribute values are the same value. A transfer rule embedded in an order
//! is one: it is only ever compared and copied, never addressed by key.

/// Marker trait for value objects.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct Fee {
///     status: String,
///     amount: i64,
/// }
///
/// impl ValueObject for Fee {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

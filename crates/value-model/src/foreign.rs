use std::fmt;

/// Host-implemented payload carried inside a [`crate::Value`].
///
/// The runtime never inspects foreign data beyond its declared type index; it
/// only clones and drops it. Equality defaults to `false`, which keeps value
/// comparison total without demanding it from host types.
pub trait ForeignData: fmt::Debug + Send + Sync {
    /// Index of the foreign-type declaration this payload belongs to.
    fn type_index(&self) -> usize;

    /// Deep copy of the payload.
    fn clone_boxed(&self) -> Box<dyn ForeignData>;

    /// Structural equality against another foreign payload.
    fn foreign_eq(&self, _other: &dyn ForeignData) -> bool {
        false
    }
}

/// Owning wrapper around boxed foreign data.
#[derive(Debug)]
pub struct ForeignValue(Box<dyn ForeignData>);

impl ForeignValue {
    /// Wraps host data into a value payload.
    #[must_use]
    pub fn new(data: impl ForeignData + 'static) -> Self {
        Self(Box::new(data))
    }

    /// The foreign-type declaration index of the wrapped data.
    #[must_use]
    pub fn type_index(&self) -> usize {
        self.0.type_index()
    }

    /// Borrows the wrapped data.
    #[must_use]
    pub fn data(&self) -> &dyn ForeignData {
        self.0.as_ref()
    }
}

impl Clone for ForeignValue {
    fn clone(&self) -> Self {
        Self(self.0.clone_boxed())
    }
}

impl PartialEq for ForeignValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.foreign_eq(other.0.as_ref())
    }
}

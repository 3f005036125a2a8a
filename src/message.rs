//! Type-erased messages carried between pipeline stages.
//!
//! Stages exchange [`Message`] values so each stage can recognise the types
//! it handles and forward everything else untouched. Ownership moves with the
//! message; dropping it is disposal.

use std::{any::Any, fmt};

/// Owned, type-erased message travelling through a pipeline.
///
/// ```
/// use bytes::Bytes;
/// use pipeframe::Message;
///
/// let msg = Message::new(Bytes::from_static(b"hi"));
/// assert!(msg.is::<Bytes>());
/// let msg = msg.downcast::<String>().expect_err("not a String");
/// assert_eq!(msg.downcast::<Bytes>().ok(), Some(Bytes::from_static(b"hi")));
/// ```
pub struct Message {
    value: Box<dyn Any + Send>,
    type_name: &'static str,
}

impl Message {
    /// Wrap `value` into a message.
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Returns true if the message holds a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool { self.value.is::<T>() }

    /// Take the value out as a `T`.
    ///
    /// # Errors
    ///
    /// Returns the message unchanged if it does not hold a `T`, so callers
    /// can forward it.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        let Self { value, type_name } = self;
        value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|value| Self { value, type_name })
    }

    /// Borrow the value as a `T` if it holds one.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> { self.value.downcast_ref::<T>() }

    /// Name of the wrapped type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str { self.type_name }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

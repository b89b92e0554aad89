#![forbid(unsafe_code)]

//! Capability-typed keys for entity component slots.
//!
//! A [`TypedKey<T>`] names one slot holding a `T`. It can be split into a
//! [`ReadKey<T>`] (read, has) and a [`WriteKey<T>`] (write, remove) so a
//! producer can hand out read access without granting mutation rights.
//!
//! Keys are cheap `Copy` tokens; their identity is a process-unique
//! [`KeyId`], so two keys created with the same name never alias.
//!
//! # Example
//!
//! ```
//! use kotae_core::{Runtime, TypedKey, ReadCap, WriteCap};
//!
//! let title = TypedKey::<String>::new("title");
//! let rt = Runtime::default();
//! let doc = rt.entity("doc");
//!
//! title.writer().write(&doc, "Untitled".to_string());
//! let reader = title.reader();
//! assert_eq!(reader.read(&doc).as_deref(), Some("Untitled"));
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::entity::Entity;

/// Process-unique key identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyId(u64);

impl KeyId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Untyped key: identity plus a debug name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawKey {
    id: KeyId,
    name: &'static str,
}

impl RawKey {
    #[inline]
    #[must_use]
    pub fn id(self) -> KeyId {
        self.id
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.name
    }
}

impl fmt::Display for RawKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id.0)
    }
}

/// Any key, regardless of capability.
pub trait AnyKey {
    fn raw(&self) -> RawKey;
}

/// Capability to read a `T` slot.
pub trait ReadCap<T>: AnyKey {
    fn read(&self, target: &Entity) -> Option<T>
    where
        Self: Sized,
        T: Clone + 'static,
    {
        target.try_get(self)
    }

    fn has(&self, target: &Entity) -> bool
    where
        Self: Sized,
    {
        target.has(self)
    }
}

/// Capability to write a `T` slot.
pub trait WriteCap<T>: AnyKey {
    /// Store `value`, replacing whatever the slot held.
    fn write(&self, target: &Entity, value: T)
    where
        Self: Sized,
        T: 'static,
    {
        target.write_slot(self.raw(), value);
    }

    /// Empty the slot, returning its previous value.
    fn remove(&self, target: &Entity) -> Option<T>
    where
        Self: Sized,
        T: 'static,
    {
        target.remove_slot(self.raw())
    }
}

// ---------------------------------------------------------------------------
// Key types
// ---------------------------------------------------------------------------

/// A named slot holding a `T`, with both capabilities.
pub struct TypedKey<T> {
    raw: RawKey,
    _marker: PhantomData<fn(T) -> T>,
}

/// Read-only view of a [`TypedKey`].
pub struct ReadKey<T> {
    raw: RawKey,
    _marker: PhantomData<fn() -> T>,
}

/// Write-only view of a [`TypedKey`].
pub struct WriteKey<T> {
    raw: RawKey,
    _marker: PhantomData<fn(T)>,
}

impl<T> TypedKey<T> {
    /// Create a fresh key. Every call yields a distinct identity.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            raw: RawKey {
                id: KeyId::next(),
                name,
            },
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn reader(&self) -> ReadKey<T> {
        ReadKey {
            raw: self.raw,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn writer(&self) -> WriteKey<T> {
        WriteKey {
            raw: self.raw,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn id(&self) -> KeyId {
        self.raw.id
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.raw.name
    }
}

macro_rules! impl_key_common {
    ($($key:ident),*) => {$(
        impl<T> Clone for $key<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $key<T> {}

        impl<T> fmt::Debug for $key<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($key)).field(&self.raw).finish()
            }
        }

        impl<T> AnyKey for $key<T> {
            fn raw(&self) -> RawKey {
                self.raw
            }
        }
    )*};
}

impl_key_common!(TypedKey, ReadKey, WriteKey);

impl<T> ReadCap<T> for TypedKey<T> {}
impl<T> ReadCap<T> for ReadKey<T> {}
impl<T> WriteCap<T> for TypedKey<T> {}
impl<T> WriteCap<T> for WriteKey<T> {}

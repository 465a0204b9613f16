//! Argument keys for memoized functions.
//!
//! Strings, integers, floats and booleans are keyed by value. Handles
//! (signals, collections, `Arc`s) are keyed by identity, and the key keeps
//! the handle alive so its identity cannot be reused while cached.

use std::any::{Any, TypeId};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::reactive::{Identity, ObservableMap, ObservableObject, ObservableVec, Signal};

/// Keys of one argument tuple.
pub type MemoKeys = SmallVec<[MemoKey; 4]>;

/// Identity key of a handle.
#[derive(Clone)]
pub struct HandleKey {
    id: usize,
    type_id: TypeId,
    _keep: Arc<dyn Any + Send + Sync>,
}

impl PartialEq for HandleKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.type_id == other.type_id
    }
}

impl Eq for HandleKey {}

impl Hash for HandleKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.type_id.hash(state);
    }
}

impl std::fmt::Debug for HandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({:#x})", self.id)
    }
}

/// One argument, as seen by the memo cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemoKey {
    Unit,
    Bool(bool),
    Int(i64),
    Uint(u64),
    /// Bit pattern of a float, with `-0.0` folded into `0.0` and every NaN
    /// into one NaN.
    Float(u64),
    Str(Arc<str>),
    Handle(HandleKey),
}

impl MemoKey {
    /// Key a handle by identity.
    pub fn handle<H>(handle: &H) -> Self
    where
        H: Identity + Clone + Send + Sync + 'static,
    {
        MemoKey::Handle(HandleKey {
            id: handle.identity(),
            type_id: TypeId::of::<H>(),
            _keep: Arc::new(handle.clone()),
        })
    }

    pub fn float(value: f64) -> Self {
        let canonical = if value == 0.0 {
            0.0f64
        } else if value.is_nan() {
            f64::NAN
        } else {
            value
        };
        MemoKey::Float(canonical.to_bits())
    }
}

/// Types usable as memoized-function arguments.
pub trait AsMemoKey {
    fn as_memo_key(&self) -> MemoKey;
}

impl AsMemoKey for MemoKey {
    fn as_memo_key(&self) -> MemoKey {
        self.clone()
    }
}

impl AsMemoKey for () {
    fn as_memo_key(&self) -> MemoKey {
        MemoKey::Unit
    }
}

impl AsMemoKey for bool {
    fn as_memo_key(&self) -> MemoKey {
        MemoKey::Bool(*self)
    }
}

macro_rules! signed_keys {
    ($($ty:ty),*) => {
        $(impl AsMemoKey for $ty {
            fn as_memo_key(&self) -> MemoKey {
                MemoKey::Int(*self as i64)
            }
        })*
    };
}

macro_rules! unsigned_keys {
    ($($ty:ty),*) => {
        $(impl AsMemoKey for $ty {
            fn as_memo_key(&self) -> MemoKey {
                MemoKey::Uint(*self as u64)
            }
        })*
    };
}

signed_keys!(i8, i16, i32, i64, isize);
unsigned_keys!(u8, u16, u32, u64, usize);

impl AsMemoKey for f64 {
    fn as_memo_key(&self) -> MemoKey {
        MemoKey::float(*self)
    }
}

impl AsMemoKey for f32 {
    fn as_memo_key(&self) -> MemoKey {
        MemoKey::float(f64::from(*self))
    }
}

impl AsMemoKey for String {
    fn as_memo_key(&self) -> MemoKey {
        MemoKey::Str(Arc::from(self.as_str()))
    }
}

impl AsMemoKey for &'static str {
    fn as_memo_key(&self) -> MemoKey {
        MemoKey::Str(Arc::from(*self))
    }
}

impl AsMemoKey for Arc<str> {
    fn as_memo_key(&self) -> MemoKey {
        MemoKey::Str(self.clone())
    }
}

impl<T> AsMemoKey for Arc<T>
where
    T: Send + Sync + 'static,
{
    fn as_memo_key(&self) -> MemoKey {
        MemoKey::handle(self)
    }
}

impl<T> AsMemoKey for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn as_memo_key(&self) -> MemoKey {
        MemoKey::handle(self)
    }
}

impl<V> AsMemoKey for ObservableVec<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn as_memo_key(&self) -> MemoKey {
        MemoKey::handle(self)
    }
}

impl<K, V> AsMemoKey for ObservableMap<K, V>
where
    K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn as_memo_key(&self) -> MemoKey {
        MemoKey::handle(self)
    }
}

impl<V> AsMemoKey for ObservableObject<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn as_memo_key(&self) -> MemoKey {
        MemoKey::handle(self)
    }
}

/// An argument tuple of a memoized function.
///
/// Implemented for tuples of up to four [`AsMemoKey`] values and for
/// [`MemoArgList`].
pub trait MemoArgs: Clone + Send + Sync + 'static {
    fn memo_keys(&self) -> MemoKeys;
}

impl MemoArgs for () {
    fn memo_keys(&self) -> MemoKeys {
        SmallVec::new()
    }
}

macro_rules! tuple_args {
    ($($name:ident),+) => {
        impl<$($name),+> MemoArgs for ($($name,)+)
        where
            $($name: AsMemoKey + Clone + Send + Sync + 'static),+
        {
            #[allow(non_snake_case)]
            fn memo_keys(&self) -> MemoKeys {
                let ($($name,)+) = self;
                smallvec::smallvec![$($name.as_memo_key()),+]
            }
        }
    };
}

tuple_args!(A);
tuple_args!(A, B);
tuple_args!(A, B, C);
tuple_args!(A, B, C, D);

/// Variable-length argument list.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoArgList<T>(pub Vec<T>);

impl<T> MemoArgs for MemoArgList<T>
where
    T: AsMemoKey + Clone + Send + Sync + 'static,
{
    fn memo_keys(&self) -> MemoKeys {
        self.0.iter().map(AsMemoKey::as_memo_key).collect()
    }
}

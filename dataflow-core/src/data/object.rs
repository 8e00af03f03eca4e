//! Data Objects
//!
//! A [`DataObject`] is the versioned payload exchanged between nodes. It
//! carries two pieces of change-detection state:
//!
//! - a [`Timestamp`], bumped by the owner on every mutation, and
//! - a [`DataIdentity`], fixed for the lifetime of the object.
//!
//! Consumers compare both against what they last observed. The identity
//! catches a producer that swaps its output for a different object without
//! bumping any version.
//!
//! # Thread Safety
//!
//! Payload, timestamp and residency live behind one `RwLock`, so a reader
//! taking a [`DataSnapshot`] never sees a timestamp that belongs to a
//! different payload than the one it got back.
//!
//! # Residency
//!
//! Device residency is reference counted per device. Nodes retain their
//! inputs on the devices they execute on and release them again when told
//! to; the counts let callers verify the accounting.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::device::{Device, DeviceId};

/// Type-erased payload of a data object.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Shared handle to a data object.
pub type DataHandle = Arc<DataObject>;

/// Modification timestamp of a data object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Stable identity of one data object.
///
/// Identities come from a process-wide counter and are never reused, so two
/// distinct objects can never compare equal here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataIdentity(u64);

impl DataIdentity {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// The change-detection pair a consumer caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataVersion {
    pub timestamp: Timestamp,
    pub identity: DataIdentity,
}

/// Payload and version read under a single lock acquisition.
#[derive(Clone)]
pub struct DataSnapshot {
    pub version: DataVersion,
    pub payload: Payload,
}

impl DataSnapshot {
    /// Downcast the payload to a concrete type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.payload).downcast::<T>().ok()
    }
}

impl fmt::Debug for DataSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSnapshot")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

struct DataState {
    timestamp: Timestamp,
    type_name: &'static str,
    payload: Payload,
    residency: IndexMap<DeviceId, usize>,
}

/// A versioned, type-erased payload.
pub struct DataObject {
    identity: DataIdentity,
    state: RwLock<DataState>,
}

impl DataObject {
    /// Wrap a value in a new data object at timestamp zero.
    pub fn new<T: Any + Send + Sync>(value: T) -> DataHandle {
        Self::with_timestamp(value, Timestamp::ZERO)
    }

    /// Wrap a value in a new data object with an explicit starting timestamp.
    pub fn with_timestamp<T: Any + Send + Sync>(value: T, timestamp: Timestamp) -> DataHandle {
        Arc::new(Self {
            identity: DataIdentity::next(),
            state: RwLock::new(DataState {
                timestamp,
                type_name: std::any::type_name::<T>(),
                payload: Arc::new(value),
                residency: IndexMap::new(),
            }),
        })
    }

    pub fn identity(&self) -> DataIdentity {
        self.identity
    }

    pub fn timestamp(&self) -> Timestamp {
        self.state.read().timestamp
    }

    /// Name of the current payload type.
    pub fn type_name(&self) -> &'static str {
        self.state.read().type_name
    }

    pub fn version(&self) -> DataVersion {
        DataVersion {
            timestamp: self.timestamp(),
            identity: self.identity,
        }
    }

    /// Read payload and version together.
    pub fn snapshot(&self) -> DataSnapshot {
        let state = self.state.read();
        DataSnapshot {
            version: DataVersion {
                timestamp: state.timestamp,
                identity: self.identity,
            },
            payload: Arc::clone(&state.payload),
        }
    }

    /// Downcast the current payload to a concrete type.
    pub fn payload<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.snapshot().downcast::<T>()
    }

    /// Check whether the current payload is of type `T`.
    pub fn is<T: Any + Send + Sync>(&self) -> bool {
        (*self.state.read().payload).is::<T>()
    }

    /// Replace the payload in place and bump the timestamp.
    ///
    /// Returns the new timestamp.
    pub fn replace<T: Any + Send + Sync>(&self, value: T) -> Timestamp {
        let mut state = self.state.write();
        state.payload = Arc::new(value);
        state.type_name = std::any::type_name::<T>();
        state.timestamp = state.timestamp.next();
        state.timestamp
    }

    /// Bump the timestamp without changing the payload.
    pub fn touch(&self) -> Timestamp {
        let mut state = self.state.write();
        state.timestamp = state.timestamp.next();
        state.timestamp
    }

    /// Take a residency reference on `device`.
    pub fn retain(&self, device: &Device) {
        let mut state = self.state.write();
        *state.residency.entry(device.id()).or_insert(0) += 1;
    }

    /// Drop a residency reference on `device`.
    ///
    /// Returns `false` if the object held no reference there.
    pub fn release(&self, device: &Device) -> bool {
        let mut state = self.state.write();
        let Some(count) = state.residency.get_mut(&device.id()) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            state.residency.shift_remove(&device.id());
        }
        true
    }

    pub fn residency_count(&self, device: DeviceId) -> usize {
        self.state.read().residency.get(&device).copied().unwrap_or(0)
    }

    pub fn is_resident_on(&self, device: DeviceId) -> bool {
        self.residency_count(device) > 0
    }
}

impl fmt::Debug for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("DataObject")
            .field("identity", &self.identity)
            .field("type", &self.type_name())
            .field("timestamp", &state.timestamp)
            .field("residency", &state.residency)
            .finish()
    }
}

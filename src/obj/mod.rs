//! Object model and registry
//!
//! Objects are fixed-width binary records identified by a 32-bit type id and
//! a 16-bit instance id. Each registered data type owns a synthetic
//! single-instance meta-object at `obj_id + 1` whose payload is the type's
//! [`Metadata`].

mod metadata;
pub mod notify;
mod registry;

pub use metadata::{AccessMode, Metadata, UpdateMode, METADATA_NUM_BYTES};
pub use registry::ObjectRegistry;

/// Largest payload an object type may declare (bounded by the wire frame)
pub const MAX_OBJECT_BYTES: usize = 256;

/// Instance id for single-instance types
pub const SINGLE_INSTANCE_ID: u16 = 0;

/// Immutable identity of one object type
///
/// Supplied externally per concrete type; the registry treats payloads as
/// opaque fixed-width byte records.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    /// 32-bit type id; `obj_id + 1` is reserved for the meta-object
    pub obj_id: u32,
    /// Human-readable type name, unique in the catalog
    pub name: String,
    /// Whether the type permits exactly one instance (inst id 0)
    pub single_instance: bool,
    /// Fixed serialized width in bytes
    pub num_bytes: usize,
    /// Metadata installed when the type is first registered
    pub default_metadata: Metadata,
}

impl TypeDescriptor {
    /// Descriptor with default metadata
    pub fn new(obj_id: u32, name: &str, single_instance: bool, num_bytes: usize) -> Self {
        TypeDescriptor {
            obj_id,
            name: name.to_string(),
            single_instance,
            num_bytes,
            default_metadata: Metadata::default(),
        }
    }
}

/// Distinguishes data objects from the meta-objects that describe them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Application data object; `meta_id` locates its meta-object
    Data {
        /// Type id of the companion meta-object
        meta_id: u32,
    },
    /// Metadata carrier for a data type
    Meta {
        /// Type id of the described data type
        parent_id: u32,
    },
}

/// Consistent copy of one object instance taken under the registry lock
#[derive(Debug, Clone)]
pub struct ObjectSnapshot {
    pub obj_id: u32,
    pub inst_id: u16,
    pub name: String,
    pub kind: ObjectKind,
    pub single_instance: bool,
    /// Current payload bytes, length equals the type's declared width
    pub data: Vec<u8>,
}

/// Event payload for `updated`, `new_object` and `new_instance` notifications
#[derive(Debug, Clone)]
pub struct ObjectEvent {
    pub obj_id: u32,
    pub inst_id: u16,
    /// Payload bytes at the time the event was raised
    pub data: Vec<u8>,
}

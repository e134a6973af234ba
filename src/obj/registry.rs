//! Object catalog keyed by (obj_id, inst_id)
//!
//! All instances, data and meta alike, live in a single arena; the name index
//! and per-type bookkeeping hold ids only. One inner lock serializes every
//! mutation and lookup (single effective writer). Notifications are raised
//! synchronously in mutation order, but handlers run after the lock is
//! released so a subscriber may call back into the registry.

use crate::error::{Error, Result};
use crate::obj::notify::{emit, Handler, SignalList, Token};
use crate::obj::{
    Metadata, ObjectEvent, ObjectKind, ObjectSnapshot, TypeDescriptor, MAX_OBJECT_BYTES,
    METADATA_NUM_BYTES,
};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Resolved type information, cheap to copy out of the catalog
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub obj_id: u32,
    pub name: String,
    pub kind: ObjectKind,
    pub single_instance: bool,
    pub num_bytes: usize,
}

struct TypeEntry {
    name: String,
    kind: ObjectKind,
    single_instance: bool,
    num_bytes: usize,
    /// Dense instance count; every inst id below this is occupied
    count: u16,
}

struct InstanceEntry {
    data: Vec<u8>,
    updated: SignalList<ObjectEvent>,
}

#[derive(Default)]
struct Inner {
    types: HashMap<u32, TypeEntry>,
    arena: HashMap<(u32, u16), InstanceEntry>,
    names: HashMap<String, u32>,
    new_object: SignalList<ObjectEvent>,
    new_instance: SignalList<ObjectEvent>,
}

/// Pending notification captured under the lock, delivered after release
type Pending = Vec<(Vec<Handler<ObjectEvent>>, ObjectEvent)>;

/// Catalog of object types and instances
pub struct ObjectRegistry {
    inner: Mutex<Inner>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        ObjectRegistry {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Register an object type instance.
    ///
    /// First registration of a type creates its meta-object at `obj_id + 1`
    /// and instance 0. `inst_id = None` assigns the next free id. An explicit
    /// id beyond the current count synthesizes the missing instances first
    /// (zero-filled, each raising `new_instance`); an explicit id that is
    /// already occupied fails with [`Error::InstanceConflict`], leaving any
    /// fillers from the same call in place.
    ///
    /// Returns the instance id actually assigned.
    pub fn register(&self, desc: &TypeDescriptor, inst_id: Option<u16>) -> Result<u16> {
        let mut pending: Pending = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            self.register_locked(&mut inner, desc, inst_id, &mut pending)
        };
        for (handlers, event) in &pending {
            emit(handlers, event);
        }
        result
    }

    fn register_locked(
        &self,
        inner: &mut Inner,
        desc: &TypeDescriptor,
        inst_id: Option<u16>,
        pending: &mut Pending,
    ) -> Result<u16> {
        if desc.num_bytes > MAX_OBJECT_BYTES {
            return Err(Error::InvalidParameter(format!(
                "object {} exceeds max payload ({} > {})",
                desc.name, desc.num_bytes, MAX_OBJECT_BYTES
            )));
        }

        if let Some(entry) = inner.types.get(&desc.obj_id) {
            match entry.kind {
                ObjectKind::Meta { .. } => {
                    return Err(Error::InvalidParameter(format!(
                        "{:#010x} is a meta-object id",
                        desc.obj_id
                    )))
                }
                ObjectKind::Data { .. } => {}
            }
            if entry.single_instance {
                // Already present, nothing to add
                return Ok(0);
            }
            return self.add_instance_locked(inner, desc.obj_id, inst_id, pending);
        }

        // New type: reserve obj_id + 1 for the meta-object
        let Some(meta_id) = desc.obj_id.checked_add(1) else {
            return Err(Error::InvalidParameter(format!(
                "no meta-object id above {:#010x}",
                desc.obj_id
            )));
        };
        if inner.types.contains_key(&meta_id) {
            return Err(Error::InvalidParameter(format!(
                "meta id {:#010x} already in use",
                meta_id
            )));
        }
        if inner.names.contains_key(&desc.name) {
            return Err(Error::InvalidParameter(format!(
                "type name '{}' already registered",
                desc.name
            )));
        }

        let meta_name = format!("{}Meta", desc.name);
        inner.types.insert(
            desc.obj_id,
            TypeEntry {
                name: desc.name.clone(),
                kind: ObjectKind::Data { meta_id },
                single_instance: desc.single_instance,
                num_bytes: desc.num_bytes,
                count: 1,
            },
        );
        inner.types.insert(
            meta_id,
            TypeEntry {
                name: meta_name.clone(),
                kind: ObjectKind::Meta {
                    parent_id: desc.obj_id,
                },
                single_instance: true,
                num_bytes: METADATA_NUM_BYTES,
                count: 1,
            },
        );
        inner.names.insert(desc.name.clone(), desc.obj_id);
        inner.names.insert(meta_name, meta_id);

        inner.arena.insert(
            (desc.obj_id, 0),
            InstanceEntry {
                data: vec![0u8; desc.num_bytes],
                updated: SignalList::new(),
            },
        );
        inner.arena.insert(
            (meta_id, 0),
            InstanceEntry {
                data: desc.default_metadata.to_bytes().to_vec(),
                updated: SignalList::new(),
            },
        );

        let data_event = ObjectEvent {
            obj_id: desc.obj_id,
            inst_id: 0,
            data: vec![0u8; desc.num_bytes],
        };
        let meta_event = ObjectEvent {
            obj_id: meta_id,
            inst_id: 0,
            data: desc.default_metadata.to_bytes().to_vec(),
        };
        pending.push((inner.new_object.snapshot(), data_event.clone()));
        pending.push((inner.new_object.snapshot(), meta_event));
        pending.push((inner.new_instance.snapshot(), data_event));

        log::debug!(
            "Registered type '{}' ({:#010x}), meta {:#010x}",
            desc.name,
            desc.obj_id,
            meta_id
        );

        // Explicit id on a fresh multi-instance type densifies past instance 0
        match inst_id {
            Some(id) if id > 0 && !desc.single_instance => {
                self.add_instance_locked(inner, desc.obj_id, Some(id), pending)
            }
            _ => Ok(0),
        }
    }

    fn add_instance_locked(
        &self,
        inner: &mut Inner,
        obj_id: u32,
        inst_id: Option<u16>,
        pending: &mut Pending,
    ) -> Result<u16> {
        let (count, num_bytes) = {
            let entry = inner.types.get(&obj_id).expect("type checked by caller");
            (entry.count, entry.num_bytes)
        };

        let target = match inst_id {
            None => count,
            Some(id) if id < count => {
                return Err(Error::InstanceConflict { obj_id, inst_id: id })
            }
            Some(id) => id,
        };

        // Fill any gap up to the requested id, then add it; the instance
        // list stays dense at every step
        for id in count..=target {
            inner.arena.insert(
                (obj_id, id),
                InstanceEntry {
                    data: vec![0u8; num_bytes],
                    updated: SignalList::new(),
                },
            );
            let event = ObjectEvent {
                obj_id,
                inst_id: id,
                data: vec![0u8; num_bytes],
            };
            pending.push((inner.new_instance.snapshot(), event));
        }
        inner
            .types
            .get_mut(&obj_id)
            .expect("type checked by caller")
            .count = target + 1;

        Ok(target)
    }

    /// Look up one instance, returning a consistent copy
    pub fn get(&self, obj_id: u32, inst_id: u16) -> Option<ObjectSnapshot> {
        let inner = self.inner.lock();
        Self::snapshot_locked(&inner, obj_id, inst_id)
    }

    /// Look up an instance by type name
    pub fn get_by_name(&self, name: &str, inst_id: u16) -> Option<ObjectSnapshot> {
        let inner = self.inner.lock();
        let obj_id = *inner.names.get(name)?;
        Self::snapshot_locked(&inner, obj_id, inst_id)
    }

    fn snapshot_locked(inner: &Inner, obj_id: u32, inst_id: u16) -> Option<ObjectSnapshot> {
        let ty = inner.types.get(&obj_id)?;
        let entry = inner.arena.get(&(obj_id, inst_id))?;
        Some(ObjectSnapshot {
            obj_id,
            inst_id,
            name: ty.name.clone(),
            kind: ty.kind,
            single_instance: ty.single_instance,
            data: entry.data.clone(),
        })
    }

    /// All instances of a type in ascending instance order; empty if unknown
    pub fn instances(&self, obj_id: u32) -> Vec<ObjectSnapshot> {
        let inner = self.inner.lock();
        let Some(ty) = inner.types.get(&obj_id) else {
            return Vec::new();
        };
        (0..ty.count)
            .filter_map(|id| Self::snapshot_locked(&inner, obj_id, id))
            .collect()
    }

    /// All instances looked up by type name, ascending; empty if unknown
    pub fn instances_by_name(&self, name: &str) -> Vec<ObjectSnapshot> {
        let inner = self.inner.lock();
        let Some(&obj_id) = inner.names.get(name) else {
            return Vec::new();
        };
        let Some(ty) = inner.types.get(&obj_id) else {
            return Vec::new();
        };
        (0..ty.count)
            .filter_map(|id| Self::snapshot_locked(&inner, obj_id, id))
            .collect()
    }

    /// Instance count for a type, or `None` if the type is unknown
    pub fn num_instances(&self, obj_id: u32) -> Option<usize> {
        let inner = self.inner.lock();
        inner.types.get(&obj_id).map(|t| t.count as usize)
    }

    /// Instance count looked up by type name
    pub fn num_instances_by_name(&self, name: &str) -> Option<usize> {
        let inner = self.inner.lock();
        let obj_id = *inner.names.get(name)?;
        inner.types.get(&obj_id).map(|t| t.count as usize)
    }

    /// Resolve type-level information for a given id
    pub fn type_info(&self, obj_id: u32) -> Option<TypeInfo> {
        let inner = self.inner.lock();
        inner.types.get(&obj_id).map(|t| TypeInfo {
            obj_id,
            name: t.name.clone(),
            kind: t.kind,
            single_instance: t.single_instance,
            num_bytes: t.num_bytes,
        })
    }

    /// Ids of all registered data types (meta-objects excluded), ascending
    pub fn data_object_ids(&self) -> Vec<u32> {
        let inner = self.inner.lock();
        let mut ids: Vec<u32> = inner
            .types
            .iter()
            .filter(|(_, t)| matches!(t.kind, ObjectKind::Data { .. }))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Keys of every live instance, data and meta, ascending
    pub fn instance_keys(&self) -> Vec<(u32, u16)> {
        let inner = self.inner.lock();
        let mut keys: Vec<(u32, u16)> = inner.arena.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Overwrite an instance's payload and raise its `updated` notification
    ///
    /// Used both by application code mutating local objects and by the
    /// protocol engine applying a received frame. The payload length must
    /// match the type's declared width exactly.
    pub fn write(&self, obj_id: u32, inst_id: u16, data: &[u8]) -> Result<()> {
        let (handlers, event) = {
            let mut inner = self.inner.lock();
            let Some(ty) = inner.types.get(&obj_id) else {
                return Err(Error::UnknownObject { obj_id, inst_id });
            };
            if data.len() != ty.num_bytes {
                return Err(Error::InvalidParameter(format!(
                    "payload length {} != declared width {} for {:#010x}",
                    data.len(),
                    ty.num_bytes,
                    obj_id
                )));
            }
            let Some(entry) = inner.arena.get_mut(&(obj_id, inst_id)) else {
                return Err(Error::UnknownObject { obj_id, inst_id });
            };
            entry.data.clear();
            entry.data.extend_from_slice(data);
            (
                entry.updated.snapshot(),
                ObjectEvent {
                    obj_id,
                    inst_id,
                    data: data.to_vec(),
                },
            )
        };
        emit(&handlers, &event);
        Ok(())
    }

    /// Current metadata for a data type (or the fixed meta-object metadata)
    pub fn metadata(&self, obj_id: u32) -> Result<Metadata> {
        let inner = self.inner.lock();
        let ty = inner
            .types
            .get(&obj_id)
            .ok_or(Error::UnknownObject { obj_id, inst_id: 0 })?;
        match ty.kind {
            ObjectKind::Meta { .. } => Ok(Metadata::meta_object_defaults()),
            ObjectKind::Data { meta_id } => {
                let entry = inner
                    .arena
                    .get(&(meta_id, 0))
                    .ok_or(Error::UnknownObject { obj_id: meta_id, inst_id: 0 })?;
                Metadata::from_bytes(&entry.data)
                    .ok_or_else(|| Error::Other("corrupt metadata payload".into()))
            }
        }
    }

    /// Replace a data type's metadata via its meta-object payload
    ///
    /// Meta-objects carry fixed metadata and cannot be reconfigured.
    pub fn set_metadata(&self, obj_id: u32, metadata: &Metadata) -> Result<()> {
        let meta_id = {
            let inner = self.inner.lock();
            let ty = inner
                .types
                .get(&obj_id)
                .ok_or(Error::UnknownObject { obj_id, inst_id: 0 })?;
            match ty.kind {
                ObjectKind::Meta { .. } => {
                    return Err(Error::NotSupported(
                        "meta-object metadata is read-only".into(),
                    ))
                }
                ObjectKind::Data { meta_id } => meta_id,
            }
        };
        self.write(meta_id, 0, &metadata.to_bytes())
    }

    /// Subscribe to one instance's `updated` notification
    pub fn subscribe_updated(
        &self,
        obj_id: u32,
        inst_id: u16,
        handler: Handler<ObjectEvent>,
    ) -> Result<Token> {
        let mut inner = self.inner.lock();
        let entry = inner
            .arena
            .get_mut(&(obj_id, inst_id))
            .ok_or(Error::UnknownObject { obj_id, inst_id })?;
        Ok(entry.updated.subscribe(handler))
    }

    /// Drop a per-instance subscription; unknown instances/tokens are ignored
    pub fn unsubscribe_updated(&self, obj_id: u32, inst_id: u16, token: Token) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.arena.get_mut(&(obj_id, inst_id)) {
            entry.updated.unsubscribe(token);
        }
    }

    /// Subscribe to registry-wide new-type notifications
    pub fn subscribe_new_object(&self, handler: Handler<ObjectEvent>) -> Token {
        self.inner.lock().new_object.subscribe(handler)
    }

    pub fn unsubscribe_new_object(&self, token: Token) {
        self.inner.lock().new_object.unsubscribe(token);
    }

    /// Subscribe to registry-wide new-instance notifications
    pub fn subscribe_new_instance(&self, handler: Handler<ObjectEvent>) -> Token {
        self.inner.lock().new_instance.subscribe(handler)
    }

    pub fn unsubscribe_new_instance(&self, token: Token) {
        self.inner.lock().new_instance.unsubscribe(token);
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

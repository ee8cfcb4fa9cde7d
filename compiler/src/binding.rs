// binding.rs — Per-task resource binding table
//
// Every bindable resource a task touches (buffer, texture, sampler) gets a
// binding slot in first-use order, starting at the table's base. The
// emitter declares a resource exactly when `get_or_insert` reports it as
// newly bound.
//
// Preconditions: none.
// Postconditions: bindings are dense: `base, base + 1, ..` in first-use order.
// Failure modes: none.
// Side effects: TRACE log per new binding.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

// ── Resource descriptors ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    RootNormal,
    RootAtomicI32,
    GlobalTemps,
    RandStates,
    Args,
    Rets,
    Texture,
    StorageTexture,
    Sampler,
}

impl ResourceKind {
    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::RootNormal => "root_normal",
            ResourceKind::RootAtomicI32 => "root_atomic_i32",
            ResourceKind::GlobalTemps => "global_temps",
            ResourceKind::RandStates => "rand_states",
            ResourceKind::Args => "args",
            ResourceKind::Rets => "rets",
            ResourceKind::Texture => "texture",
            ResourceKind::StorageTexture => "storage_texture",
            ResourceKind::Sampler => "sampler",
        }
    }
}

/// `(kind, id)` key of one bindable resource. `id` is the tree index for
/// root buffers, the texture id for textures and samplers, and 0 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub id: i32,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, id: i32) -> Self {
        ResourceDescriptor { kind, id }
    }

    /// Descriptor for a singleton resource (global temps, rand states, args, rets).
    pub fn singleton(kind: ResourceKind) -> Self {
        ResourceDescriptor { kind, id: 0 }
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind.name(), self.id)
    }
}

// ── Binding table ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingEntry {
    pub resource: ResourceDescriptor,
    pub binding: u32,
}

/// Ordered `descriptor -> binding` map. Serializes as the ordered list of
/// entries.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct BindingTable {
    #[serde(skip)]
    base: u32,
    entries: Vec<BindingEntry>,
    #[serde(skip)]
    index: HashMap<ResourceDescriptor, u32>,
}

impl BindingTable {
    pub fn new(base: u32) -> Self {
        BindingTable {
            base,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Binding of `resource`, allocating the next slot on first use. The
    /// flag is true when the slot was allocated by this call.
    pub fn get_or_insert(&mut self, resource: ResourceDescriptor) -> (u32, bool) {
        if let Some(&binding) = self.index.get(&resource) {
            return (binding, false);
        }
        let binding = self.base + self.entries.len() as u32;
        self.index.insert(resource, binding);
        self.entries.push(BindingEntry { resource, binding });
        tracing::trace!(resource = %resource, binding, "allocated binding");
        (binding, true)
    }

    pub fn get(&self, resource: &ResourceDescriptor) -> Option<u32> {
        self.index.get(resource).copied()
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First slot after the last allocated binding.
    pub fn next_binding(&self) -> u32 {
        self.base + self.entries.len() as u32
    }

    pub fn entries(&self) -> &[BindingEntry] {
        &self.entries
    }
}

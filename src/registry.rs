//! The process-wide, ordered list of registered transports (C2).

use std::sync::{OnceLock, RwLock, RwLockReadGuard};

use crate::protocol::ProtocolDescriptor;
use crate::protocols;

/// A singly-ordered list of registered [`ProtocolDescriptor`]s.
///
/// Registration appends to the tail, so the order of registration defines
/// lookup order (spec.md §3/§4.1). The set of names is expected to be
/// unique; registering a duplicate name is accepted without deduplication,
/// matching the source's documented "undefined, no dedup performed".
pub struct Registry {
    protocols: Vec<ProtocolDescriptor>,
}

impl Registry {
    /// Creates an empty registry with no built-in transports.
    pub const fn empty() -> Self {
        Registry {
            protocols: Vec::new(),
        }
    }

    /// Appends a descriptor to the registry.
    ///
    /// There is no analogue here to the source's forward-compatibility
    /// "declared size smaller than the full struct, zero-extend" trick
    /// (spec.md §4.1): Rust's `ProtocolDescriptor` is a value type with a
    /// fixed, versioned field set, so there is no ABI-sized struct to
    /// truncate against. See DESIGN.md for the corresponding Open Question.
    pub fn register(&mut self, descriptor: ProtocolDescriptor) {
        log::debug!("registering protocol {:?}", descriptor.name);
        self.protocols.push(descriptor);
    }

    /// Returns the descriptor whose name matches `scheme` exactly, in
    /// registration order.
    pub fn find(&self, scheme: &str) -> Option<&ProtocolDescriptor> {
        self.protocols.iter().find(|d| d.name == scheme)
    }

    /// Returns the first `nested_scheme`-capable descriptor matching
    /// `nested_scheme`, in registration order.
    pub fn find_nested(&self, nested_scheme: &str) -> Option<&ProtocolDescriptor> {
        self.protocols
            .iter()
            .find(|d| d.nested_scheme && d.name == nested_scheme)
    }

    /// Iterates the registered protocol names, skipping transports that
    /// lack the requested direction, the same filter `enum_protocols`
    /// applies in spec.md §4.6.
    pub fn names(&self, want_write: bool) -> impl Iterator<Item = &'static str> + '_ {
        self.protocols.iter().filter_map(move |d| {
            let has_direction = if want_write {
                d.supports_write
            } else {
                d.supports_read
            };
            has_direction.then_some(d.name)
        })
    }
}

static GLOBAL: OnceLock<RwLock<Registry>> = OnceLock::new();

fn with_builtins() -> Registry {
    let mut registry = Registry::empty();
    protocols::register_builtins(&mut registry);
    registry
}

/// Returns the process-wide registry, initialized on first use with the
/// crate's built-in transports (`file`, `tcp`).
pub fn global() -> RwLockReadGuard<'static, Registry> {
    GLOBAL
        .get_or_init(|| RwLock::new(with_builtins()))
        .read()
        .expect("protocol registry lock poisoned")
}

/// Registers an additional transport in the process-wide registry.
///
/// Registration is expected to happen during process startup, before any
/// lookups race it (spec.md §5): the registry is read-only thereafter.
pub fn register(descriptor: ProtocolDescriptor) {
    GLOBAL
        .get_or_init(|| RwLock::new(with_builtins()))
        .write()
        .expect("protocol registry lock poisoned")
        .register(descriptor);
}

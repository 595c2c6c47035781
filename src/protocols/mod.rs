//! Concrete transports shipped with this crate.
//!
//! The core only specifies the [`crate::protocol::Protocol`] contract
//! (spec.md §1 names concrete transports an explicit non-goal); these two
//! modules are conforming implementations that make the registry usable out
//! of the box and exercise the retry/timeout machinery against a real
//! non-blocking source (spec.md §10, points 1-2).

mod file;
mod tcp;

use crate::protocol::ProtocolDescriptor;
use crate::registry::Registry;

/// Registers the crate's built-in transports. Called once, lazily, the
/// first time the process-wide registry is touched.
pub(crate) fn register_builtins(registry: &mut Registry) {
    registry.register(
        ProtocolDescriptor::new("file", file::open)
            .readable()
            .writable(),
    );
    registry.register(
        ProtocolDescriptor::new("tcp", tcp::open)
            .readable()
            .writable()
            .network(),
    );
}

//! Stock signals and their distribution.
//!
//! Movement operations never talk to a transport directly: they emit typed
//! events (e.g. a low-stock alert) that are wrapped in an [`EventEnvelope`] and
//! fanned out through an [`EventBus`].

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};

//! `stockmaster-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, quantities, and the error taxonomy shared by every layer.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod quantity;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{DocumentId, LocationId, MovementId, ProductId, UserId, WarehouseId};
pub use quantity::{Quantity, Uom};
pub use value_object::ValueObject;

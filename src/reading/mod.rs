//! Reading model: the catalog, position selection and pacing
//!
//! - [`catalog`] - Books and their ordered chapters
//! - [`scheduler`] - [`PositionScheduler`], the next-position state machine
//! - [`behavior`] - [`BehaviorSimulator`], breaks and reading speed

pub mod behavior;
pub mod catalog;
pub mod scheduler;

pub use behavior::BehaviorSimulator;
pub use catalog::{placeholder_name, Book, Catalog, Chapter};
pub use scheduler::{Position, PositionScheduler};

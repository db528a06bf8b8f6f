//! Unit-of-work coordination for domain aggregates.
//!
//! This crate provides the transaction side of the toolkit:
//! - [`UnitOfWork`], the coordinator for one logical transaction spanning
//!   possibly many aggregates
//! - [`Repository`] for staging add/update/delete intent per aggregate root
//! - [`EventDispatcher`] and the [`EventHandler`] trait for delivering
//!   domain events to registered handlers before persistence
//!
//! The save ordering contract: pending events are collected from every
//! tracked entity, dispatched in a stable order, and only when every
//! dispatch succeeded are the staged changes persisted in a single atomic
//! batch. Any failure leaves persisted state untouched.

pub mod dispatch;
pub mod error;
pub mod repository;
pub mod uow;

pub use dispatch::{EventDispatcher, EventHandler, FnHandler};
pub use error::{DispatchError, InvalidStateError, PersistenceError, UnitOfWorkError};
pub use repository::{Repository, Tracked};
pub use uow::UnitOfWork;

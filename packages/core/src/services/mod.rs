//! Business Services
//!
//! This module contains the business rules of the save-and-restore tree:
//!
//! - `TreeDao` - node lifecycle, move/copy, paths, tags
//! - bundle operations on `TreeDao` - configurations, snapshots and
//!   composite snapshots written together with their payload
//! - `TreeError` / `ErrorKind` - service-level errors
//!
//! Services coordinate between the database layer and callers, enforcing
//! the tree invariants the document store cannot.

mod bundles;
pub mod error;
pub mod tree_dao;

pub use error::{ErrorKind, TreeError};
pub use tree_dao::TreeDao;

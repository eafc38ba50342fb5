//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! sync engine. Ports are interfaces that the engine depends on, but whose
//! implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ILocalStore`] - Local snapshot and mutation primitives
//! - [`IRemoteStore`] - Remote snapshot and mutation primitives
//! - [`IDriveApi`] - uuid-addressed remote drive operations
//! - [`IStateRepository`] - Persisted trees and hash cache per sync pair

pub mod drive;
pub mod local_store;
pub mod remote_store;
pub mod state_repository;

pub use drive::{DriveEntry, IDriveApi};
pub use local_store::ILocalStore;
pub use remote_store::IRemoteStore;
pub use state_repository::{IStateRepository, PersistedState};

//! Nimbus Core - Domain model and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `ItemPath`, `LocalItem`, `RemoteItem`, `Snapshot`, `Delta`, `SyncPair`
//! - **Port definitions** - Traits for adapters: `ILocalStore`, `IRemoteStore`, `IDriveApi`, `IStateRepository`
//! - **Configuration** - YAML config with defaults, validation and a builder
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure data and invariants with no I/O.
//! Ports define trait interfaces that adapter crates implement; the sync
//! engine in `nimbus-sync` orchestrates them.

pub mod config;
pub mod domain;
pub mod ports;

//! Nimbus Drive - Directory-backed drive API
//!
//! Provides [`DirectoryDrive`], an implementation of the uuid-addressed
//! `IDriveApi` port on top of a plain local directory:
//! - content blobs stored under `objects/<uuid>`
//! - a JSON catalog of every entry (parent, name, kind, trashed flag)
//! - file metadata filled in the way the encrypted remote reports it
//!   (bucket, region, key, chunk count, version, digest)
//!
//! It backs the daemon and every end-to-end test of the sync engine.
//!
//! ## Modules
//!
//! - [`directory`] - The drive implementation and its catalog

pub mod directory;

pub use directory::DirectoryDrive;

/// Size of one transfer chunk; used to report the chunk count of a file
pub const CHUNK_SIZE: u64 = 1024 * 1024;

/// Bucket name reported for every stored file
pub const BUCKET: &str = "nimbus-local";

/// Region reported for every stored file
pub const REGION: &str = "local";

//! Content addressable file storage for Stash.
//!
//! Files are identified by a hash of their bytes, so uploading the same
//! content twice yields the same id and one object on disk.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cas::{CasConfig, StorageManager};
//!
//! let storage = StorageManager::open(&CasConfig::with_base_path("./storage/files")).unwrap();
//!
//! let id = storage.save("hello.txt", b"Hello, World!").unwrap();
//! println!("Stored as: {}", id);
//!
//! let file = storage.get(id.as_str()).unwrap();
//! println!("{} is {} bytes", file.record.filename, file.data.len());
//! ```
//!
//! # Layout
//!
//! - `{base}/objects/{id}`: raw bytes, one flat file per distinct content
//! - `{base}/metadata/{id}.json`: record sidecar (filename, timestamps)
//!
//! The metadata index lives in memory and is rebuilt from `objects/` on
//! startup. Sidecars only restore what the bytes alone can't: the original
//! filename and upload time.

pub mod config;
pub mod error;
pub mod hash;
pub mod index;
pub mod manager;
pub mod metadata;
pub mod store;

pub use config::CasConfig;
pub use error::StorageError;
pub use hash::{ContentHash, HashError, HASH_HEX_LEN};
pub use index::MetadataIndex;
pub use manager::{StorageManager, MAX_FILE_SIZE};
pub use metadata::{FileRecord, StorageStats, StoredFile};
pub use store::{FileStore, MemoryStore, ObjectEntry, ObjectError, ObjectStore};

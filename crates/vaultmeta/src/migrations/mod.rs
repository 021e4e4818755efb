//! Schema migrations for the metadata store.
//!
//! Only one migration exists: the forward-only rekeying of `versions` from
//! its natural integer identifier to a surrogate primary key, in
//! [`version_uid`].

pub mod version_uid;

pub use version_uid::VersionUidRekey;

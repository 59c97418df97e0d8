//! Object storage and warehouse abstractions.
//!
//! [`traits`] defines the blocking provider interfaces the transfer side is
//! written against, [`helpers`] the path and credential utilities shared by
//! them, and [`fake`] in-memory implementations for tests and local runs.

pub mod fake;
pub mod helpers;
pub mod traits;

pub use fake::{FakeCredentials, FakeObjectStore, FakeWarehouse};
pub use helpers::{EnvCredentialProvider, ensure_scheme, object_uri, validate_key_path};
pub use traits::*;

//! Serialization helpers for configuration types

pub mod serde;

pub use self::serde::duration_millis;

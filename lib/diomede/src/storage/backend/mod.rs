//! A facade over the key-value store engine.
//!
//! Everything above this module speaks raw `&[u8]` keys and values and the
//! crate's error taxonomy; only this module touches LMDB types.

mod lmdb;

pub use lmdb::{Db, DbConfig, SubDb};

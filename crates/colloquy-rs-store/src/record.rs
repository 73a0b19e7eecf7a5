//! Record trait for values kept in a [`crate::JsonlStore`].

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::hash::Hash;

/// A value with a stable, caller-assigned identifier.
pub trait Record: Serialize + DeserializeOwned + Clone {
    /// Identifier type.
    type Id: Clone + Eq + Hash + Display;

    /// Return the record identifier.
    fn id(&self) -> &Self::Id;
}

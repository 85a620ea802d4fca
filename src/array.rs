//! Serde support for const-generic arrays, used via `#[serde(with = "crate::array")]`.
//!
//! Serde's derive only covers arrays up to a fixed length; the geometry and
//! forest types carry `[T; N]` fields with `N` a const generic, so they route
//! through these helpers instead.

use serde::de::{Deserialize, Deserializer, Error as _};
use serde::ser::{Serialize, SerializeTuple, Serializer};

pub fn serialize<S, T, const N: usize>(array: &[T; N], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    let mut tuple = serializer.serialize_tuple(N)?;

    for value in array {
        tuple.serialize_element(value)?;
    }

    tuple.end()
}

pub fn deserialize<'de, D, T, const N: usize>(deserializer: D) -> Result<[T; N], D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let values = Vec::<T>::deserialize(deserializer)?;
    let len = values.len();

    values
        .try_into()
        .map_err(|_| D::Error::invalid_length(len, &"an array of length N"))
}

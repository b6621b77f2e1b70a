// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Enforces a non-empty resource list.

use nonempty::NonEmpty;
use serde::Deserialize;

use super::ResourceDecl;

pub fn deserialize_resources<'de, D>(deserializer: D) -> Result<NonEmpty<ResourceDecl>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values: Vec<ResourceDecl> = Vec::deserialize(deserializer)?;
    NonEmpty::from_vec(values)
        .ok_or_else(|| serde::de::Error::custom("at least one resource is required"))
}

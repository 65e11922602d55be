//! Key types used to address factories and their outputs inside a
//! [`crate::factory_set::FactorySet`].

use std::any::TypeId;

/// An empty tag and `"default"` are both accepted as "the default tag";
/// callers should prefer `""`.
pub type Tag = String;

/// Primary lookup key: a factory is addressed by the `TypeId` of the
/// object type it produces plus a disambiguating tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FactoryKey {
    pub type_id: TypeId,
    pub tag: Tag,
}

impl FactoryKey {
    pub fn new(type_id: TypeId, tag: impl Into<Tag>) -> Self {
        FactoryKey { type_id, tag: tag.into() }
    }
}

/// Fallback lookup key used when a caller only has the type's name as a
/// string (e.g. from a `DEFTAG:<ClassName>` config override, or scripting
/// bindings that can't carry a `TypeId`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedFactoryKey {
    pub type_name: String,
    pub tag: Tag,
}

impl NamedFactoryKey {
    pub fn new(type_name: impl Into<String>, tag: impl Into<Tag>) -> Self {
        NamedFactoryKey { type_name: type_name.into(), tag: tag.into() }
    }
}

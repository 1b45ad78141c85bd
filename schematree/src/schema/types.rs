use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field-name to property definition mapping of a collection
pub type Properties = BTreeMap<String, Property>;

/// Top-level keys that are derived when a tree is loaded and never trusted from storage
pub const DERIVED_KEYS: &[&str] = &["path", "pathSegments", "parent"];

/// Definition of a single collection (an entity type) and the sub-collections it owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub subcollections: Vec<Collection>,
    /// Additional collection settings (description, icon, propertiesOrder, ...)
    /// carried through without interpretation
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Collection {
    /// A fresh collection with `name == id`, no properties and no sub-collections.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Collection {
            name: id.clone(),
            id,
            properties: Properties::new(),
            subcollections: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_property(mut self, field: impl Into<String>, property: Property) -> Self {
        self.properties.insert(field.into(), property);
        self
    }

    pub fn with_subcollection(mut self, child: Collection) -> Self {
        self.subcollections.push(child);
        self
    }

    /// A copy of this collection's own settings and properties, leaving out
    /// its sub-collections
    pub fn without_subcollections(&self) -> Collection {
        Collection {
            id: self.id.clone(),
            name: self.name.clone(),
            properties: self.properties.clone(),
            subcollections: Vec::new(),
            extra: self.extra.clone(),
        }
    }

    /// Number of property definitions directly on this collection
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Number of nodes in this collection's closure, itself included
    pub fn node_count(&self) -> usize {
        1 + self
            .subcollections
            .iter()
            .map(Collection::node_count)
            .sum::<usize>()
    }

    /// First direct child with the given id
    pub fn find_child(&self, id: &str) -> Option<&Collection> {
        self.subcollections.iter().find(|c| c.id == id)
    }

    pub fn find_child_mut(&mut self, id: &str) -> Option<&mut Collection> {
        self.subcollections.iter_mut().find(|c| c.id == id)
    }

    /// Sanitize a tree that was just read from storage or a seed file:
    /// derived keys are dropped, and a missing name falls back to the id.
    pub fn normalize_loaded(&mut self) {
        for key in DERIVED_KEYS {
            self.extra.remove(*key);
        }
        if self.name.is_empty() {
            self.name = self.id.clone();
        }
        for child in &mut self.subcollections {
            child.normalize_loaded();
        }
    }
}

/// An opaque field definition: a `dataType` discriminator plus
/// type-specific configuration that is copied and merged, never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    #[serde(rename = "dataType")]
    pub data_type: DataType,
    #[serde(flatten)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl Property {
    pub fn new(data_type: DataType) -> Self {
        Property {
            data_type,
            config: serde_json::Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// Property data type tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Number,
    Boolean,
    Date,
    Array,
    Set,
    Map,
    Reference,
    Geopoint,
    Url,
    File,
    #[serde(untagged)]
    Custom(std::string::String),
}

impl DataType {
    pub fn as_str(&self) -> &str {
        match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Array => "array",
            DataType::Set => "set",
            DataType::Map => "map",
            DataType::Reference => "reference",
            DataType::Geopoint => "geopoint",
            DataType::Url => "url",
            DataType::File => "file",
            DataType::Custom(tag) => tag,
        }
    }

    /// Parse a tag, keeping unknown tags verbatim.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "string" => DataType::String,
            "number" => DataType::Number,
            "boolean" => DataType::Boolean,
            "date" => DataType::Date,
            "array" => DataType::Array,
            "set" => DataType::Set,
            "map" => DataType::Map,
            "reference" => DataType::Reference,
            "geopoint" => DataType::Geopoint,
            "url" => DataType::Url,
            "file" => DataType::File,
            other => DataType::Custom(other.to_string()),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

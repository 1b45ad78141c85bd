use super::types::Collection;
use crate::error::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A seed file holds either a bare list of root collections
/// or a `collections:` mapping of root id to definition.
#[derive(Deserialize)]
#[serde(untagged)]
enum SeedFile {
    List(Vec<Collection>),
    Keyed {
        collections: BTreeMap<String, serde_yaml::Value>,
    },
}

/// Parse a YAML (or JSON) file of root collection trees
pub fn parse_collections(path: &Path) -> Result<Vec<Collection>> {
    let content = std::fs::read_to_string(path)?;
    parse_collections_str(&content)
}

/// Parse a YAML (or JSON) string of root collection trees.
/// Derived keys are stripped and missing names default to the id.
pub fn parse_collections_str(content: &str) -> Result<Vec<Collection>> {
    let seed: SeedFile = serde_yaml::from_str(content)?;
    let mut roots = match seed {
        SeedFile::List(roots) => roots,
        SeedFile::Keyed { collections } => {
            let mut roots = Vec::with_capacity(collections.len());
            for (id, mut value) in collections {
                if let Some(map) = value.as_mapping_mut() {
                    let key = serde_yaml::Value::String("id".into());
                    if !map.contains_key(&key) {
                        map.insert(key, serde_yaml::Value::String(id));
                    }
                }
                roots.push(serde_yaml::from_value(value)?);
            }
            roots
        }
    };
    for root in &mut roots {
        root.normalize_loaded();
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;

    #[test]
    fn test_parse_list_form() {
        let roots = parse_collections_str(
            r#"
- id: blog
  name: Blog
  description: A collection of blog entries
  properties:
    title: { dataType: string, name: Title }
  subcollections:
    - id: comments
      properties:
        body: { dataType: string, multiline: true }
"#,
        )
        .unwrap();

        assert_eq!(roots.len(), 1);
        let blog = &roots[0];
        assert_eq!(blog.properties["title"].data_type, DataType::String);
        assert_eq!(blog.extra["description"], "A collection of blog entries");
        assert_eq!(blog.subcollections[0].name, "comments");
    }

    #[test]
    fn test_parse_keyed_form_fills_ids() {
        let roots = parse_collections_str(
            r#"
collections:
  authors:
    name: Authors
    properties:
      born: { dataType: date }
  pages: {}
"#,
        )
        .unwrap();

        let ids: Vec<_> = roots.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["authors", "pages"]);
        assert_eq!(roots[1].name, "pages");
        assert_eq!(roots[0].properties["born"].data_type, DataType::Date);
    }

    #[test]
    fn test_parse_json_seed() {
        let roots =
            parse_collections_str(r#"[{ "id": "root", "subcollections": [{ "id": "sub1" }] }]"#)
                .unwrap();
        assert_eq!(roots[0].subcollections[0].id, "sub1");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_collections_str("just a string").is_err());
    }
}

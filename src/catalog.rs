//! Entity definitions and the read-only collection catalog.

/// Definition of one entity type known to this module's store.
#[derive(Debug, Clone)]
pub struct EntityDef {
    /// Entity type name, e.g. `CustomerProfile`.
    pub name: String,
    /// Persisted property names. Incoming sync data is projected onto this
    /// set before it reaches the save pipeline.
    pub properties: Vec<String>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, properties: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            name: name.into(),
            properties: properties.into_iter().map(str::to_owned).collect(),
        }
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p == name)
    }
}

/// Store naming convention: entity type name to collection name.
pub fn collection_name(entity: &str) -> String {
    let mut out = String::with_capacity(entity.len() + 4);

    for (i, c) in entity.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}

/// Maps collection names to entity definitions.
///
/// Collection names are computed once at construction; lookups afterwards
/// are read-only. When two definitions collide on a collection name the
/// first one wins.
#[derive(Default)]
pub struct EntityCatalog {
    by_collection: std::collections::HashMap<String, EntityDef>,
}

impl EntityCatalog {
    pub fn new(defs: impl IntoIterator<Item = EntityDef>) -> Self {
        let mut by_collection = std::collections::HashMap::new();

        for def in defs {
            by_collection
                .entry(collection_name(&def.name))
                .or_insert(def);
        }

        Self { by_collection }
    }

    pub fn resolve(&self, collection: &str) -> Option<&EntityDef> {
        self.by_collection.get(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_follow_the_convention() {
        assert_eq!(collection_name("CustomerProfile"), "customer_profile");
        assert_eq!(collection_name("Widget"), "widget");
        assert_eq!(collection_name("order"), "order");
    }

    #[test]
    fn first_resolution_wins() {
        let catalog = EntityCatalog::new([
            EntityDef::new("Widget", ["a"]),
            EntityDef::new("Widget", ["b"]),
        ]);

        assert_eq!(catalog.resolve("widget").unwrap().properties, vec!["a"]);
    }

    #[test]
    fn unknown_collection_is_none() {
        let catalog = EntityCatalog::new([]);
        assert!(catalog.resolve("ghost").is_none());
    }
}

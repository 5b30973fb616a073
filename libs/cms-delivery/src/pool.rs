use serde_json::Value;
use std::collections::HashMap;

/// Per-response lookup table from UUID to content entity.
///
/// Built from a side channel (`rels` or `links`) of a single response and
/// dropped with it.
#[derive(Debug, Default)]
pub struct EntityPool<'a> {
    by_uuid: HashMap<&'a str, &'a Value>,
}

impl<'a> EntityPool<'a> {
    /// Index a side channel that is either an array of entities or a map
    /// whose values are entities. Entries without a string `uuid` are skipped;
    /// on duplicates the first entry wins.
    #[must_use]
    pub fn from_side_channel(channel: Option<&'a Value>) -> Self {
        let entries: Box<dyn Iterator<Item = &'a Value> + 'a> = match channel {
            Some(Value::Array(items)) => Box::new(items.iter()),
            Some(Value::Object(map)) => Box::new(map.values()),
            _ => Box::new(std::iter::empty()),
        };

        let mut by_uuid = HashMap::new();
        for entity in entries {
            if let Some(uuid) = entity.get("uuid").and_then(Value::as_str) {
                by_uuid.entry(uuid).or_insert(entity);
            }
        }
        Self { by_uuid }
    }

    #[must_use]
    pub fn get(&self, uuid: &str) -> Option<&'a Value> {
        self.by_uuid.get(uuid).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_uuid.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_uuid.is_empty()
    }
}

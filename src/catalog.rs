use std::collections::{BTreeMap, BTreeSet};

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::state::{EventID, Value};

/// Namespace prefix of every standardized event id.
pub const DEFAULT_NAMESPACE: u64 = 47;

const NAMESPACE_SCALE: u64 = 1_000_000;
const TYPE_SCALE: u64 = 10_000;

static COYOTE_EVENTS: &str = include_str!("events.json");

/// Row parser attached to a root event. Deserialized directly from the
/// `function` field so that a misspelled name fails when the catalog loads.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Instruction,
    Cache,
    Stall,
    Request,
    Bank,
    Counter,
}

impl Category {
    /// Derived events this category addresses by position.
    pub fn slots(self) -> &'static [&'static str] {
        match self {
            Category::Instruction => &[
                "destination register",
                "source register 1",
                "source register 2",
                "source register 3",
                "immediate",
                "vector setup AVL",
                "vector setup SEW",
                "vector setup LMUL",
                "opcode",
                "address register",
                "address offset",
                "mask register",
                "overwritten source",
                "program counter",
                "VLEN",
                "ELEN",
                "element offsets",
            ],
            Category::Cache | Category::Bank => &["address", "memory object"],
            Category::Request => &["detail", "address", "memory object"],
            Category::Stall | Category::Counter => &[],
        }
    }

    /// Position of the derived event carrying the memory object label.
    pub fn object_slot(self) -> Option<usize> {
        match self {
            Category::Cache | Category::Bank => Some(1),
            Category::Request => Some(2),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, From)]
pub struct EventIdx(pub usize);

/// Label table of one event. Ids are handed out in first-seen order and are
/// never reused.
#[derive(Debug, Clone, Default)]
pub struct ValueLabels {
    ids: BTreeMap<String, Value>,
    order: Vec<String>,
}

impl ValueLabels {
    pub fn register(&mut self, label: &str) -> Value {
        if let Some(id) = self.ids.get(label) {
            return *id;
        }
        let id = self.order.len() as Value;
        self.ids.insert(label.to_owned(), id);
        self.order.push(label.to_owned());
        id
    }

    pub fn lookup(&self, label: &str) -> Option<Value> {
        self.ids.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Value, &str)> {
        self.order
            .iter()
            .enumerate()
            .map(|(id, label)| (id as Value, label.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct EventDefinition {
    pub name: String,
    pub local_id: u64,
    pub id: EventID,
    pub multiplier: Value,
    pub radix: u32,
    pub category: Option<Category>,
    pub kinds: Vec<String>,
    pub values: ValueLabels,
    pub parent: Option<EventIdx>,
    pub children: Vec<EventIdx>,
}

impl EventDefinition {
    pub fn scale(&self, raw: Value) -> Value {
        raw.wrapping_mul(self.multiplier)
    }
}

/// How rows of one `event_type` are encoded: the parser category, the root
/// event owning the category, and the event the kind was declared on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KindBinding {
    pub category: Category,
    pub root: EventIdx,
    pub event: EventIdx,
}

#[derive(Debug, Deserialize)]
struct TraceTypeConfig {
    #[serde(rename = "typeIndex")]
    type_index: u64,
    events: Vec<EventConfig>,
}

#[derive(Debug, Deserialize)]
struct EventConfig {
    #[serde(rename = "eventName")]
    name: String,
    #[serde(rename = "eventID")]
    id: u64,
    #[serde(rename = "multiplicator", default = "default_multiplier")]
    multiplier: Value,
    #[serde(rename = "function", default)]
    category: Option<Category>,
    #[serde(default)]
    kinds: Vec<String>,
    #[serde(default)]
    radix: Option<u32>,
    #[serde(default)]
    values: Vec<String>,
    #[serde(rename = "derivedEvents", default)]
    derived: Vec<EventConfig>,
    #[serde(default)]
    expand: Option<Expansion>,
}

#[derive(Debug, Deserialize)]
struct Expansion {
    name: String,
    count: u64,
}

fn default_multiplier() -> Value {
    1
}

/// Hierarchical registry of event kinds. Events live in an arena and refer
/// to each other by `EventIdx`; the tree is built once at load.
#[derive(Debug, Clone)]
pub struct Catalog {
    trace_type: String,
    type_index: u64,
    events: Vec<EventDefinition>,
    roots: Vec<EventIdx>,
    kinds: BTreeMap<String, KindBinding>,
}

impl Catalog {
    pub fn load(json: &str, trace_type: &str) -> Result<Catalog> {
        let mut types: BTreeMap<String, TraceTypeConfig> = serde_json::from_str(json)?;
        let config = types
            .remove(trace_type)
            .ok_or_else(|| Error::Config(format!("trace type {:?} not found", trace_type)))?;

        let mut catalog = Catalog {
            trace_type: trace_type.to_owned(),
            type_index: config.type_index,
            events: Vec::new(),
            roots: Vec::new(),
            kinds: BTreeMap::new(),
        };
        for event in &config.events {
            let idx = catalog.add_event(event, None)?;
            catalog.roots.push(idx);
        }
        catalog.bind_kinds()?;
        Ok(catalog)
    }

    /// Looks `trace_type` up in the catalog compiled into the binary.
    pub fn builtin(trace_type: &str) -> Result<Catalog> {
        Catalog::load(COYOTE_EVENTS, trace_type)
    }

    pub fn default_coyote() -> Result<Catalog> {
        Catalog::builtin("coyote")
    }

    fn add_event(&mut self, config: &EventConfig, parent: Option<EventIdx>) -> Result<EventIdx> {
        let radix = config.radix.unwrap_or(10);
        if radix != 10 && radix != 16 {
            return Err(Error::Config(format!(
                "event {:?}: radix must be 10 or 16, got {}",
                config.name, radix
            )));
        }
        if parent.is_some() && config.category.is_some() {
            return Err(Error::Config(format!(
                "event {:?}: only top-level events may declare a function",
                config.name
            )));
        }

        let idx = EventIdx(self.events.len());
        let mut values = ValueLabels::default();
        for label in &config.values {
            values.register(label);
        }
        self.events.push(EventDefinition {
            name: config.name.clone(),
            local_id: config.id,
            id: EventID(config.id),
            multiplier: config.multiplier,
            radix,
            category: config.category,
            kinds: config.kinds.clone(),
            values,
            parent,
            children: Vec::new(),
        });

        for derived in &config.derived {
            let child = self.add_event(derived, Some(idx))?;
            self.events[idx.0].children.push(child);
        }
        if let Some(expand) = &config.expand {
            for k in 0..expand.count {
                let child = EventIdx(self.events.len());
                let local_id = config.id + 1 + k;
                self.events.push(EventDefinition {
                    name: format!("{} {}", expand.name, k),
                    local_id,
                    id: EventID(local_id),
                    multiplier: config.multiplier,
                    radix: 10,
                    category: None,
                    kinds: Vec::new(),
                    values: ValueLabels::default(),
                    parent: Some(idx),
                    children: Vec::new(),
                });
                self.events[idx.0].children.push(child);
            }
        }

        if let Some(category) = config.category {
            let needed = category.slots().len();
            let found = self.events[idx.0].children.len();
            if found < needed {
                return Err(Error::Config(format!(
                    "event {:?} uses function {:?}, which needs {} derived events ({}), found {}",
                    config.name,
                    category,
                    needed,
                    category.slots().join(", "),
                    found
                )));
            }
        }
        Ok(idx)
    }

    fn bind_kinds(&mut self) -> Result<()> {
        for idx in 0..self.events.len() {
            let event = &self.events[idx];
            if event.kinds.is_empty() {
                continue;
            }
            let root = self.root_of(EventIdx(idx));
            let category = self.events[root.0].category.ok_or_else(|| {
                Error::Config(format!(
                    "event {:?} lists trace kinds but no enclosing event declares a function",
                    event.name
                ))
            })?;
            for kind in &event.kinds {
                let binding = KindBinding {
                    category,
                    root,
                    event: EventIdx(idx),
                };
                if self.kinds.insert(kind.clone(), binding).is_some() {
                    return Err(Error::Config(format!(
                        "trace kind {:?} is bound to more than one event",
                        kind
                    )));
                }
            }
        }
        Ok(())
    }

    fn root_of(&self, mut idx: EventIdx) -> EventIdx {
        while let Some(parent) = self.events[idx.0].parent {
            idx = parent;
        }
        idx
    }

    /// Rewrites every id to `namespace * 10^6 + typeIndex * 10^4 + localId`.
    pub fn standardize_ids(&mut self, namespace: u64) -> Result<()> {
        if self.type_index >= NAMESPACE_SCALE / TYPE_SCALE {
            return Err(Error::Config(format!(
                "type index {} does not fit in two digits",
                self.type_index
            )));
        }
        let mut seen = BTreeSet::new();
        for event in &mut self.events {
            if event.local_id >= TYPE_SCALE {
                return Err(Error::Config(format!(
                    "event {:?}: local id {} does not fit in four digits",
                    event.name, event.local_id
                )));
            }
            let id = EventID(
                namespace * NAMESPACE_SCALE + self.type_index * TYPE_SCALE + event.local_id,
            );
            if !seen.insert(id) {
                return Err(Error::Config(format!(
                    "event {:?}: duplicate event id {}",
                    event.name, id
                )));
            }
            event.id = id;
        }
        Ok(())
    }

    pub fn register_value(&mut self, event: EventIdx, label: &str) -> Value {
        self.events[event.0].values.register(label)
    }

    pub fn lookup_value(&self, event: EventIdx, label: &str) -> Option<Value> {
        self.events[event.0].values.lookup(label)
    }

    pub fn trace_type(&self) -> &str {
        &self.trace_type
    }

    pub fn event(&self, idx: EventIdx) -> &EventDefinition {
        &self.events[idx.0]
    }

    pub fn id(&self, idx: EventIdx) -> EventID {
        self.events[idx.0].id
    }

    pub fn roots(&self) -> &[EventIdx] {
        &self.roots
    }

    pub fn binding(&self, kind: &str) -> Option<KindBinding> {
        self.kinds.get(kind).copied()
    }

    pub fn slot(&self, root: EventIdx, n: usize) -> EventIdx {
        self.events[root.0].children[n]
    }

    pub fn find(&self, name: &str) -> Option<EventIdx> {
        self.events
            .iter()
            .position(|e| e.name == name)
            .map(EventIdx)
    }

    pub fn roots_with_category(&self, category: Category) -> impl Iterator<Item = EventIdx> + '_ {
        self.roots
            .iter()
            .copied()
            .filter(move |root| self.events[root.0].category == Some(category))
    }

    /// Every event that carries a memory object label.
    pub fn object_events(&self) -> Vec<EventIdx> {
        self.roots
            .iter()
            .filter_map(|root| {
                let category = self.events[root.0].category?;
                category.object_slot().map(|n| self.slot(*root, n))
            })
            .collect()
    }

    /// Depth-first, parents before their derived events.
    pub fn walk(&self) -> Vec<EventIdx> {
        fn visit(catalog: &Catalog, idx: EventIdx, result: &mut Vec<EventIdx>) {
            result.push(idx);
            for child in &catalog.events[idx.0].children {
                visit(catalog, *child, result);
            }
        }
        let mut result = Vec::with_capacity(self.events.len());
        for root in &self.roots {
            visit(self, *root, &mut result);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = r#"{
        "sim": {
            "typeIndex": 3,
            "events": [
                { "eventName": "Stall", "eventID": 1, "function": "stall",
                  "kinds": ["stall", "resume"], "values": ["resume"],
                  "derivedEvents": [
                      { "eventName": "Resumed by tile", "eventID": 2, "kinds": ["resume_tile"] }
                  ] },
                { "eventName": "Counter", "eventID": 10, "multiplicator": 8 }
            ]
        }
    }"#;

    #[test]
    fn test_load() {
        let catalog = Catalog::load(SMALL, "sim").unwrap();
        assert_eq!(catalog.roots().len(), 2);
        let stall = catalog.roots()[0];
        assert_eq!(catalog.event(stall).name, "Stall");
        assert_eq!(catalog.event(stall).children.len(), 1);
        let counter = catalog.roots()[1];
        assert_eq!(catalog.event(counter).multiplier, 8);
        assert_eq!(catalog.event(counter).scale(3), 24);
        assert_eq!(catalog.lookup_value(stall, "resume"), Some(0));
    }

    #[test]
    fn test_standardize_ids() {
        let mut catalog = Catalog::load(SMALL, "sim").unwrap();
        catalog.standardize_ids(DEFAULT_NAMESPACE).unwrap();
        let ids: Vec<_> = catalog.walk().into_iter().map(|e| catalog.id(e)).collect();
        assert_eq!(ids, vec![EventID(47030001), EventID(47030002), EventID(47030010)]);
    }

    #[test]
    fn test_standardize_is_stable() {
        let mut a = Catalog::default_coyote().unwrap();
        let mut b = Catalog::default_coyote().unwrap();
        a.standardize_ids(DEFAULT_NAMESPACE).unwrap();
        b.standardize_ids(DEFAULT_NAMESPACE).unwrap();
        let stall_a = a.find("Core stall").unwrap();
        let stall_b = b.find("Core stall").unwrap();
        assert_eq!(a.id(stall_a), b.id(stall_b));
    }

    #[test]
    fn test_duplicate_id() {
        let json = r#"{ "sim": { "typeIndex": 1, "events": [
            { "eventName": "A", "eventID": 5 },
            { "eventName": "B", "eventID": 5 } ] } }"#;
        let mut catalog = Catalog::load(json, "sim").unwrap();
        assert!(matches!(
            catalog.standardize_ids(DEFAULT_NAMESPACE),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_missing_field() {
        let json = r#"{ "sim": { "typeIndex": 1, "events": [ { "eventName": "A" } ] } }"#;
        assert!(matches!(Catalog::load(json, "sim"), Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_function() {
        let json = r#"{ "sim": { "typeIndex": 1, "events": [
            { "eventName": "A", "eventID": 1, "function": "eventIntegerParser" } ] } }"#;
        assert!(matches!(Catalog::load(json, "sim"), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_slots() {
        let json = r#"{ "sim": { "typeIndex": 1, "events": [
            { "eventName": "L1", "eventID": 1, "function": "cache", "kinds": ["l1_miss"],
              "derivedEvents": [ { "eventName": "L1 address", "eventID": 2 } ] } ] } }"#;
        assert!(matches!(Catalog::load(json, "sim"), Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_trace_type() {
        assert!(matches!(Catalog::load(SMALL, "spike"), Err(Error::Config(_))));
    }

    #[test]
    fn test_register_value() {
        let mut catalog = Catalog::load(SMALL, "sim").unwrap();
        let counter = catalog.roots()[1];
        assert_eq!(catalog.register_value(counter, "vadd"), 0);
        assert_eq!(catalog.register_value(counter, "vle32"), 1);
        assert_eq!(catalog.register_value(counter, "vadd"), 0);
        assert_eq!(catalog.register_value(counter, "vse32"), 2);
        assert_eq!(catalog.lookup_value(counter, "vle32"), Some(1));
        assert_eq!(catalog.lookup_value(counter, "vmul"), None);
    }

    #[test]
    fn test_bindings() {
        let catalog = Catalog::load(SMALL, "sim").unwrap();
        let stall = catalog.roots()[0];
        let binding = catalog.binding("resume_tile").unwrap();
        assert_eq!(binding.category, Category::Stall);
        assert_eq!(binding.root, stall);
        assert_eq!(binding.event, catalog.slot(stall, 0));
        assert_eq!(catalog.binding("stall").unwrap().event, stall);
        assert!(catalog.binding("l2_miss").is_none());
    }

    #[test]
    fn test_default_catalog() {
        let catalog = Catalog::default_coyote().unwrap();
        assert_eq!(catalog.trace_type(), "coyote");
        let binding = catalog.binding("instruction").unwrap();
        assert_eq!(binding.category, Category::Instruction);
        let offsets = catalog.slot(binding.root, 16);
        assert_eq!(catalog.event(offsets).children.len(), 256);
        assert_eq!(catalog.object_events().len(), 4);
        assert_eq!(catalog.binding("KI").unwrap().category, Category::Stall);
    }
}

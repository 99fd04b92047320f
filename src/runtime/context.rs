/// Execution context carried through a traversal
///
/// The context is a JSON object that always holds the `contact`, `vars` and
/// `meta` namespaces. Handlers read and write it through dotted paths; it is
/// serialized verbatim into suspension records and restored on resume.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CONTACT: &str = "contact";
pub const VARS: &str = "vars";
pub const META: &str = "meta";

/// Field of `contact` holding the channel identifier of the conversation
pub const CHANNEL_ID_FIELD: &str = "wa_id";

/// Mutable working state of one traversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct ExecutionContext {
    root: Map<String, Value>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::from(Map::new())
    }
}

impl From<Map<String, Value>> for ExecutionContext {
    fn from(mut root: Map<String, Value>) -> Self {
        for namespace in [CONTACT, VARS, META] {
            let slot = root.entry(namespace).or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
        }
        Self { root }
    }
}

impl From<ExecutionContext> for Map<String, Value> {
    fn from(context: ExecutionContext) -> Self {
        context.root
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh context for an inbound conversation: `contact.wa_id` set, everything else empty
    pub fn for_conversation(channel_id: &str) -> Self {
        let mut context = Self::new();
        context.set_path("contact.wa_id", Value::String(channel_id.to_string()));
        context
    }

    /// Build a context from an arbitrary JSON value; non-objects yield an empty context
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::from(map),
            _ => Self::default(),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    pub fn root(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn contact(&self) -> &Map<String, Value> {
        self.namespace(CONTACT)
    }

    pub fn vars(&self) -> &Map<String, Value> {
        self.namespace(VARS)
    }

    pub fn meta(&self) -> &Map<String, Value> {
        self.namespace(META)
    }

    fn namespace(&self, name: &str) -> &Map<String, Value> {
        static EMPTY: once_cell::sync::Lazy<Map<String, Value>> = once_cell::sync::Lazy::new(Map::new);
        self.root.get(name).and_then(Value::as_object).unwrap_or(&EMPTY)
    }

    /// Channel identifier of the conversation (`contact.wa_id`), if any
    pub fn channel_id(&self) -> Option<String> {
        match self.contact().get(CHANNEL_ID_FIELD)? {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn get_path(&self, path: &str) -> Option<&Value> {
        get_path_in(&self.root, path)
    }

    pub fn set_path(&mut self, path: &str, value: Value) {
        set_path_in(&mut self.root, path, value);
    }
}

/// Resolve a dotted path against a JSON value
///
/// Numeric segments index into arrays. Any missing or non-container
/// intermediate resolves to `None`.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Same as [`get_path`] but starting from an object map
pub fn get_path_in<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let first = root.get(head)?;
    match rest {
        Some(rest) => get_path(first, rest),
        None => Some(first),
    }
}

/// Assign a value at a dotted path, creating intermediate objects as needed
///
/// Scalar or null intermediates are replaced by objects. Array intermediates
/// are descended by index when the segment is an in-range index. An empty
/// path leaves the root untouched.
pub fn set_path_in(root: &mut Map<String, Value>, path: &str, value: Value) {
    if path.is_empty() {
        return;
    }
    let segments: Vec<&str> = path.split('.').collect();
    let Some((leaf, parents)) = segments.split_last() else {
        return;
    };

    let mut current = root;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(leaf.to_string(), value);
}

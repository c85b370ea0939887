use std::fmt;

use serde_json::{Map, Value};

/// Slash separated location inside the realtime document tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses `a/b/c`; empty segments (leading, trailing or doubled slashes) are ignored.
    pub fn parse(raw: &str) -> Self {
        Self {
            segments: raw
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(StorePath::parse(segment).segments);
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// True when `other` equals this path or lives below it.
    pub fn contains(&self, other: &StorePath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Segments of `self` below `ancestor`, if `ancestor` contains `self`.
    pub fn strip_prefix(&self, ancestor: &StorePath) -> Option<&[String]> {
        ancestor
            .contains(self)
            .then(|| &self.segments[ancestor.segments.len()..])
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl From<&str> for StorePath {
    fn from(value: &str) -> Self {
        StorePath::parse(value)
    }
}

/// Reads the value at `segments` below `root`. Null counts as absent.
pub fn value_at<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    (!current.is_null()).then_some(current)
}

/// Writes `value` at `segments` below `root`, creating intermediate objects.
///
/// Writing `null` removes the key, and objects left empty by a removal are
/// pruned, mirroring how realtime databases treat absent data.
pub fn set_at(root: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *root = value;
        return;
    };
    if !root.is_object() {
        if value.is_null() {
            return;
        }
        *root = Value::Object(Map::new());
    }
    let Some(object) = root.as_object_mut() else {
        return;
    };
    if rest.is_empty() {
        if value.is_null() {
            object.remove(head);
        } else {
            object.insert(head.clone(), value);
        }
        return;
    }
    let child = object.entry(head.clone()).or_insert(Value::Null);
    set_at(child, rest, value);
    if child.is_null() || child.as_object().is_some_and(Map::is_empty) {
        object.remove(head);
    }
}

/// Applies a shallow patch: each key of `patch` is written below `segments`.
pub fn merge_at(root: &mut Value, segments: &[String], patch: &Map<String, Value>) {
    for (key, value) in patch {
        let mut child = segments.to_vec();
        child.extend(StorePath::parse(key).segments);
        set_at(root, &child, value.clone());
    }
}

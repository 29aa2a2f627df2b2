use std::collections::btree_map::Entry;

use crate::error::PathError;
use crate::names::FieldNames;
use crate::path::{Path, Segment};
use crate::value::{Map, Value};

/// A mapping addressed by `/`-delimited paths.
///
/// When the document carries a [`FieldNames`] table, mapped segments are
/// looked up by their long name first and then by their compact code, and
/// new keys are written with the compact code. Keys that already exist are
/// always reused verbatim, so a value written under one spelling is found
/// again under the same spelling.
#[derive(Debug, Clone, Default)]
pub struct PathDocument {
    root: Map,
    names: Option<FieldNames>,
    defaults: Vec<(Path<'static>, Value)>,
}

impl PartialEq for PathDocument {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl PathDocument {
    /// An empty document without name translation.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty document that translates through `names`.
    pub fn with_names(names: FieldNames) -> Self {
        Self {
            names: Some(names),
            ..Self::default()
        }
    }

    pub fn from_map(root: Map, names: Option<FieldNames>) -> Self {
        Self {
            root,
            names,
            defaults: Vec::new(),
        }
    }

    /// Wrap a value, which must be a mapping.
    pub fn from_value(value: Value, names: Option<FieldNames>) -> Result<Self, PathError> {
        match value {
            Value::Map(root) => Ok(Self::from_map(root, names)),
            other => Err(PathError::RootNotMapping(other.type_name())),
        }
    }

    pub fn names(&self) -> Option<&FieldNames> {
        self.names.as_ref()
    }

    pub fn as_map(&self) -> &Map {
        &self.root
    }

    pub fn into_map(self) -> Map {
        self.root
    }

    pub fn into_value(self) -> Value {
        Value::Map(self.root)
    }

    /// Register values returned by [`PathDocument::get`] when nothing is
    /// stored at their path. Later registrations for the same path win.
    pub fn set_defaults<'p, I, P>(&mut self, defaults: I)
    where
        I: IntoIterator<Item = (P, Value)>,
        P: Into<Path<'p>>,
    {
        for (path, value) in defaults {
            let path = path.into().into_owned();
            self.defaults.retain(|(existing, _)| !same_names(existing, &path));
            self.defaults.push((path, value));
        }
    }

    /// Value stored at `path`, else its registered default.
    pub fn get<'p>(&self, path: impl Into<Path<'p>>) -> Option<&Value> {
        let path = path.into();
        if path.is_empty() {
            return None;
        }
        self.lookup(&path).or_else(|| self.default_for(&path))
    }

    pub fn get_or<'a, 'p>(&'a self, path: impl Into<Path<'p>>, fallback: &'a Value) -> &'a Value {
        self.get(path).unwrap_or(fallback)
    }

    /// Like [`PathDocument::get`], but a missing value is an error.
    pub fn require<'p>(&self, path: impl Into<Path<'p>>) -> Result<&Value, PathError> {
        let path = path.into();
        self.get(&path)
            .ok_or_else(|| PathError::NotFound(path.to_string()))
    }

    /// Whether a value is stored at `path`. Defaults do not count.
    pub fn exists<'p>(&self, path: impl Into<Path<'p>>) -> bool {
        let path = path.into();
        !path.is_empty() && self.lookup(&path).is_some()
    }

    pub fn get_mut<'p>(&mut self, path: impl Into<Path<'p>>) -> Option<&mut Value> {
        let path = path.into();
        let (first, rest) = path.segments().split_first()?;
        let names = self.names.as_ref();

        let key = stored_key(names, &self.root, first)?;
        let mut current = self.root.get_mut(&key)?;
        for segment in rest {
            let map = current.as_map_mut()?;
            let key = stored_key(names, map, segment)?;
            current = map.get_mut(&key)?;
        }
        Some(current)
    }

    /// Store `value` at `path`, creating intermediate mappings.
    pub fn set<'p>(
        &mut self,
        path: impl Into<Path<'p>>,
        value: impl Into<Value>,
    ) -> Result<&mut Self, PathError> {
        let path = path.into();
        let (last, parents) = path.split_last().ok_or(PathError::EmptyPath)?;
        let names = self.names.as_ref();

        let map = parent_map(names, &mut self.root, &path, parents)?;
        let key = write_key(names, map, last);
        map.insert(key, value.into());
        Ok(self)
    }

    /// Append to the sequence at `path`, creating it when missing.
    pub fn push<'p>(
        &mut self,
        path: impl Into<Path<'p>>,
        value: impl Into<Value>,
    ) -> Result<&mut Self, PathError> {
        let path = path.into();
        let (last, parents) = path.split_last().ok_or(PathError::EmptyPath)?;
        let names = self.names.as_ref();

        let map = parent_map(names, &mut self.root, &path, parents)?;
        let key = write_key(names, map, last);
        match map.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(Value::Array(vec![value.into()]));
            }
            Entry::Occupied(mut entry) => match entry.get_mut() {
                Value::Array(items) => items.push(value.into()),
                other => {
                    return Err(PathError::NotASequence {
                        path: path.to_string(),
                        found: other.type_name(),
                    })
                }
            },
        }
        Ok(self)
    }

    /// Deep-merge a mapping into `path`, extending sequences.
    pub fn merge<'p>(
        &mut self,
        path: impl Into<Path<'p>>,
        value: impl Into<Value>,
    ) -> Result<&mut Self, PathError> {
        self.merge_with(path, value, true)
    }

    /// Deep-merge a mapping into `path`. Values already present win, except
    /// that sequences are extended when `lists` is set. An empty path merges
    /// into the root.
    pub fn merge_with<'p>(
        &mut self,
        path: impl Into<Path<'p>>,
        value: impl Into<Value>,
        lists: bool,
    ) -> Result<&mut Self, PathError> {
        let source = match value.into() {
            Value::Map(map) => map,
            other => return Err(PathError::MergeSourceNotMapping(other.type_name())),
        };

        let path = path.into();
        let Some((last, parents)) = path.split_last() else {
            merge_maps(source, &mut self.root, lists);
            return Ok(self);
        };
        let names = self.names.as_ref();

        let map = parent_map(names, &mut self.root, &path, parents)?;
        let key = write_key(names, map, last);
        match map.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(Value::Map(source));
            }
            Entry::Occupied(mut entry) => match entry.get_mut() {
                Value::Map(target) => merge_maps(source, target, lists),
                other => {
                    return Err(PathError::NotAMapping {
                        path: path.to_string(),
                        segment: last.name.to_string(),
                        found: other.type_name(),
                    })
                }
            },
        }
        Ok(self)
    }

    /// Remove the value at `path`. Parent mappings left empty by the removal
    /// are removed too. Returns whether anything was deleted.
    pub fn delete<'p>(&mut self, path: impl Into<Path<'p>>) -> bool {
        let path = path.into();
        delete_in(self.names.as_ref(), &mut self.root, path.segments())
    }

    fn lookup(&self, path: &Path<'_>) -> Option<&Value> {
        let names = self.names.as_ref();
        let (first, rest) = path.segments().split_first()?;
        let mut current = find(names, &self.root, first)?;
        for segment in rest {
            current = find(names, current.as_map()?, segment)?;
        }
        Some(current)
    }

    fn default_for(&self, path: &Path<'_>) -> Option<&Value> {
        self.defaults
            .iter()
            .rev()
            .find(|(registered, _)| same_names(registered, path))
            .map(|(_, value)| value)
    }
}

impl From<Map> for PathDocument {
    fn from(root: Map) -> Self {
        Self::from_map(root, None)
    }
}

/// Deep-merge `source` into `target`.
///
/// Keys missing from `target` are inserted. Nested mappings merge
/// recursively. Sequences are extended when `lists` is set. Any other
/// existing value in `target` is kept. Keys are copied verbatim.
pub fn merge_maps(source: Map, target: &mut Map, lists: bool) {
    for (key, value) in source {
        match target.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(value);
            }
            Entry::Occupied(mut entry) => match (entry.get_mut(), value) {
                (Value::Map(dst), Value::Map(src)) => merge_maps(src, dst, lists),
                (Value::Array(dst), Value::Array(src)) if lists => dst.extend(src),
                _ => {}
            },
        }
    }
}

fn same_names(a: &Path<'_>, b: &Path<'_>) -> bool {
    a.segments().len() == b.segments().len()
        && a
            .segments()
            .iter()
            .zip(b.segments())
            .all(|(x, y)| x.name == y.name)
}

fn short_name<'n>(names: Option<&'n FieldNames>, segment: &Segment<'_>) -> Option<&'n str> {
    if segment.mapped {
        names.and_then(|names| names.short(&segment.name))
    } else {
        None
    }
}

fn find<'m>(names: Option<&FieldNames>, map: &'m Map, segment: &Segment<'_>) -> Option<&'m Value> {
    map.get(&*segment.name)
        .or_else(|| short_name(names, segment).and_then(|short| map.get(short)))
}

/// The key under which `segment` is currently stored in `map`.
fn stored_key(names: Option<&FieldNames>, map: &Map, segment: &Segment<'_>) -> Option<String> {
    if map.contains_key(&*segment.name) {
        return Some(segment.name.to_string());
    }
    short_name(names, segment)
        .filter(|short| map.contains_key(*short))
        .map(str::to_string)
}

/// The key to write `segment` under: an existing key, else its compact code.
fn write_key(names: Option<&FieldNames>, map: &Map, segment: &Segment<'_>) -> String {
    stored_key(names, map, segment).unwrap_or_else(|| {
        short_name(names, segment)
            .unwrap_or(&*segment.name)
            .to_string()
    })
}

fn parent_map<'m>(
    names: Option<&FieldNames>,
    root: &'m mut Map,
    path: &Path<'_>,
    parents: &[Segment<'_>],
) -> Result<&'m mut Map, PathError> {
    let mut current = root;
    for segment in parents {
        let key = write_key(names, current, segment);
        current = match current.entry(key).or_insert_with(Value::map) {
            Value::Map(map) => map,
            other => {
                return Err(PathError::NotAMapping {
                    path: path.to_string(),
                    segment: segment.name.to_string(),
                    found: other.type_name(),
                })
            }
        };
    }
    Ok(current)
}

fn delete_in(names: Option<&FieldNames>, map: &mut Map, segments: &[Segment<'_>]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    let Some(key) = stored_key(names, map, first) else {
        return false;
    };
    if rest.is_empty() {
        return map.remove(&key).is_some();
    }

    let Some(Value::Map(child)) = map.get_mut(&key) else {
        return false;
    };
    if !delete_in(names, child, rest) {
        return false;
    }
    if child.is_empty() {
        map.remove(&key);
    }
    true
}

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::value::Value;

/// Long field names and the compact codes used on the wire.
///
/// Codes are scoped by position in the payload, so the same code is
/// reused for different names. Long names are unique.
pub const COMPACT_NAMES: &[(&str, &str)] = &[
    ("action", "a"),
    ("address", "a"),
    ("arguments", "a"),
    ("attributes", "a"),
    ("available", "a"),
    ("actions", "ac"),
    ("array_format", "af"),
    ("base_path", "b"),
    ("body", "b"),
    ("buffers", "b"),
    ("busy", "b"),
    ("cached", "c"),
    ("call", "c"),
    ("callback", "c"),
    ("callee", "c"),
    ("client", "c"),
    ("code", "c"),
    ("collection", "c"),
    ("command", "c"),
    ("commit", "c"),
    ("component", "c"),
    ("config", "c"),
    ("count", "c"),
    ("cpu", "c"),
    ("calls", "C"),
    ("complete", "C"),
    ("command_reply", "cr"),
    ("data", "d"),
    ("datetime", "d"),
    ("default_value", "d"),
    ("disk", "d"),
    ("path_delimiter", "d"),
    ("deprecated", "D"),
    ("allow_empty", "e"),
    ("entity_path", "e"),
    ("errors", "e"),
    ("entity", "E"),
    ("error", "E"),
    ("enum", "em"),
    ("exclusive_min", "en"),
    ("exclusive_max", "ex"),
    ("family", "f"),
    ("field", "f"),
    ("filename", "f"),
    ("files", "f"),
    ("format", "f"),
    ("free", "f"),
    ("fallback", "F"),
    ("fallbacks", "F"),
    ("fields", "F"),
    ("gateway", "g"),
    ("header", "h"),
    ("headers", "h"),
    ("http", "h"),
    ("http_body", "hb"),
    ("http_input", "hi"),
    ("http_method", "hm"),
    ("http_security", "hs"),
    ("id", "i"),
    ("idle", "i"),
    ("in", "i"),
    ("input", "i"),
    ("interval", "i"),
    ("items", "i"),
    ("primary_key", "k"),
    ("laddr", "l"),
    ("level", "l"),
    ("links", "l"),
    ("memory", "m"),
    ("message", "m"),
    ("meta", "m"),
    ("method", "m"),
    ("mime", "m"),
    ("min", "mn"),
    ("multiple_of", "mo"),
    ("max", "mx"),
    ("name", "n"),
    ("network", "n"),
    ("min_items", "ni"),
    ("min_length", "nl"),
    ("optional", "o"),
    ("origin", "o"),
    ("out", "o"),
    ("param", "p"),
    ("params", "p"),
    ("path", "p"),
    ("pattern", "p"),
    ("percent", "p"),
    ("pid", "p"),
    ("post_data", "p"),
    ("properties", "p"),
    ("protocol", "p"),
    ("query", "q"),
    ("raddr", "r"),
    ("reads", "r"),
    ("request", "r"),
    ("required", "r"),
    ("relations", "r"),
    ("result", "r"),
    ("rollback", "r"),
    ("remote_calls", "rc"),
    ("response", "R"),
    ("schema", "s"),
    ("schemes", "s"),
    ("scope", "s"),
    ("service", "s"),
    ("shared", "s"),
    ("size", "s"),
    ("status", "s"),
    ("swap", "s"),
    ("system", "s"),
    ("terminate", "t"),
    ("token", "t"),
    ("total", "t"),
    ("transactions", "t"),
    ("type", "t"),
    ("transport", "T"),
    ("url", "u"),
    ("used", "u"),
    ("user", "u"),
    ("unique_items", "ui"),
    ("value", "v"),
    ("version", "v"),
    ("validate", "V"),
    ("iowait", "w"),
    ("writes", "w"),
    ("timeout", "x"),
    ("max_items", "xi"),
    ("max_length", "xl"),];

static COMPACT: Lazy<FieldNames> = Lazy::new(|| FieldNames::from_pairs(COMPACT_NAMES.iter().copied()));

/// Translation table from long field names to compact wire codes.
///
/// Cheap to clone: the table is shared behind an [`Arc`].
#[derive(Clone, Debug)]
pub struct FieldNames {
    table: Arc<HashMap<String, String>>,
}

impl FieldNames {
    /// The built-in compact table.
    pub fn compact() -> Self {
        COMPACT.clone()
    }

    /// Build a table from `(long, short)` pairs.
    pub fn from_pairs<L, S, I>(pairs: I) -> Self
    where
        L: Into<String>,
        S: Into<String>,
        I: IntoIterator<Item = (L, S)>,
    {
        let table = pairs
            .into_iter()
            .map(|(long, short)| (long.into(), short.into()))
            .collect();
        Self {
            table: Arc::new(table),
        }
    }

    /// Compact code for a long name, if it has one.
    pub fn short(&self, long: &str) -> Option<&str> {
        self.table.get(long).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Mapping of `entries`, each long name stored under its compact code
/// when `names` has one.
pub fn wire_map<'a, V: Into<Value>>(
    names: Option<&FieldNames>,
    entries: impl IntoIterator<Item = (&'a str, V)>,
) -> Value {
    entries
        .into_iter()
        .map(|(long, value)| {
            let key = names.and_then(|names| names.short(long)).unwrap_or(long);
            (key, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn long_names_are_unique() {
        let mut seen = HashSet::new();
        for (long, _) in COMPACT_NAMES {
            assert!(seen.insert(*long), "duplicate long name {long:?}");
        }
        assert_eq!(FieldNames::compact().len(), COMPACT_NAMES.len());
    }

    #[test]
    fn known_names_translate() {
        let names = FieldNames::compact();
        assert_eq!(names.short("meta"), Some("m"));
        assert_eq!(names.short("action"), Some("a"));
        assert_eq!(names.short("transport"), Some("T"));
        assert_eq!(names.short("not-a-field"), None);
    }

    #[test]
    fn custom_table() {
        let names = FieldNames::from_pairs([("alpha", "A")]);
        assert_eq!(names.short("alpha"), Some("A"));
        assert!(!names.is_empty());
        assert!(FieldNames::from_pairs(Vec::<(String, String)>::new()).is_empty());
    }

    #[test]
    fn wire_map_uses_compact_codes() {
        let names = FieldNames::compact();
        let value = wire_map(Some(&names), [("name", Value::from("users")), ("custom", Value::Null)]);
        let map = value.as_map().expect("wire map should be a mapping");
        assert_eq!(map.get("n"), Some(&Value::from("users")));
        assert_eq!(map.get("custom"), Some(&Value::Null));

        let plain = wire_map(None, [("name", "users")]);
        assert_eq!(plain.as_map().and_then(|map| map.get("name")), Some(&Value::from("users")));
    }
}

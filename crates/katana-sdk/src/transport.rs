use std::collections::BTreeMap;

use katana_frame::{ResponseMeta, DOWNLOAD, FILES, SERVICE_CALL, TRANSACTIONS};
use katana_payload::{FieldNames, Map, Path, PathDocument, Value};

use crate::error::{HandlerError, Result};
use crate::file::File;

/// Sections merged back into the caller after a runtime call. `meta` is
/// never merged.
pub const MERGED_SECTIONS: [&str; 6] = ["data", "relations", "links", "calls", "transactions", "errors"];

const DEFAULTED_SECTIONS: [&str; 8] = [
    "body",
    "files",
    "data",
    "relations",
    "links",
    "calls",
    "transactions",
    "errors",
];

/// Kind of a registered transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Commit,
    Rollback,
    Complete,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 3] = [
        TransactionKind::Commit,
        TransactionKind::Rollback,
        TransactionKind::Complete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Commit => "commit",
            TransactionKind::Rollback => "rollback",
            TransactionKind::Complete => "complete",
        }
    }
}

/// The per-request document that accumulates state across service calls.
///
/// Section keys (`data`, `calls`, ...) go through the field-name table;
/// gateway addresses, service names, versions and action names are always
/// stored verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Transport {
    doc: PathDocument,
}

impl Transport {
    /// An empty transport.
    pub fn new(names: Option<FieldNames>) -> Self {
        Self::from_map(Map::new(), names)
    }

    pub fn from_map(map: Map, names: Option<FieldNames>) -> Self {
        let mut doc = PathDocument::from_map(map, names);
        doc.set_defaults(DEFAULTED_SECTIONS.iter().map(|section| (*section, Value::map())));
        Self { doc }
    }

    pub fn from_value(value: Value, names: Option<FieldNames>) -> Result<Self> {
        let map = PathDocument::from_value(value, None)?.into_map();
        Ok(Self::from_map(map, names))
    }

    pub fn document(&self) -> &PathDocument {
        &self.doc
    }

    pub fn names(&self) -> Option<&FieldNames> {
        self.doc.names()
    }

    pub fn as_map(&self) -> &Map {
        self.doc.as_map()
    }

    pub fn into_map(self) -> Map {
        self.doc.into_map()
    }

    pub fn into_value(self) -> Value {
        self.doc.into_value()
    }

    pub fn request_id(&self) -> &str {
        self.doc.get("meta/id").and_then(Value::as_str).unwrap_or_default()
    }

    /// Time the request was received by the gateway.
    pub fn request_timestamp(&self) -> Option<&Value> {
        self.doc.get("meta/datetime")
    }

    /// `[service, version, action]` of the service that received the request.
    pub fn origin(&self) -> Vec<String> {
        string_list(self.doc.get("meta/origin"))
    }

    /// Execution time of the origin service, in milliseconds.
    pub fn origin_duration(&self) -> i64 {
        self.doc
            .get(Path::default().key("meta").raw("duration"))
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    /// Public address of the gateway that received the request.
    pub fn gateway_address(&self) -> &str {
        self.doc
            .get("meta/gateway")
            .and_then(Value::as_array)
            .and_then(|addresses| addresses.get(1))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn property(&self, name: &str, default: &str) -> String {
        self.doc
            .get(Path::default().key("meta").key("properties").raw(name))
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    pub fn properties(&self) -> BTreeMap<String, String> {
        self.doc
            .get("meta/properties")
            .and_then(Value::as_map)
            .map(|props| {
                props
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_property(&mut self, name: &str, value: &str) -> Result<()> {
        self.doc
            .set(Path::default().key("meta").key("properties").raw(name), value)?;
        Ok(())
    }

    pub fn has_download(&self) -> bool {
        self.doc.exists("body")
    }

    pub fn download(&self) -> Option<File> {
        if !self.has_download() {
            return None;
        }
        let body = self.doc.get("body")?;
        File::from_value(body, self.names()).ok()
    }

    pub fn set_download(&mut self, file: &File) -> Result<()> {
        let value = file.to_value(self.names());
        self.doc.set("body", value)?;
        Ok(())
    }

    /// Entities and collections, optionally narrowed by
    /// `[address, service, version, action]` prefixes.
    pub fn data(&self, filter: &[&str]) -> Value {
        self.section("data", filter)
    }

    /// Relations, optionally narrowed by `[address, service]`.
    pub fn relations(&self, filter: &[&str]) -> Value {
        self.section("relations", filter)
    }

    /// Links, optionally narrowed by `[address, service]`.
    pub fn links(&self, filter: &[&str]) -> Value {
        self.section("links", filter)
    }

    /// Errors, optionally narrowed by `[address, service]`.
    pub fn errors(&self, filter: &[&str]) -> Value {
        self.section("errors", filter)
    }

    /// Files attached to calls, optionally narrowed by
    /// `[address, service, version, action]`.
    pub fn files(&self, filter: &[&str]) -> Value {
        self.section("files", filter)
    }

    fn section(&self, section: &str, filter: &[&str]) -> Value {
        let mut path = Path::default().key(section);
        for key in filter.iter().take_while(|key| !key.is_empty()) {
            path = path.raw(*key);
        }
        self.doc.get(path).cloned().unwrap_or_else(Value::map)
    }

    /// Calls made by services, optionally narrowed to one calling service
    /// and to calls sent to a remote gateway `address`.
    pub fn calls(&self, address: Option<&str>, service: Option<&str>) -> Value {
        let Some(address) = address else {
            return match service {
                Some(service) => match self.doc.get(Path::default().key("calls").raw(service)) {
                    Some(calls) if !calls.is_empty() => {
                        [(service, calls.clone())].into_iter().collect()
                    }
                    _ => Value::map(),
                },
                None => self.section("calls", &[]),
            };
        };

        let mut result = Map::new();
        let mut found = false;
        let all = self.doc.get("calls").and_then(Value::as_map);
        for (name, versions) in all.into_iter().flatten() {
            if service.is_some_and(|service| service != name.as_str()) {
                continue;
            }
            let mut by_version = Map::new();
            for (version, calls) in versions.as_map().into_iter().flatten() {
                let matching: Vec<Value> = calls
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter(|call| self.entry_field(call, "gateway") == Some(address))
                    .cloned()
                    .collect();
                found |= !matching.is_empty();
                by_version.insert(version.clone(), Value::Array(matching));
            }
            result.insert(name.clone(), Value::Map(by_version));
        }

        if found {
            Value::Map(result)
        } else {
            Value::map()
        }
    }

    /// Registered transactions keyed by kind, optionally only those
    /// registered by `service`.
    pub fn transactions(&self, service: Option<&str>) -> Value {
        let mut result = Map::new();
        for kind in TransactionKind::ALL {
            let Some(items) = self
                .doc
                .get(Path::default().key("transactions").key(kind.as_str()))
                .and_then(Value::as_array)
            else {
                continue;
            };
            let items: Vec<Value> = items
                .iter()
                .filter(|item| {
                    service.is_none_or(|service| self.entry_field(item, "service") == Some(service))
                })
                .cloned()
                .collect();
            if !items.is_empty() {
                result.insert(kind.as_str().to_string(), Value::Array(items));
            }
        }
        Value::Map(result)
    }

    /// A string field of a section entry, read through the name table.
    fn entry_field<'v>(&self, entry: &'v Value, field: &str) -> Option<&'v str> {
        let map = entry.as_map()?;
        let value = match map.get(field) {
            Some(value) => value,
            None => map.get(self.names()?.short(field)?)?,
        };
        value.as_str()
    }

    pub fn push_entity(
        &mut self,
        address: &str,
        service: &str,
        version: &str,
        action: &str,
        entity: Value,
    ) -> Result<()> {
        self.doc
            .push(action_path("data", address, service, version, action), entity)?;
        Ok(())
    }

    pub fn push_collection(
        &mut self,
        address: &str,
        service: &str,
        version: &str,
        action: &str,
        collection: Vec<Value>,
    ) -> Result<()> {
        self.push_entity(address, service, version, action, Value::Array(collection))
    }

    /// Relate `primary_key` of a local service to one or many foreign keys
    /// of a (possibly remote) service.
    pub fn set_relation(
        &mut self,
        address: &str,
        service: &str,
        primary_key: &str,
        remote_address: &str,
        remote_service: &str,
        foreign: Value,
    ) -> Result<()> {
        let path = Path::default()
            .key("relations")
            .raw(address)
            .raw(service)
            .raw(primary_key)
            .raw(remote_address)
            .raw(remote_service);
        self.doc.set(path, foreign)?;
        Ok(())
    }

    pub fn set_link(&mut self, address: &str, service: &str, link: &str, uri: &str) -> Result<()> {
        let path = Path::default().key("links").raw(address).raw(service).raw(link);
        self.doc.set(path, uri)?;
        Ok(())
    }

    pub fn push_transaction(&mut self, kind: TransactionKind, entry: Value) -> Result<()> {
        let path = Path::default().key("transactions").key(kind.as_str());
        self.doc.push(path, entry)?;
        Ok(())
    }

    /// Append a call made by `service` `version`. Calls accumulate.
    pub fn push_call(&mut self, service: &str, version: &str, call: Value) -> Result<()> {
        let path = Path::default().key("calls").raw(service).raw(version);
        self.doc.push(path, call)?;
        Ok(())
    }

    /// Attach files to a call target.
    pub fn set_files(
        &mut self,
        address: &str,
        service: &str,
        version: &str,
        action: &str,
        files: Value,
    ) -> Result<()> {
        self.doc
            .set(action_path("files", address, service, version, action), files)?;
        Ok(())
    }

    pub fn push_error(
        &mut self,
        address: &str,
        service: &str,
        version: &str,
        error: &HandlerError,
    ) -> Result<()> {
        let mut entry = PathDocument::from_map(Map::new(), self.names().cloned());
        entry.set("message", error.message.as_str())?;
        entry.set("code", error.code)?;
        entry.set("status", error.status.as_str())?;

        let path = Path::default().key("errors").raw(address).raw(service).raw(version);
        self.doc.push(path, entry.into_value())?;
        Ok(())
    }

    /// Response flags for a reply produced by `service` `version`.
    pub fn response_meta(&self, service: &str, version: &str) -> ResponseMeta {
        let mut meta = ResponseMeta::empty();
        if self.stored(Path::parse("body")).is_some() {
            meta.insert(DOWNLOAD);
        }
        if self.stored(Path::parse("transactions")).is_some() {
            meta.insert(TRANSACTIONS);
        }

        let calls = self.stored(Path::default().key("calls").raw(service).raw(version));
        let Some(calls) = calls.and_then(Value::as_array) else {
            return meta;
        };
        meta.insert(SERVICE_CALL);

        let address = self.gateway_address();
        let has_files = calls.iter().any(|call| {
            match (
                self.entry_field(call, "name"),
                self.entry_field(call, "version"),
                self.entry_field(call, "action"),
            ) {
                (Some(name), Some(version), Some(action)) => self
                    .doc
                    .exists(action_path("files", address, name, version, action)),
                _ => false,
            }
        });
        if has_files {
            meta.insert(FILES);
        }
        meta
    }

    /// A stored, non-empty value. Defaults do not count.
    fn stored(&self, path: Path<'_>) -> Option<&Value> {
        if !self.doc.exists(&path) {
            return None;
        }
        self.doc.get(path).filter(|value| !value.is_empty())
    }

    /// Fold the transport returned by a runtime call into this one.
    ///
    /// `sent` is the transport as it was sent to the callee. Whatever the
    /// callee echoed back unchanged is dropped first, then only the
    /// [`MERGED_SECTIONS`] that still hold something are merged, with
    /// lists concatenated.
    pub fn merge_call_result(&mut self, sent: &Map, returned: Map) -> Result<()> {
        let Some(Value::Map(changes)) = diff(&Value::Map(sent.clone()), Value::Map(returned)) else {
            return Ok(());
        };
        let changes = PathDocument::from_map(changes, self.names().cloned());

        for section in MERGED_SECTIONS {
            if let Some(value) = changes.get(section).filter(|value| !value.is_empty()) {
                if value.as_map().is_some() {
                    self.doc.merge_with(section, value.clone(), true)?;
                }
            }
        }
        Ok(())
    }
}

fn action_path<'a>(
    section: &'a str,
    address: &'a str,
    service: &'a str,
    version: &'a str,
    action: &'a str,
) -> Path<'a> {
    Path::default()
        .key(section)
        .raw(address)
        .raw(service)
        .raw(version)
        .raw(action)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// What `returned` adds on top of `sent`. Lists that extend the sent list
/// keep only the new tail; equal values disappear.
fn diff(sent: &Value, returned: Value) -> Option<Value> {
    match (sent, returned) {
        (Value::Map(sent), Value::Map(returned)) => {
            let mut changes = Map::new();
            for (key, value) in returned {
                let change = match sent.get(&key) {
                    Some(previous) => diff(previous, value),
                    None => Some(value),
                };
                if let Some(change) = change {
                    changes.insert(key, change);
                }
            }
            (!changes.is_empty()).then_some(Value::Map(changes))
        }
        (Value::Array(sent), Value::Array(mut returned)) => {
            if returned.starts_with(sent) {
                returned.drain(..sent.len());
            }
            (!returned.is_empty()).then_some(Value::Array(returned))
        }
        (sent, returned) => (*sent != returned).then_some(returned),
    }
}

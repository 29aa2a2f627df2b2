use katana_payload::{Path, PathDocument, Value};

/// Schema of one service version, as sent by the framework.
#[derive(Debug, Clone)]
pub struct ServiceSchema {
    name: String,
    version: String,
    document: PathDocument,
}

impl ServiceSchema {
    pub fn new(name: impl Into<String>, version: impl Into<String>, document: PathDocument) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            document,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The concrete version, after wildcard resolution.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether the service exposes a file server.
    pub fn has_file_server(&self) -> bool {
        self.document
            .get("files")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Names of the actions the schema defines, sorted.
    pub fn action_names(&self) -> Vec<String> {
        self.document
            .get("actions")
            .and_then(Value::as_map)
            .map(|actions| actions.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.document
            .exists(Path::default().key("actions").raw(name))
    }

    pub fn document(&self) -> &PathDocument {
        &self.document
    }
}

#[cfg(test)]
mod tests {
    use katana_payload::FieldNames;

    use super::*;

    fn schema(files: bool) -> ServiceSchema {
        let mut document = PathDocument::with_names(FieldNames::compact());
        document.set("files", files).unwrap();
        document.set("actions/!read/collection", false).unwrap();
        document.set("actions/!list", Value::map()).unwrap();
        ServiceSchema::new("users", "1.0.0", document)
    }

    #[test]
    fn reads_file_server_flag() {
        assert!(schema(true).has_file_server());
        assert!(!schema(false).has_file_server());

        let empty = ServiceSchema::new("x", "1", PathDocument::new());
        assert!(!empty.has_file_server());
        assert!(empty.action_names().is_empty());
    }

    #[test]
    fn lists_actions() {
        let schema = schema(false);
        assert_eq!(schema.action_names(), vec!["list", "read"]);
        assert!(schema.has_action("read"));
        assert!(!schema.has_action("delete"));
        assert_eq!(schema.name(), "users");
        assert_eq!(schema.version(), "1.0.0");
    }
}

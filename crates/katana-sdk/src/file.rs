use std::path::Path as FsPath;

use katana_payload::{wire_map, FieldNames, PathDocument, Value};

use crate::error::{Result, SdkError};

const FILE_SCHEME: &str = "file://";
const HTTP_SCHEME: &str = "http://";

/// Mime type used when none is given.
pub const DEFAULT_MIME: &str = "text/plain";

/// A file attached to a request, a call or a download.
///
/// Local files use `file://` paths; remote files are served over `http://`
/// by another component's file server and need a token to be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    name: String,
    path: String,
    mime: String,
    filename: String,
    size: u64,
    token: String,
}

impl File {
    /// Describe a file. Plain filesystem paths get a `file://` prefix, and
    /// filename and size are taken from the path when possible.
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(SdkError::invalid("Invalid file name"));
        }

        let mut path = path.into();
        if !path.is_empty() && !path.starts_with(FILE_SCHEME) && !path.starts_with(HTTP_SCHEME) {
            path = format!("{FILE_SCHEME}{path}");
        }

        let local = path.strip_prefix(FILE_SCHEME);
        let filename = local
            .or_else(|| path.strip_prefix(HTTP_SCHEME))
            .and_then(|rest| FsPath::new(rest).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let size = local
            .and_then(|fs_path| std::fs::metadata(fs_path).ok())
            .map(|meta| meta.len())
            .unwrap_or(0);

        Ok(Self {
            name,
            path,
            mime: DEFAULT_MIME.to_string(),
            filename,
            size,
            token: String::new(),
        })
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = mime.into();
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether the file has a path at all.
    pub fn exists(&self) -> bool {
        !self.path.is_empty()
    }

    pub fn is_local(&self) -> bool {
        self.path.starts_with(FILE_SCHEME)
    }

    /// Read the contents of a local file.
    pub fn read(&self) -> Result<Vec<u8>> {
        let fs_path = self.path.strip_prefix(FILE_SCHEME).ok_or_else(|| {
            SdkError::invalid(format!("File \"{}\" is not a local file", self.name))
        })?;
        std::fs::read(fs_path)
            .map_err(|err| SdkError::invalid(format!("Cannot read file \"{}\": {err}", self.name)))
    }

    pub fn copy_with_name(&self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(SdkError::invalid("Invalid file name"));
        }
        Ok(Self {
            name,
            ..self.clone()
        })
    }

    pub fn copy_with_mime(&self, mime: impl Into<String>) -> Self {
        self.clone().with_mime(mime)
    }

    /// Wire form: `{name, path, mime, filename, size, token?}`.
    pub fn to_value(&self, names: Option<&FieldNames>) -> Value {
        let mut entries = vec![
            ("name", Value::from(self.name.as_str())),
            ("path", Value::from(self.path.as_str())),
            ("mime", Value::from(self.mime.as_str())),
            ("filename", Value::from(self.filename.as_str())),
            ("size", Value::from(self.size.min(i64::MAX as u64) as i64)),
        ];
        if !self.token.is_empty() {
            entries.push(("token", Value::from(self.token.as_str())));
        }
        wire_map(names, entries)
    }

    /// Read the wire form.
    pub fn from_value(value: &Value, names: Option<&FieldNames>) -> Result<Self> {
        let doc = PathDocument::from_value(value.clone(), names.cloned())?;
        let text = |key: &str| {
            doc.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let name = text("name");
        if name.is_empty() {
            return Err(SdkError::invalid("Invalid file name"));
        }

        let path = text("path");
        let token = text("token");
        if path.starts_with(HTTP_SCHEME) && token.is_empty() {
            return Err(SdkError::invalid(format!(
                "File \"{name}\" has a remote path but no token"
            )));
        }

        let mime = match text("mime") {
            mime if mime.is_empty() => DEFAULT_MIME.to_string(),
            mime => mime,
        };
        let size = doc
            .get("size")
            .and_then(Value::as_i64)
            .and_then(|size| u64::try_from(size).ok())
            .unwrap_or(0);

        Ok(Self {
            name,
            path,
            mime,
            filename: text("filename"),
            size,
            token,
        })
    }
}

/// Wire form of several files: a mapping keyed by file name.
pub(crate) fn files_to_value(files: &[File], names: Option<&FieldNames>) -> Value {
    files
        .iter()
        .map(|file| (file.name().to_string(), file.to_value(names)))
        .collect()
}

use std::borrow::Cow;
use std::fmt;

/// Separator between path segments.
pub const DELIMITER: char = '/';

/// Marks a segment whose name must never be translated.
pub const NOMAP_PREFIX: char = '!';

/// Prefix a name so path parsing leaves it untranslated.
pub fn nomap(name: &str) -> String {
    format!("{NOMAP_PREFIX}{name}")
}

/// One path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    pub name: Cow<'a, str>,
    /// Whether the name goes through the field-name table.
    pub mapped: bool,
}

impl Segment<'_> {
    pub fn into_owned(self) -> Segment<'static> {
        Segment {
            name: Cow::Owned(self.name.into_owned()),
            mapped: self.mapped,
        }
    }
}

/// A parsed document path.
///
/// Built either from a delimited string (`"meta/gateway"`, `"calls/!users/1.0"`)
/// or segment by segment, which avoids escaping user-supplied names:
///
/// ```
/// use katana_payload::Path;
///
/// let path = Path::default().key("calls").raw("users/admin").raw("1.0");
/// assert_eq!(path.segments().len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Path<'a> {
    segments: Vec<Segment<'a>>,
}

impl<'a> Path<'a> {
    /// Parse with the default `/` delimiter.
    pub fn parse(path: &'a str) -> Self {
        Self::parse_with(path, DELIMITER)
    }

    /// Parse with a custom delimiter. Empty segments are skipped, and a
    /// single leading `!` marks a segment as untranslated.
    pub fn parse_with(path: &'a str, delimiter: char) -> Self {
        let segments = path
            .split(delimiter)
            .filter(|part| !part.is_empty())
            .filter_map(|part| match part.strip_prefix(NOMAP_PREFIX) {
                Some("") => None,
                Some(name) => Some(Segment {
                    name: Cow::Borrowed(name),
                    mapped: false,
                }),
                None => Some(Segment {
                    name: Cow::Borrowed(part),
                    mapped: true,
                }),
            })
            .collect();
        Self { segments }
    }

    /// Append a translated segment.
    pub fn key(mut self, name: impl Into<Cow<'a, str>>) -> Self {
        self.segments.push(Segment {
            name: name.into(),
            mapped: true,
        });
        self
    }

    /// Append an untranslated segment, taken verbatim.
    pub fn raw(mut self, name: impl Into<Cow<'a, str>>) -> Self {
        self.segments.push(Segment {
            name: name.into(),
            mapped: false,
        });
        self
    }

    pub fn segments(&self) -> &[Segment<'a>] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Split into the parent segments and the last one.
    pub fn split_last(&self) -> Option<(&Segment<'a>, &[Segment<'a>])> {
        self.segments.split_last()
    }

    pub fn into_owned(self) -> Path<'static> {
        Path {
            segments: self.segments.into_iter().map(Segment::into_owned).collect(),
        }
    }
}

impl fmt::Display for Path<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, segment) in self.segments.iter().enumerate() {
            if index > 0 {
                write!(f, "{DELIMITER}")?;
            }
            if !segment.mapped {
                write!(f, "{NOMAP_PREFIX}")?;
            }
            f.write_str(&segment.name)?;
        }
        Ok(())
    }
}

impl<'a> From<&'a str> for Path<'a> {
    fn from(path: &'a str) -> Self {
        Path::parse(path)
    }
}

impl<'a> From<&'a String> for Path<'a> {
    fn from(path: &'a String) -> Self {
        Path::parse(path)
    }
}

impl From<String> for Path<'static> {
    fn from(path: String) -> Self {
        Path::parse(&path).into_owned()
    }
}

impl<'a> From<&Path<'a>> for Path<'a> {
    fn from(path: &Path<'a>) -> Self {
        path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names<'a>(path: &'a Path<'_>) -> Vec<(&'a str, bool)> {
        path.segments()
            .iter()
            .map(|s| (&*s.name, s.mapped))
            .collect()
    }

    #[test]
    fn parses_mapped_and_raw_segments() {
        let path = Path::parse("calls/!users/1.0");
        assert_eq!(
            names(&path),
            vec![("calls", true), ("users", false), ("1.0", true)]
        );
        assert_eq!(path.to_string(), "calls/!users/1.0");
    }

    #[test]
    fn skips_empty_segments() {
        let path = Path::parse("//meta//gateway/");
        assert_eq!(names(&path), vec![("meta", true), ("gateway", true)]);
        assert!(Path::parse("").is_empty());
        assert!(Path::parse("/!/").is_empty());
    }

    #[test]
    fn only_one_prefix_is_stripped() {
        let path = Path::parse("!!bang");
        assert_eq!(names(&path), vec![("!bang", false)]);
    }

    #[test]
    fn custom_delimiter() {
        let path = Path::parse_with("a.b/c.!d", '.');
        assert_eq!(
            names(&path),
            vec![("a", true), ("b/c", true), ("d", false)]
        );
    }

    #[test]
    fn builder_keeps_delimiters_in_names() {
        let path = Path::default().key("data").raw("a/b");
        assert_eq!(names(&path), vec![("data", true), ("a/b", false)]);
        assert_eq!(nomap("users"), "!users");
    }

    #[test]
    fn owned_path_outlives_source() {
        let owned: Path<'static> = {
            let source = String::from("meta/!x");
            Path::from(&source).into_owned()
        };
        assert_eq!(owned.to_string(), "meta/!x");
    }
}

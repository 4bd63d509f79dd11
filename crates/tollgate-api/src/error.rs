use std::{borrow::Cow, fmt::Write as _};

/// An error translating a Kubernetes object into gateway configuration.
///
/// Errors carry a message and a jsonpath style path to the field of the source
/// object that caused the problem, so they can be surfaced on that object's
/// status without further context.
#[derive(Clone, thiserror::Error, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,

    message: String,

    // the reversed path to the field where translation failed.
    //
    // the leaf of the path is built up at path[0] with the root of the
    // object at the end. see ErrorContext for how this gets done.
    path: Vec<PathEntry>,
}

/// The broad category of a translation [Error].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The source object is malformed or uses an unsupported value.
    Invalid,

    /// The source object references something that is not present in the
    /// resolved reference context.
    MissingReference,

    /// A referenced Secret is missing a required field, or the value of that
    /// field can't be used.
    FieldNotFound,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.path.is_empty() {
            write!(f, "{}: ", self.path())?;
        }

        f.write_str(&self.message)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("path", &self.path())
            .finish()
    }
}

impl Error {
    /// Create a new error with a static message.
    pub fn new_static(message: &'static str) -> Self {
        Self::new(message.to_string())
    }

    /// Create a new error with a message.
    pub fn new(message: String) -> Self {
        Self {
            kind: ErrorKind::Invalid,
            message,
            path: vec![],
        }
    }

    /// Create an error for a reference that couldn't be resolved, like a
    /// backend Service or Secret that doesn't exist.
    pub fn missing_reference(message: String) -> Self {
        Self {
            kind: ErrorKind::MissingReference,
            message,
            path: vec![],
        }
    }

    /// Create an error for a required field that is absent from a Secret or
    /// has an unusable value.
    ///
    /// The message is always `"<field> not found or invalid"`.
    pub fn field_not_found(field: &str) -> Self {
        Self {
            kind: ErrorKind::FieldNotFound,
            message: format!("{field} not found or invalid"),
            path: vec![],
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The error message, without the field path.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The path to the field that caused this error, formatted as a jsonpath
    /// style string like `spec.rules[2].backends`.
    pub fn path(&self) -> String {
        path_str(self.path.iter().rev())
    }

    /// Append a new field to this error's path.
    pub fn with_field(mut self, field: &'static str) -> Self {
        self.path.push(PathEntry::from(field));
        self
    }

    /// Append a new field index to this error's path.
    pub fn with_index(mut self, index: usize) -> Self {
        self.path.push(PathEntry::Index(index));
        self
    }
}

/// Join path entries into a path string.
///
/// This isn't quite `entries.join('.')` because index fields exist and have to
/// be bracketed.
fn path_str<'a, I>(path: I) -> String
where
    I: IntoIterator<Item = &'a PathEntry>,
{
    let mut buf = String::with_capacity(16);

    for (i, path_entry) in path.into_iter().enumerate() {
        if i > 0 && path_entry.is_field() {
            buf.push('.');
        }
        let _ = write!(&mut buf, "{}", path_entry);
    }

    buf
}

/// Add field-path context to a `Result` by appending an entry to the error's
/// path. Context is added at the callsite, so a function can add its own fields
/// and the path ends up in the appropriate order.
pub trait ErrorContext<T>: Sized {
    fn with_field(self, field: &'static str) -> Result<T, Error>;
    fn with_index(self, index: usize) -> Result<T, Error>;

    /// Shorthand for `with_field(b).with_field(a)` but in a more intuitive
    /// order.
    fn with_fields(self, a: &'static str, b: &'static str) -> Result<T, Error> {
        self.with_field(b).with_field(a)
    }

    /// Shorthand for `with_index(idx).with_field(name)`.
    fn with_field_index(self, field: &'static str, index: usize) -> Result<T, Error> {
        self.with_index(index).with_field(field)
    }
}

impl<T> ErrorContext<T> for Result<T, Error> {
    fn with_field(self, field: &'static str) -> Result<T, Error> {
        self.map_err(|e| e.with_field(field))
    }

    fn with_index(self, index: usize) -> Result<T, Error> {
        self.map_err(|e| e.with_index(index))
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
enum PathEntry {
    Field(Cow<'static, str>),
    Index(usize),
}

impl PathEntry {
    fn is_field(&self) -> bool {
        matches!(self, PathEntry::Field(_))
    }
}

impl std::fmt::Display for PathEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathEntry::Field(field) => f.write_str(field),
            PathEntry::Index(idx) => write!(f, "[{idx}]"),
        }
    }
}

impl From<&'static str> for PathEntry {
    fn from(value: &'static str) -> Self {
        PathEntry::Field(Cow::Borrowed(value))
    }
}

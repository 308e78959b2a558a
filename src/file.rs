use std::fmt;
use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An in-memory project file: a path-like identity plus a byte buffer.
///
/// The name never changes for the lifetime of the file; the content may be
/// rewritten. A UTF-8 text view is decoded lazily and cached; rewriting the
/// content drops the cache.
pub struct File {
    name: Utf8PathBuf,
    content: Vec<u8>,
    text: OnceLock<String>,
}

impl File {
    pub fn new(name: impl Into<Utf8PathBuf>, content: impl Into<Vec<u8>>) -> File {
        File {
            name: name.into(),
            content: content.into(),
            text: OnceLock::new(),
        }
    }

    /// Create a file directly from text. The text view is pre-populated.
    pub fn from_text(name: impl Into<Utf8PathBuf>, text: impl Into<String>) -> File {
        let text = text.into();
        let file = File::new(name, text.clone().into_bytes());
        let _ = file.text.set(text);
        file
    }

    pub fn name(&self) -> &Utf8Path {
        &self.name
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Replace the content bytes. Invalidates any cached text view.
    pub fn set_content(&mut self, content: impl Into<Vec<u8>>) {
        self.content = content.into();
        self.text = OnceLock::new();
    }

    /// Replace the content via text; re-encodes and refreshes the text view.
    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.content = text.clone().into_bytes();
        self.text = OnceLock::new();
        let _ = self.text.set(text);
    }

    /// UTF-8 text view of the content, decoded lazily and cached.
    pub fn text(&self) -> &str {
        self.text
            .get_or_init(|| String::from_utf8_lossy(&self.content).into_owned())
    }
}

impl Clone for File {
    fn clone(&self) -> File {
        File::new(self.name.clone(), self.content.clone())
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("name", &self.name)
            .field("content_len", &self.content.len())
            .finish()
    }
}

/// Equality is name plus content bytes; the text cache is not observable.
impl PartialEq for File {
    fn eq(&self, other: &File) -> bool {
        self.name == other.name && self.content == other.content
    }
}

impl Eq for File {}

impl Serialize for File {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("File", 2)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("content", &self.content)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for File {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<File, D::Error> {
        #[derive(Deserialize)]
        struct Wire {
            name: Utf8PathBuf,
            content: Vec<u8>,
        }
        let wire = Wire::deserialize(deserializer)?;
        Ok(File::new(wire.name, wire.content))
    }
}

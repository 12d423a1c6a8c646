//! File and folder records.
//!
//! Folders and files share one flat collection; the tree is expressed only
//! through `parent_id` references, validated when a record is created.

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Kind of a record. Immutable after creation.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Folder,
    File,
    Image,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Folder => "folder",
            FileType::File => "file",
            FileType::Image => "image",
        }
    }

    /// Folders never carry content.
    pub fn has_content(&self) -> bool {
        !matches!(self, FileType::Folder)
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "folder" => Ok(FileType::Folder),
            "file" => Ok(FileType::File),
            "image" => Ok(FileType::Image),
            other => Err(format!("unknown file type `{}`", other)),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to the containing folder, or the root sentinel `0`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ParentId {
    #[default]
    Root,
    Folder(Uuid),
}

impl ParentId {
    /// Parse the textual form used in query strings and storage.
    ///
    /// `"0"` and the empty string mean root. Anything that is neither root
    /// nor a well-formed id yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "0" {
            return Some(ParentId::Root);
        }
        Uuid::parse_str(raw).ok().map(ParentId::Folder)
    }

    /// Parse the loosely typed form accepted in JSON bodies (`0`, `"0"`, `"<id>"`, `null`).
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(ParentId::Root),
            Value::Number(n) if n.as_u64() == Some(0) => Some(ParentId::Root),
            Value::String(s) => Self::parse(s),
            _ => None,
        }
    }

    pub fn folder_id(&self) -> Option<Uuid> {
        match self {
            ParentId::Root => None,
            ParentId::Folder(id) => Some(*id),
        }
    }
}

impl fmt::Display for ParentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentId::Root => f.write_str("0"),
            ParentId::Folder(id) => write!(f, "{}", id),
        }
    }
}

impl Serialize for ParentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ParentId::Root => serializer.serialize_u8(0),
            ParentId::Folder(id) => serializer.collect_str(id),
        }
    }
}

/// A stored file or folder.
///
/// `local_path` is present exactly when `file_type` is not a folder and is
/// never exposed to API callers.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Identifier assigned by the metadata store.
    pub id: Uuid,

    /// Owning user, taken from the session at creation.
    pub user_id: String,

    /// Display name. Never used as a filesystem path component.
    pub name: String,

    #[serde(rename = "type")]
    pub file_type: FileType,

    pub is_public: bool,

    pub parent_id: ParentId,

    /// Location of the blob on disk.
    #[serde(skip_serializing)]
    pub local_path: Option<String>,
}

/// Fields supplied when inserting a record; the store assigns the id.
#[derive(Clone, Debug)]
pub struct NewFileRecord {
    pub user_id: String,
    pub name: String,
    pub file_type: FileType,
    pub is_public: bool,
    pub parent_id: ParentId,
    pub local_path: Option<String>,
}

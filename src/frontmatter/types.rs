use serde_yaml::{Mapping, Value};
use std::path::PathBuf;

pub const AUTHOR: &str = "author";
pub const CREATED: &str = "created";
pub const UPDATED: &str = "updated";
pub const TAGS: &str = "tags";

/// What was found at the top of a note, before any tolerance is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontmatterBlock {
    /// No `---` block at the start of the text
    Absent,
    /// A block that decoded to a mapping (an empty block decodes to an empty mapping)
    Mapping(Mapping),
    /// Valid YAML that is not a mapping, e.g. a bare list or scalar
    WrongShape(Value),
    /// YAML that failed to decode
    Invalid(String),
}

impl FrontmatterBlock {
    /// Collapse to a mapping: anything that is not a mapping becomes empty.
    pub fn into_mapping(self) -> Mapping {
        match self {
            FrontmatterBlock::Mapping(m) => m,
            _ => Mapping::new(),
        }
    }

    pub fn is_present(&self) -> bool {
        !matches!(self, FrontmatterBlock::Absent)
    }
}

/// A note split into metadata and body text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Post {
    pub frontmatter: Mapping,
    pub body: String,
}

impl Post {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.frontmatter.get(key).and_then(Value::as_str)
    }
}

/// Output of `FrontmatterManager::assemble`: where to write and what.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembled {
    pub directory: PathBuf,
    pub filename: String,
    pub content: String,
}

impl Assembled {
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }
}

pub mod types;

use chrono::{SecondsFormat, Utc};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Result, VaultError};
use crate::storage::resolve_note_path;
use crate::tags;
use types::{Assembled, FrontmatterBlock, Post, AUTHOR, CREATED, TAGS, UPDATED};

/// Current time as used for `created`/`updated`: RFC 3339, UTC, microseconds.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct FrontmatterParser;

impl FrontmatterParser {
    /// Split raw text into the YAML between the `---` delimiters and the body.
    /// The closing delimiter must be a line of its own; an unterminated block
    /// is treated as plain body text.
    pub fn split(content: &str) -> (Option<&str>, &str) {
        let rest = match content
            .strip_prefix("---\n")
            .or_else(|| content.strip_prefix("---\r\n"))
        {
            Some(rest) => rest,
            None => return (None, content),
        };

        let mut offset = 0;
        loop {
            let line_end = rest[offset..].find('\n').map(|i| offset + i);
            let line = &rest[offset..line_end.unwrap_or(rest.len())];
            if line.trim_end_matches('\r') == "---" {
                let yaml = &rest[..offset];
                let body = match line_end {
                    Some(end) => &rest[end + 1..],
                    None => "",
                };
                return (Some(yaml), body);
            }
            match line_end {
                Some(end) => offset = end + 1,
                None => return (None, content),
            }
        }
    }

    /// Decode a YAML block without applying any tolerance.
    pub fn decode(yaml: &str) -> FrontmatterBlock {
        match serde_yaml::from_str::<Value>(yaml) {
            Ok(Value::Mapping(m)) => FrontmatterBlock::Mapping(m),
            Ok(Value::Null) => FrontmatterBlock::Mapping(Mapping::new()),
            Ok(other) => FrontmatterBlock::WrongShape(other),
            Err(e) => FrontmatterBlock::Invalid(e.to_string()),
        }
    }

    /// Parse a markdown file into frontmatter and body
    pub fn parse(content: &str) -> (FrontmatterBlock, String) {
        match Self::split(content) {
            (Some(yaml), body) => (Self::decode(yaml), body.to_string()),
            (None, body) => (FrontmatterBlock::Absent, body.to_string()),
        }
    }

    /// Combine frontmatter and body into markdown content. An empty mapping
    /// produces the bare body.
    pub fn combine(frontmatter: &Mapping, body: &str) -> Result<String> {
        if frontmatter.is_empty() {
            return Ok(body.to_string());
        }
        let yaml = serde_yaml::to_string(frontmatter).map_err(|e| {
            VaultError::Yaml(crate::error::ErrorDetails::new(
                "serialize_frontmatter",
                format!("Failed to serialize frontmatter: {}", e),
            ))
        })?;
        Ok(format!("---\n{}\n---\n{}", yaml.trim_end_matches('\n'), body))
    }
}

/// Read the raw text of a note for frontmatter purposes.
///
/// `Ok(None)` for a missing file and for decode/IO anomalies (logged).
/// Permission problems are returned as errors.
fn read_for_frontmatter(path: &Path) -> Result<Option<String>> {
    content_or_none(path, fs::read_to_string(path))
}

fn content_or_none(path: &Path, read: std::io::Result<String>) -> Result<Option<String>> {
    match read {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
        Err(e) if e.kind() == IoErrorKind::PermissionDenied => {
            Err(VaultError::io("read_existing", path, &e))
        }
        Err(e) => {
            log::warn!("[Frontmatter] Unreadable note {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

/// Drop `key` while keeping the order of the remaining entries.
fn without_key(mapping: Mapping, key: &str) -> Mapping {
    mapping
        .into_iter()
        .filter(|(k, _)| k.as_str() != Some(key))
        .collect()
}

/// Rewrite `tags` in canonical form, or remove the key when nothing is left.
/// A `tags` value that is not a sequence counts as no tags.
fn renormalize_tags(mapping: Mapping) -> Mapping {
    let normalized = match mapping.get(TAGS) {
        None => return mapping,
        Some(Value::Sequence(seq)) => tags::normalize_tags(seq.iter().filter_map(tag_text)),
        Some(_) => Vec::new(),
    };

    if normalized.is_empty() {
        return without_key(mapping, TAGS);
    }
    let mut mapping = mapping;
    mapping.insert(
        Value::from(TAGS),
        Value::Sequence(normalized.into_iter().map(Value::String).collect()),
    );
    mapping
}

/// Text of a single `tags` entry. Scalars are rendered; nested values are not tags.
pub(crate) fn tag_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Single authority for reading, merging and serializing note metadata.
#[derive(Debug, Clone)]
pub struct FrontmatterManager {
    vault_root: PathBuf,
    default_notes_dir: String,
    default_author: String,
}

impl FrontmatterManager {
    pub fn new(vault_root: &Path, default_notes_dir: &str, default_author: &str) -> Self {
        Self {
            vault_root: vault_root.to_path_buf(),
            default_notes_dir: default_notes_dir.to_string(),
            default_author: default_author.to_string(),
        }
    }

    pub fn default_author(&self) -> &str {
        &self.default_author
    }

    /// Frontmatter block of the note at `path`, undecided.
    pub fn read_block(&self, path: &Path) -> Result<Option<FrontmatterBlock>> {
        Ok(read_for_frontmatter(path)?.map(|content| FrontmatterParser::parse(&content).0))
    }

    /// Existing frontmatter of the note at `path`.
    ///
    /// `None` when the note does not exist (or could not be decoded); an empty
    /// mapping when it has no usable frontmatter block.
    pub fn read_existing(&self, path: &Path) -> Result<Option<Mapping>> {
        let block = match self.read_block(path)? {
            Some(block) => block,
            None => return Ok(None),
        };
        match &block {
            FrontmatterBlock::WrongShape(_) => {
                log::warn!("[Frontmatter] {} has non-mapping frontmatter, ignoring it", path.display());
            }
            FrontmatterBlock::Invalid(e) => {
                log::warn!("[Frontmatter] {} has invalid YAML frontmatter: {}", path.display(), e);
            }
            _ => {}
        }
        Ok(Some(block.into_mapping()))
    }

    /// Merge `text` (which may carry its own frontmatter block) with the
    /// note's existing frontmatter and stamp author and timestamps.
    pub fn generate(
        &self,
        text: &str,
        author: Option<&str>,
        is_new_note: bool,
        existing: Option<&Mapping>,
    ) -> Post {
        let (embedded, body) = FrontmatterParser::parse(text);
        let embedded = match embedded {
            FrontmatterBlock::Invalid(e) => {
                log::warn!("[Frontmatter] Ignoring invalid embedded frontmatter: {}", e);
                Mapping::new()
            }
            other => other.into_mapping(),
        };

        let mut frontmatter = match existing {
            Some(existing) => {
                let mut merged = existing.clone();
                let keep_created = merged.contains_key(CREATED);
                for (key, value) in embedded {
                    if keep_created && key.as_str() == Some(CREATED) {
                        continue;
                    }
                    merged.insert(key, value);
                }
                merged
            }
            None => embedded,
        };

        let author = author.unwrap_or(&self.default_author);
        frontmatter.insert(Value::from(AUTHOR), Value::from(author));

        let now = now_timestamp();
        if is_new_note {
            if !frontmatter.contains_key(CREATED) {
                frontmatter.insert(Value::from(CREATED), Value::from(now));
            }
            frontmatter = without_key(frontmatter, UPDATED);
        } else {
            frontmatter.insert(Value::from(UPDATED), Value::from(now));
        }

        Post {
            frontmatter: renormalize_tags(frontmatter),
            body,
        }
    }

    /// Resolve where `filename` lives, merge with whatever is already stored
    /// there and produce the text to write.
    pub fn assemble(
        &self,
        text: &str,
        filename: &str,
        author: Option<&str>,
        default_path: Option<&str>,
        is_new_note: bool,
    ) -> Result<Assembled> {
        let (directory, base) =
            resolve_note_path(&self.vault_root, &self.default_notes_dir, filename, default_path)?;
        let path = directory.join(&base);
        let content = self.render(&path, text, author, is_new_note)?;
        Ok(Assembled {
            directory,
            filename: base,
            content,
        })
    }

    /// `assemble` for a note already addressed by absolute path.
    pub fn assemble_at(
        &self,
        path: &Path,
        text: &str,
        author: Option<&str>,
        is_new_note: bool,
    ) -> Result<Assembled> {
        let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                VaultError::validation("assemble", format!("Invalid note path: {}", path.display()))
            })?;
        let content = self.render(path, text, author, is_new_note)?;
        Ok(Assembled {
            directory,
            filename,
            content,
        })
    }

    fn render(&self, path: &Path, text: &str, author: Option<&str>, is_new_note: bool) -> Result<String> {
        let existing = self.read_existing(path)?;
        let post = self.generate(text, author, is_new_note, existing.as_ref());
        log::debug!(
            "[Frontmatter] Rendering {} (new: {}, {} fields)",
            path.display(),
            is_new_note,
            post.frontmatter.len()
        );
        FrontmatterParser::combine(&post.frontmatter, &post.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(root: &Path) -> FrontmatterManager {
        FrontmatterManager::new(root, "notes", "default-author")
    }

    fn keys(mapping: &Mapping) -> Vec<String> {
        mapping
            .iter()
            .filter_map(|(k, _)| k.as_str().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_parse_with_frontmatter() {
        let content = "---\ntitle: Test Note\ntags:\n  - a\n---\nThis is the body content.";
        let (block, body) = FrontmatterParser::parse(content);
        let fm = block.into_mapping();
        assert_eq!(fm.get("title").and_then(Value::as_str), Some("Test Note"));
        assert_eq!(body, "This is the body content.");
    }

    #[test]
    fn test_parse_without_frontmatter() {
        let content = "Just some markdown content.";
        let (block, body) = FrontmatterParser::parse(content);
        assert_eq!(block, FrontmatterBlock::Absent);
        assert_eq!(body, content);
    }

    #[test]
    fn test_parse_crlf_and_empty_block() {
        let (block, body) = FrontmatterParser::parse("---\r\nk: v\r\n---\r\nbody");
        assert_eq!(block.into_mapping().get("k").and_then(Value::as_str), Some("v"));
        assert_eq!(body, "body");

        let (block, body) = FrontmatterParser::parse("---\n---\nbody");
        assert_eq!(block, FrontmatterBlock::Mapping(Mapping::new()));
        assert_eq!(body, "body");
    }

    #[test]
    fn test_parse_unterminated_block_is_body() {
        let content = "---\ntitle: dangling\nno closing line";
        let (block, body) = FrontmatterParser::parse(content);
        assert_eq!(block, FrontmatterBlock::Absent);
        assert_eq!(body, content);
    }

    #[test]
    fn test_closing_delimiter_must_be_whole_line() {
        let content = "---\ntitle: x\n----\n---\nbody";
        let (block, body) = FrontmatterParser::parse(content);
        assert!(block.is_present());
        assert_eq!(body, "body");
    }

    #[test]
    fn test_parse_distinguishes_shapes() {
        let (block, _) = FrontmatterParser::parse("---\n- a\n- b\n---\nbody");
        assert!(matches!(block, FrontmatterBlock::WrongShape(Value::Sequence(_))));
        assert!(block.is_present());
        assert!(block.into_mapping().is_empty());

        let (block, _) = FrontmatterParser::parse("---\nkey: [unclosed\n---\nbody");
        assert!(matches!(block, FrontmatterBlock::Invalid(_)));
    }

    #[test]
    fn test_combine_round_trip() {
        let mut fm = Mapping::new();
        fm.insert(Value::from("title"), Value::from("Test"));
        fm.insert(Value::from("tags"), Value::Sequence(vec![Value::from("x")]));
        let combined = FrontmatterParser::combine(&fm, "Content here.").unwrap();
        assert_eq!(combined, "---\ntitle: Test\ntags:\n- x\n---\nContent here.");

        let (block, body) = FrontmatterParser::parse(&combined);
        assert_eq!(block.into_mapping(), fm);
        assert_eq!(body, "Content here.");
    }

    #[test]
    fn test_combine_empty_mapping_is_body() {
        assert_eq!(FrontmatterParser::combine(&Mapping::new(), "plain").unwrap(), "plain");
    }

    #[test]
    fn test_generate_new_note() {
        let temp_dir = TempDir::new().unwrap();
        let post = manager(temp_dir.path()).generate("Body", None, true, None);
        assert_eq!(post.get_str(AUTHOR), Some("default-author"));
        assert!(post.get_str(CREATED).is_some());
        assert!(post.frontmatter.get(UPDATED).is_none());
        assert_eq!(post.body, "Body");
    }

    #[test]
    fn test_generate_new_note_keeps_supplied_created() {
        let temp_dir = TempDir::new().unwrap();
        let mut existing = Mapping::new();
        existing.insert(Value::from(CREATED), Value::from("2020-01-01T00:00:00Z"));
        existing.insert(Value::from(UPDATED), Value::from("2020-01-02T00:00:00Z"));
        let post = manager(temp_dir.path()).generate("Body", Some("bob"), true, Some(&existing));
        assert_eq!(post.get_str(CREATED), Some("2020-01-01T00:00:00Z"));
        assert_eq!(post.get_str(AUTHOR), Some("bob"));
        assert!(post.frontmatter.get(UPDATED).is_none());
    }

    #[test]
    fn test_generate_edit_sets_updated_but_not_created() {
        let temp_dir = TempDir::new().unwrap();
        let post = manager(temp_dir.path()).generate("Body", None, false, None);
        assert!(post.get_str(UPDATED).is_some());
        assert!(post.frontmatter.get(CREATED).is_none());
    }

    #[test]
    fn test_generate_existing_created_wins_over_embedded() {
        let temp_dir = TempDir::new().unwrap();
        let mut existing = Mapping::new();
        existing.insert(Value::from(CREATED), Value::from("2020-01-01T00:00:00Z"));
        existing.insert(Value::from("status"), Value::from("draft"));
        existing.insert(Value::from("priority"), Value::from(3u64));

        let text = "---\ncreated: 1999-01-01T00:00:00Z\nstatus: done\n---\nNew body";
        let post = manager(temp_dir.path()).generate(text, None, false, Some(&existing));

        assert_eq!(post.get_str(CREATED), Some("2020-01-01T00:00:00Z"));
        assert_eq!(post.get_str("status"), Some("done"));
        assert_eq!(post.frontmatter.get("priority").and_then(Value::as_u64), Some(3));
        assert_eq!(post.body, "New body");
        assert_eq!(keys(&post.frontmatter), vec!["created", "status", "priority", "author", "updated"]);
    }

    #[test]
    fn test_generate_embedded_seeds_when_no_existing() {
        let temp_dir = TempDir::new().unwrap();
        let text = "---\ncreated: 2021-05-05T00:00:00Z\ntitle: Seed\n---\nBody";
        let post = manager(temp_dir.path()).generate(text, None, true, None);
        assert_eq!(post.get_str(CREATED), Some("2021-05-05T00:00:00Z"));
        assert_eq!(post.get_str("title"), Some("Seed"));
    }

    #[test]
    fn test_generate_renormalizes_tags() {
        let temp_dir = TempDir::new().unwrap();
        let text = "---\ntags:\n  - TagA\n  - ' taga '\n  - tagB\n  - 42\n---\nBody";
        let post = manager(temp_dir.path()).generate(text, None, false, None);
        assert_eq!(
            post.frontmatter.get(TAGS),
            Some(&Value::Sequence(vec![
                Value::from("taga"),
                Value::from("tagb"),
                Value::from("42"),
            ]))
        );
    }

    #[test]
    fn test_generate_drops_empty_tags() {
        let temp_dir = TempDir::new().unwrap();
        let post = manager(temp_dir.path()).generate("---\ntags: []\n---\nBody", None, false, None);
        assert!(post.frontmatter.get(TAGS).is_none());

        let post = manager(temp_dir.path()).generate("---\ntags: not-a-list\n---\nBody", None, false, None);
        assert!(post.frontmatter.get(TAGS).is_none());
    }

    #[test]
    fn test_read_existing_states() {
        let temp_dir = TempDir::new().unwrap();
        let m = manager(temp_dir.path());

        assert_eq!(m.read_existing(&temp_dir.path().join("missing.md")).unwrap(), None);

        let plain = temp_dir.path().join("plain.md");
        fs::write(&plain, "no frontmatter").unwrap();
        assert_eq!(m.read_existing(&plain).unwrap(), Some(Mapping::new()));

        let list = temp_dir.path().join("list.md");
        fs::write(&list, "---\n- a\n---\nbody").unwrap();
        assert_eq!(m.read_existing(&list).unwrap(), Some(Mapping::new()));
        assert!(matches!(m.read_block(&list).unwrap(), Some(FrontmatterBlock::WrongShape(_))));

        let binary = temp_dir.path().join("binary.md");
        fs::write(&binary, [0xff, 0xfe, 0x00, 0x80]).unwrap();
        assert_eq!(m.read_existing(&binary).unwrap(), None);
    }

    #[test]
    fn test_assemble_preserves_created_and_unrelated_fields() {
        let temp_dir = TempDir::new().unwrap();
        let notes = temp_dir.path().join("notes");
        fs::create_dir_all(&notes).unwrap();
        fs::write(
            notes.join("idea.md"),
            "---\ncreated: 2020-01-01T00:00:00Z\nrating: 5\nauthor: carol\n---\nOld body",
        )
        .unwrap();

        let assembled = manager(temp_dir.path())
            .assemble("New body", "idea", None, None, false)
            .unwrap();
        assert_eq!(assembled.directory, notes);
        assert_eq!(assembled.filename, "idea.md");

        let (block, body) = FrontmatterParser::parse(&assembled.content);
        let fm = block.into_mapping();
        assert_eq!(body, "New body");
        assert_eq!(fm.get(CREATED).and_then(Value::as_str), Some("2020-01-01T00:00:00Z"));
        assert_eq!(fm.get("rating").and_then(Value::as_u64), Some(5));
        assert_eq!(fm.get(AUTHOR).and_then(Value::as_str), Some("default-author"));
        assert!(fm.get(UPDATED).is_some());
    }

    #[test]
    fn test_assemble_surfaces_path_errors() {
        let temp_dir = TempDir::new().unwrap();
        let err = manager(temp_dir.path())
            .assemble("x", "../escape", None, None, true)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn test_read_errors_by_kind() {
        let path = Path::new("/vault/notes/locked.md");

        let denied = content_or_none(path, Err(std::io::Error::from(IoErrorKind::PermissionDenied)))
            .unwrap_err();
        assert_eq!(denied.kind(), crate::error::ErrorKind::Storage);
        assert_eq!(denied.operation(), "read_existing");
        assert_eq!(denied.context()["io_kind"], "PermissionDenied");
        assert_eq!(denied.context()["path"], "/vault/notes/locked.md");

        assert!(content_or_none(path, Err(std::io::Error::from(IoErrorKind::NotFound)))
            .unwrap()
            .is_none());
        assert!(content_or_none(path, Err(std::io::Error::from(IoErrorKind::InvalidData)))
            .unwrap()
            .is_none());
        assert_eq!(
            content_or_none(path, Ok("body".to_string())).unwrap(),
            Some("body".to_string())
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_read_existing_unreadable_file() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("locked.md");
        fs::write(&path, "---\ntitle: secret\n---\nbody").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users read through mode bits.
        if fs::read_to_string(&path).is_ok() {
            println!("skipping: mode 000 file is still readable");
            return;
        }
        let err = manager(temp_dir.path()).read_existing(&path).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Storage);

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(manager(temp_dir.path()).read_existing(&path).unwrap().is_some());
    }
}

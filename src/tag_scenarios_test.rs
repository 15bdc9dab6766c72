// End-to-end tag scenarios against a real vault on disk

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    use crate::config::VaultConfig;
    use crate::storage::NoteRef;
    use crate::tags::{normalize, validate_normalized, validate_raw};
    use crate::vault::Vault;

    const FIXED_UPDATED: &str = "2020-01-01T00:00:00.000000Z";
    const FIXED_CREATED: &str = "2019-06-01T12:00:00.000000Z";

    fn open_vault(temp_dir: &TempDir) -> Vault {
        let config = VaultConfig::new(temp_dir.path()).with_default_author("scenario");
        Vault::open(config, None, None).unwrap()
    }

    /// Write a note directly, bypassing tag normalization.
    fn write_raw(root: &Path, relative: &str, tags: &[&str]) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let tag_lines: String = tags.iter().map(|t| format!("  - {}\n", t)).collect();
        let content = format!(
            "---\nauthor: someone\ncreated: '{}'\nupdated: '{}'\nstatus: draft\ntags:\n{}---\nBody of {}\n",
            FIXED_CREATED, FIXED_UPDATED, tag_lines, relative
        );
        fs::write(&path, content).unwrap();
        path
    }

    fn field(vault: &Vault, path: &Path, key: &str) -> Option<String> {
        let note = vault.read_note(&NoteRef::filepath(path)).unwrap();
        note.frontmatter
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Test: stored tags read back verbatim until the first rewrite
    #[test]
    fn test_tags_verbatim_then_normalized() {
        let temp_dir = TempDir::new().unwrap();
        let vault = open_vault(&temp_dir);
        let path = write_raw(temp_dir.path(), "notes/mixed.md", &["TagA", "tagB", "taga"]);
        let note = NoteRef::filepath(&path);

        assert_eq!(vault.get_tags(&note).unwrap(), vec!["TagA", "tagB", "taga"]);

        vault.add_tag(&note, "  TAGB ").unwrap();
        assert_eq!(vault.get_tags(&note).unwrap(), vec!["taga", "tagb"]);

        println!("✅ test_tags_verbatim_then_normalized passed");
    }

    /// Test: add then remove restores the normalized set and keeps timestamps honest
    #[test]
    fn test_add_then_remove_restores_set() {
        let temp_dir = TempDir::new().unwrap();
        let vault = open_vault(&temp_dir);
        let path = write_raw(temp_dir.path(), "notes/cycle.md", &["Alpha", "beta"]);
        let note = NoteRef::filepath(&path);

        vault.add_tag(&note, "gamma").unwrap();
        assert_eq!(vault.get_tags(&note).unwrap(), vec!["alpha", "beta", "gamma"]);

        vault.remove_tag(&note, "GAMMA").unwrap();
        assert_eq!(vault.get_tags(&note).unwrap(), vec!["alpha", "beta"]);

        assert_eq!(field(&vault, &path, "created").as_deref(), Some(FIXED_CREATED));
        let updated = field(&vault, &path, "updated").unwrap();
        assert_ne!(updated, FIXED_UPDATED);
        assert_eq!(field(&vault, &path, "status").as_deref(), Some("draft"));
        assert_eq!(field(&vault, &path, "author").as_deref(), Some("someone"));

        let note = vault.read_note(&NoteRef::filepath(&path)).unwrap();
        assert_eq!(note.body, "Body of notes/cycle.md\n");

        println!("✅ test_add_then_remove_restores_set passed");
    }

    /// Test: renaming onto a tag the note already has collapses the duplicate
    #[test]
    fn test_rename_merges_into_existing_tag() {
        let temp_dir = TempDir::new().unwrap();
        let vault = open_vault(&temp_dir);
        let path = write_raw(temp_dir.path(), "notes/merge.md", &["TagA", "tagB"]);

        let modified = vault.rename_tag("TagA", "tagB", None).unwrap();
        assert_eq!(modified, vec![path.clone()]);
        assert_eq!(vault.get_tags(&NoteRef::filepath(&path)).unwrap(), vec!["tagb"]);

        println!("✅ test_rename_merges_into_existing_tag passed");
    }

    /// Test: a rename that only changes case is a no-op
    #[test]
    fn test_rename_to_same_normalized_tag_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let vault = open_vault(&temp_dir);
        let path = write_raw(temp_dir.path(), "notes/same.md", &["TagA", "tagB"]);
        let before = fs::read_to_string(&path).unwrap();

        let modified = vault.rename_tag("TagA", "taga", None).unwrap();
        assert!(modified.is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert_eq!(field(&vault, &path, "updated").as_deref(), Some(FIXED_UPDATED));

        println!("✅ test_rename_to_same_normalized_tag_is_noop passed");
    }

    /// Test: renaming a tag nobody has touches nothing
    #[test]
    fn test_rename_absent_tag() {
        let temp_dir = TempDir::new().unwrap();
        let vault = open_vault(&temp_dir);
        write_raw(temp_dir.path(), "notes/a.md", &["one"]);
        write_raw(temp_dir.path(), "notes/b.md", &["two"]);

        assert!(vault.rename_tag("three", "four", None).unwrap().is_empty());
        println!("✅ test_rename_absent_tag passed");
    }

    /// Test: removing the last tag drops the key instead of writing `tags: []`
    #[test]
    fn test_remove_only_tag_removes_key() {
        let temp_dir = TempDir::new().unwrap();
        let vault = open_vault(&temp_dir);
        let path = write_raw(temp_dir.path(), "notes/single.md", &["Lonely"]);

        vault.remove_tag(&NoteRef::filepath(&path), "lonely").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(!content.contains("tags"), "tags key should be gone:\n{}", content);
        assert!(vault.get_tags(&NoteRef::filepath(&path)).unwrap().is_empty());

        println!("✅ test_remove_only_tag_removes_key passed");
    }

    /// Test: the scan root decides which notes contribute tags
    #[test]
    fn test_list_all_tags_scope() {
        let temp_dir = TempDir::new().unwrap();
        let vault = open_vault(&temp_dir);
        write_raw(temp_dir.path(), "root-only.md", &["RootTag"]);
        write_raw(temp_dir.path(), "notes/inner.md", &["Shared", "inner"]);
        write_raw(temp_dir.path(), "notes/deep/more.md", &["shared"]);

        assert_eq!(
            vault.list_all_tags(None).unwrap(),
            vec!["inner", "roottag", "shared"]
        );
        assert_eq!(
            vault.list_all_tags(Some(Path::new("notes"))).unwrap(),
            vec!["inner", "shared"]
        );

        let found = vault.find_notes_with_tag("SHARED", None).unwrap();
        assert_eq!(
            found,
            vec![
                temp_dir.path().join("notes/deep/more.md"),
                temp_dir.path().join("notes/inner.md"),
            ]
        );

        println!("✅ test_list_all_tags_scope passed");
    }

    /// Test: a blank search tag matches nothing
    #[test]
    fn test_find_blank_tag() {
        let temp_dir = TempDir::new().unwrap();
        let vault = open_vault(&temp_dir);
        write_raw(temp_dir.path(), "notes/a.md", &["x"]);

        assert!(vault.find_notes_with_tag("   ", None).unwrap().is_empty());
        assert!(vault.find_notes_with_tag("", None).unwrap().is_empty());
    }

    /// Test: normalizer properties over a spread of inputs
    #[test]
    fn test_normalizer_properties() {
        let safe = ["Rust", "  spaced out  ", "MiXeD-Case_tag", "día", "v1.2"];
        for tag in safe {
            let normalized = normalize(tag);
            assert!(validate_normalized(&normalized), "{:?}", tag);
            assert_eq!(normalize(&normalized), normalized);
        }

        for bad in [",", "<", ">", "/", "?", "'", "\"", "`"] {
            let tag = format!("pre{}post", bad);
            assert!(validate_raw(&tag).is_err(), "{:?} should be rejected", tag);
        }
    }
}

use super::*;
use std::fs;
use tempfile::TempDir;

fn rules(patterns: &[&str]) -> ExclusionRules {
    ExclusionRules::new(patterns).expect("patterns should compile")
}

#[test]
fn markdown_extension_detection() {
    assert!(is_markdown_file(Path::new("notes/idea.md")));
    assert!(is_markdown_file(Path::new("notes/IDEA.MD")));
    assert!(is_markdown_file(Path::new("notes/long.markdown")));
    assert!(!is_markdown_file(Path::new("notes/image.png")));
    assert!(!is_markdown_file(Path::new("notes/md")));
}

#[test]
fn note_id_is_relative_with_forward_slashes() {
    let root = Path::new("/vault");
    assert_eq!(
        note_id(root, Path::new("/vault/projects/rust/ideas.md")),
        "projects/rust/ideas.md"
    );
    assert_eq!(note_id(root, Path::new("/vault/top.md")), "top.md");
}

#[test]
fn front_matter_is_split_from_body() {
    let content = "---\ntitle: Ownership notes\ntags: rust, memory\n---\n# Heading\nBody text\n";
    let (front_matter, body) = extract_front_matter(content);

    assert_eq!(
        front_matter.get("title").map(String::as_str),
        Some("Ownership notes")
    );
    assert_eq!(
        front_matter.get("tags").map(String::as_str),
        Some("rust, memory")
    );
    assert_eq!(body, "# Heading\nBody text\n");
}

#[test]
fn missing_or_unterminated_front_matter_keeps_body() {
    let (front_matter, body) = extract_front_matter("# Just a note\n");
    assert!(front_matter.is_empty());
    assert_eq!(body, "# Just a note\n");

    let content = "---\ntitle: never closed\nbody";
    let (front_matter, body) = extract_front_matter(content);
    assert!(front_matter.is_empty());
    assert_eq!(body, content);
}

#[test]
fn markdown_is_rendered_to_plain_text() {
    let markdown = "# Borrowing\n\nThe **borrow checker** enforces `&mut` rules.\n\n- first item\n- second [link](https://example.com)\n\n<div>inline html</div>\n";
    let text = markdown_to_text(markdown);

    assert!(text.starts_with("Borrowing"));
    assert!(text.contains("The borrow checker enforces &mut rules."));
    assert!(text.contains("first item"));
    assert!(text.contains("second link"));
    assert!(!text.contains("**"));
    assert!(!text.contains("https://example.com"));
    assert!(!text.contains("<div>"));
}

#[test]
fn title_prefers_front_matter_then_heading_then_stem() {
    let modified = Utc::now();

    let note = Note::from_content(
        "a.md".to_string(),
        PathBuf::from("/vault/a.md"),
        "---\ntitle: \"Front Title\"\n---\n# Heading Title\ntext".to_string(),
        modified,
    );
    assert_eq!(note.title, "Front Title");

    let note = Note::from_content(
        "b.md".to_string(),
        PathBuf::from("/vault/b.md"),
        "intro\n\n## Heading `Title`\ntext".to_string(),
        modified,
    );
    assert_eq!(note.title, "Heading Title");

    let note = Note::from_content(
        "c.md".to_string(),
        PathBuf::from("/vault/dir/c-note.md"),
        "plain text only".to_string(),
        modified,
    );
    assert_eq!(note.title, "c-note");
    assert_eq!(note.text, "plain text only");
}

#[test]
fn empty_note_detection() {
    let note = Note::from_content(
        "empty.md".to_string(),
        PathBuf::from("/vault/empty.md"),
        "---\ntitle: Empty\n---\n\n   \n".to_string(),
        Utc::now(),
    );
    assert!(note.is_empty());
}

#[test]
fn content_hash_is_stable() {
    let first = content_hash(b"same text");
    assert_eq!(first, content_hash(b"same text"));
    assert_ne!(first, content_hash(b"other text"));
    assert_eq!(first.len(), 64);
}

#[test]
fn exclusion_rules_match_components_and_globs() {
    let root = Path::new("/vault");
    let rules = rules(&[".obsidian", "templates/**", "*.excalidraw.md", "archive/old"]);

    assert!(rules.is_excluded(root, Path::new("/vault/.obsidian/workspace.md")));
    assert!(rules.is_excluded(root, Path::new("/vault/sub/.obsidian/x.md")));
    assert!(rules.is_excluded(root, Path::new("/vault/templates/daily.md")));
    assert!(rules.is_excluded(root, Path::new("/vault/drawings/plan.excalidraw.md")));
    assert!(rules.is_excluded(root, Path::new("/vault/archive/old/2019.md")));

    assert!(!rules.is_excluded(root, Path::new("/vault/notes/obsidian-tips.md")));
    assert!(!rules.is_excluded(root, Path::new("/vault/archive/new.md")));
    assert!(!rules.is_excluded(root, Path::new("/vault/my-templates.md")));
}

#[test]
fn blank_patterns_are_ignored_and_bad_patterns_rejected() {
    let rules = rules(&["", "  ", ".trash"]);
    assert_eq!(rules.len(), 1);

    assert!(ExclusionRules::new(&["[broken"]).is_err());
}

#[test]
fn eligibility_requires_markdown_and_no_exclusion() {
    let root = Path::new("/vault");
    let rules = rules(&[".trash"]);
    assert!(rules.is_eligible(root, Path::new("/vault/a.md")));
    assert!(!rules.is_eligible(root, Path::new("/vault/a.txt")));
    assert!(!rules.is_eligible(root, Path::new("/vault/.trash/a.md")));
}

#[test]
fn discover_notes_respects_exclusions() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let root = temp_dir.path();

    fs::create_dir_all(root.join("projects")).expect("mkdir");
    fs::create_dir_all(root.join(".obsidian")).expect("mkdir");
    fs::create_dir_all(root.join("private")).expect("mkdir");
    fs::write(root.join("inbox.md"), "inbox").expect("write");
    fs::write(root.join("projects/plan.markdown"), "plan").expect("write");
    fs::write(root.join("projects/diagram.png"), "png").expect("write");
    fs::write(root.join(".obsidian/cache.md"), "cache").expect("write");
    fs::write(root.join("private/secret.md"), "secret").expect("write");

    let files = discover_notes(root, &rules(&[".obsidian", "private"]));
    let ids: Vec<String> = files.iter().map(|p| note_id(root, p)).collect();

    assert_eq!(ids, vec!["inbox.md", "projects/plan.markdown"]);
}

#[test]
fn discover_notes_under_a_subfolder() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let root = temp_dir.path();

    fs::create_dir_all(root.join("projects/archive")).expect("mkdir");
    fs::write(root.join("inbox.md"), "inbox").expect("write");
    fs::write(root.join("projects/plan.md"), "plan").expect("write");
    fs::write(root.join("projects/archive/old.md"), "old").expect("write");
    fs::write(root.join("projects/sketch.png"), "png").expect("write");

    let files = discover_notes_under(root, &root.join("projects"), &rules(&[]));
    let ids: Vec<String> = files.iter().map(|p| note_id(root, p)).collect();
    assert_eq!(ids, vec!["projects/archive/old.md", "projects/plan.md"]);

    let files = discover_notes_under(root, &root.join("projects"), &rules(&["projects/archive"]));
    let ids: Vec<String> = files.iter().map(|p| note_id(root, p)).collect();
    assert_eq!(ids, vec!["projects/plan.md"]);
}

#[tokio::test]
async fn read_note_loads_content_and_flags() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let root = temp_dir.path();
    fs::create_dir_all(root.join("drafts")).expect("mkdir");
    let path = root.join("drafts/idea.md");
    fs::write(&path, "# Idea\nA thought about lifetimes.").expect("write");

    let note = read_note(root, &path, &rules(&["drafts"]))
        .await
        .expect("should read note");
    assert_eq!(note.id, "drafts/idea.md");
    assert_eq!(note.title, "Idea");
    assert!(note.text.contains("A thought about lifetimes."));
    assert!(note.excluded);
}

#[tokio::test]
async fn read_missing_note_is_a_file_read_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("gone.md");

    let err = read_note(temp_dir.path(), &path, &ExclusionRules::default())
        .await
        .expect_err("missing file should fail");
    assert!(matches!(err, VaultError::FileRead { .. }));
    assert_eq!(err.kind(), "file_read");
    assert!(!err.is_retryable());
}

#[test]
fn excerpt_and_truncation_respect_char_boundaries() {
    assert_eq!(excerpt("héllo wörld", 5), "héllo...");
    assert_eq!(excerpt("short", 10), "short");
    assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
    assert_eq!(truncate_chars("abc", 3), "abc");
}

use super::*;
use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind};
use std::sync::{Arc, Mutex};

fn raw(path: &str, kind: ChangeKind) -> RawChange {
    RawChange {
        path: PathBuf::from(path),
        kind,
    }
}

fn rules() -> ExclusionRules {
    ExclusionRules::new(&[".obsidian", "templates/**"]).expect("patterns should compile")
}

type Fired = Arc<Mutex<Vec<ChangeEvent>>>;

fn spawn_debouncer(
    window: Duration,
) -> (
    mpsc::Sender<RawChange>,
    Fired,
    CancellationToken,
    tokio::task::JoinHandle<()>,
) {
    let (tx, rx) = mpsc::channel(64);
    let fired: Fired = Arc::new(Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();
    let sink = Arc::clone(&fired);
    let handle = tokio::spawn(Debouncer::new(window).run(rx, cancel.clone(), move |event| {
        sink.lock().expect("fired lock").push(event);
    }));
    (tx, fired, cancel, handle)
}

fn fired_kinds(fired: &Fired) -> Vec<(PathBuf, ChangeKind)> {
    fired
        .lock()
        .expect("fired lock")
        .iter()
        .map(|e| (e.path.clone(), e.kind))
        .collect()
}

#[test]
fn kind_coalescing() {
    use ChangeKind::*;

    assert_eq!(Created.coalesce(Modified), Created);
    assert_eq!(Deleted.coalesce(Created), Modified);
    assert_eq!(Deleted.coalesce(Modified), Modified);
    assert_eq!(Created.coalesce(Deleted), Deleted);
    assert_eq!(Modified.coalesce(Deleted), Deleted);
    assert_eq!(Modified.coalesce(Created), Created);
    assert_eq!(Modified.coalesce(Modified), Modified);
}

#[test]
fn classify_maps_notify_kinds() {
    let root = Path::new("/vault");
    let rules = rules();

    let created = Event::new(EventKind::Create(CreateKind::File)).add_path("/vault/a.md".into());
    assert_eq!(
        classify_event(root, &rules, &created),
        vec![raw("/vault/a.md", ChangeKind::Created)]
    );

    let written = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
        .add_path("/vault/a.md".into());
    assert_eq!(
        classify_event(root, &rules, &written),
        vec![raw("/vault/a.md", ChangeKind::Modified)]
    );

    let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/vault/a.md".into());
    assert_eq!(
        classify_event(root, &rules, &removed),
        vec![raw("/vault/a.md", ChangeKind::Deleted)]
    );
}

#[test]
fn rename_becomes_delete_and_create() {
    let root = Path::new("/vault");
    let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
        .add_path("/vault/old.md".into())
        .add_path("/vault/new.md".into());

    assert_eq!(
        classify_event(root, &rules(), &event),
        vec![
            raw("/vault/old.md", ChangeKind::Deleted),
            raw("/vault/new.md", ChangeKind::Created),
        ]
    );

    let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
        .add_path("/vault/old.md".into());
    assert_eq!(
        classify_event(root, &rules(), &from),
        vec![raw("/vault/old.md", ChangeKind::Deleted)]
    );
}

#[test]
fn irrelevant_events_are_dropped() {
    let root = Path::new("/vault");
    let rules = rules();

    let cases = [
        Event::new(EventKind::Create(CreateKind::File)).add_path("/vault/image.png".into()),
        Event::new(EventKind::Create(CreateKind::File))
            .add_path("/vault/.obsidian/workspace.md".into()),
        Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Any)))
            .add_path("/vault/templates/daily.md".into()),
        Event::new(EventKind::Create(CreateKind::Folder)).add_path("/vault/missing-folder".into()),
        Event::new(EventKind::Remove(RemoveKind::File)).add_path("/vault/image.png".into()),
        Event::new(EventKind::Remove(RemoveKind::Folder)).add_path("/vault/.obsidian/cache".into()),
        Event::new(EventKind::Remove(RemoveKind::Folder)).add_path("/vault".into()),
        Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)))
            .add_path("/vault/a.md".into()),
        Event::new(EventKind::Access(AccessKind::Any)).add_path("/vault/a.md".into()),
    ];

    for event in &cases {
        assert!(
            classify_event(root, &rules, event).is_empty(),
            "{event:?} should be dropped"
        );
    }
}

#[test]
fn removed_folder_is_reported_for_cleanup() {
    let root = Path::new("/vault");

    let moved_out = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
        .add_path("/vault/projects".into());
    assert_eq!(
        classify_event(root, &rules(), &moved_out),
        vec![raw("/vault/projects", ChangeKind::Deleted)]
    );

    let removed = Event::new(EventKind::Remove(RemoveKind::Folder)).add_path("/vault/projects".into());
    assert_eq!(
        classify_event(root, &rules(), &removed),
        vec![raw("/vault/projects", ChangeKind::Deleted)]
    );
}

#[test]
fn folder_moved_in_reports_each_note() {
    let temp_dir = tempfile::TempDir::new().expect("should create temp dir");
    let root = temp_dir.path();
    std::fs::create_dir_all(root.join("projects/deep")).expect("mkdir");
    std::fs::create_dir_all(root.join("projects/.obsidian")).expect("mkdir");
    std::fs::write(root.join("projects/plan.md"), "# Plan").expect("write");
    std::fs::write(root.join("projects/deep/idea.md"), "# Idea").expect("write");
    std::fs::write(root.join("projects/diagram.png"), "png").expect("write");
    std::fs::write(root.join("projects/.obsidian/cache.md"), "cache").expect("write");

    let moved_in = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
        .add_path(root.join("projects"));
    let expected = vec![
        RawChange {
            path: root.join("projects/deep/idea.md"),
            kind: ChangeKind::Created,
        },
        RawChange {
            path: root.join("projects/plan.md"),
            kind: ChangeKind::Created,
        },
    ];
    assert_eq!(classify_event(root, &rules(), &moved_in), expected);

    let created = Event::new(EventKind::Create(CreateKind::Folder)).add_path(root.join("projects"));
    assert_eq!(classify_event(root, &rules(), &created), expected);

    let renamed = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
        .add_path(root.join("old-projects"))
        .add_path(root.join("projects"));
    let mut with_removal = vec![RawChange {
        path: root.join("old-projects"),
        kind: ChangeKind::Deleted,
    }];
    with_removal.extend(expected);
    assert_eq!(classify_event(root, &rules(), &renamed), with_removal);
}

#[tokio::test]
async fn drain_due_respects_per_file_deadlines() {
    let mut debouncer = Debouncer::new(Duration::from_secs(5));
    let start = Instant::now();

    debouncer.push(raw("/vault/a.md", ChangeKind::Created), start);
    debouncer.push(
        raw("/vault/b.md", ChangeKind::Modified),
        start + Duration::from_secs(2),
    );
    debouncer.push(
        raw("/vault/a.md", ChangeKind::Modified),
        start + Duration::from_secs(1),
    );

    assert_eq!(debouncer.pending_len(), 2);
    assert_eq!(
        debouncer.next_deadline(),
        Some(start + Duration::from_secs(6))
    );
    assert!(debouncer.drain_due(start + Duration::from_secs(5)).is_empty());

    let first = debouncer.drain_due(start + Duration::from_secs(6));
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].path, PathBuf::from("/vault/a.md"));
    assert_eq!(first[0].kind, ChangeKind::Created);

    let second = debouncer.drain_due(start + Duration::from_secs(7));
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].path, PathBuf::from("/vault/b.md"));
    assert_eq!(debouncer.pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn rapid_events_fire_once() {
    let (tx, fired, cancel, handle) = spawn_debouncer(Duration::from_secs(5));

    for _ in 0..5 {
        tx.send(raw("/vault/a.md", ChangeKind::Modified))
            .await
            .expect("debouncer is running");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert!(fired_kinds(&fired).is_empty());

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(
        fired_kinds(&fired),
        vec![(PathBuf::from("/vault/a.md"), ChangeKind::Modified)]
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(fired_kinds(&fired).len(), 1);

    cancel.cancel();
    handle.await.expect("debouncer task should stop");
}

#[tokio::test(start_paused = true)]
async fn independent_files_have_independent_deadlines() {
    let (tx, fired, cancel, handle) = spawn_debouncer(Duration::from_secs(5));

    tx.send(raw("/vault/a.md", ChangeKind::Created))
        .await
        .expect("send");
    tokio::time::sleep(Duration::from_secs(3)).await;
    tx.send(raw("/vault/b.md", ChangeKind::Created))
        .await
        .expect("send");

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(
        fired_kinds(&fired),
        vec![(PathBuf::from("/vault/a.md"), ChangeKind::Created)]
    );

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(
        fired_kinds(&fired),
        vec![
            (PathBuf::from("/vault/a.md"), ChangeKind::Created),
            (PathBuf::from("/vault/b.md"), ChangeKind::Created),
        ]
    );

    cancel.cancel();
    handle.await.expect("debouncer task should stop");
}

#[tokio::test(start_paused = true)]
async fn delete_after_edit_fires_deletion() {
    let (tx, fired, cancel, handle) = spawn_debouncer(Duration::from_secs(2));

    tx.send(raw("/vault/a.md", ChangeKind::Modified))
        .await
        .expect("send");
    tx.send(raw("/vault/a.md", ChangeKind::Deleted))
        .await
        .expect("send");

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(
        fired_kinds(&fired),
        vec![(PathBuf::from("/vault/a.md"), ChangeKind::Deleted)]
    );

    cancel.cancel();
    handle.await.expect("debouncer task should stop");
}

#[tokio::test(start_paused = true)]
async fn closing_the_channel_flushes_pending_changes() {
    let (tx, fired, _cancel, handle) = spawn_debouncer(Duration::from_secs(60));

    tx.send(raw("/vault/a.md", ChangeKind::Created))
        .await
        .expect("send");
    drop(tx);

    handle.await.expect("debouncer task should stop");
    assert_eq!(
        fired_kinds(&fired),
        vec![(PathBuf::from("/vault/a.md"), ChangeKind::Created)]
    );
}

#[tokio::test]
async fn watcher_reports_new_note() {
    let temp_dir = tempfile::TempDir::new().expect("should create temp dir");
    let root = temp_dir
        .path()
        .canonicalize()
        .expect("temp dir should canonicalize");

    let (watcher, mut rx) = VaultWatcher::start(&root, rules()).expect("should start watcher");
    assert_eq!(watcher.root(), root.as_path());

    tokio::fs::write(root.join("fresh.md"), "# Fresh")
        .await
        .expect("write");
    tokio::fs::write(root.join("ignored.txt"), "text")
        .await
        .expect("write");

    let change = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("a change should arrive")
        .expect("channel open");
    assert_eq!(change.path, root.join("fresh.md"));
    assert!(matches!(
        change.kind,
        ChangeKind::Created | ChangeKind::Modified
    ));
}

async fn next_change_for(rx: &mut mpsc::Receiver<RawChange>, path: &Path) -> RawChange {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let change = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("no change arrived for {}", path.display()))
            .expect("channel open");
        if change.path == path {
            return change;
        }
    }
}

#[tokio::test]
async fn relative_vault_root_yields_vault_relative_ids() {
    // Cargo runs unit tests from the package root
    let temp_dir =
        tempfile::TempDir::new_in(".").expect("should create temp dir in the working directory");
    let name = temp_dir.path().file_name().expect("temp dir has a name");
    let mut config = crate::config::Config::default();
    config.vault.path = Some(Path::new(".").join(name));

    let root = config.vault_path().expect("relative vault is accepted");
    let (_watcher, mut rx) = VaultWatcher::start(&root, rules()).expect("should start watcher");

    std::fs::create_dir_all(temp_dir.path().join("templates")).expect("mkdir");
    std::fs::write(temp_dir.path().join("templates/daily.md"), "# Daily").expect("write");
    std::fs::write(temp_dir.path().join("a.md"), "# A").expect("write");

    let change = next_change_for(&mut rx, &root.join("a.md")).await;
    assert_eq!(crate::notes::note_id(&root, &change.path), "a.md");

    while let Ok(change) = rx.try_recv() {
        assert!(
            !change.path.starts_with(root.join("templates")),
            "excluded note reported: {}",
            change.path.display()
        );
    }
}

#[tokio::test]
async fn watcher_reports_folder_moves() {
    let temp_dir = tempfile::TempDir::new().expect("should create temp dir");
    let root = temp_dir
        .path()
        .canonicalize()
        .expect("temp dir should canonicalize");
    let outside = tempfile::TempDir::new().expect("should create outside dir");
    std::fs::create_dir_all(root.join("projects")).expect("mkdir");
    std::fs::write(root.join("projects/plan.md"), "# Plan").expect("write");
    std::fs::create_dir_all(outside.path().join("archive")).expect("mkdir");
    std::fs::write(outside.path().join("archive/old.md"), "# Old").expect("write");

    let (_watcher, mut rx) = VaultWatcher::start(&root, rules()).expect("should start watcher");

    std::fs::rename(root.join("projects"), outside.path().join("projects")).expect("move out");
    let removal = next_change_for(&mut rx, &root.join("projects")).await;
    assert_eq!(removal.kind, ChangeKind::Deleted);

    std::fs::rename(outside.path().join("archive"), root.join("archive")).expect("move in");
    let arrival = next_change_for(&mut rx, &root.join("archive/old.md")).await;
    assert_eq!(arrival.kind, ChangeKind::Created);
}

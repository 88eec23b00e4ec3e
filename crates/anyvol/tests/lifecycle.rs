//! End-to-end volume lifecycle scenarios against a recording executor.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyvol::catalog::MountTypeCatalog;
use anyvol::engine::MountEngine;
use anyvol::exec::CommandExecutor;
use anyvol::registry::{OptionValue, VolumeRegistry};
use anyvol::runtime::{CreateOpts, VolumeLifecycle};
use anyvol::staging::SourceFetcher;
use anyvol_common::{AnyvolError, AnyvolPaths, AnyvolResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Start(Vec<String>),
    End(Vec<String>),
}

/// Records every command instead of running it.
#[derive(Default)]
struct RecordingExecutor {
    events: Mutex<Vec<Event>>,
    delay: Option<Duration>,
    fail_program: Option<String>,
}

impl RecordingExecutor {
    fn commands(&self) -> Vec<Vec<String>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Start(argv) => Some(argv.clone()),
                Event::End(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, command: &[String], _stdin: Option<&str>) -> AnyvolResult<()> {
        self.events.lock().push(Event::Start(command.to_vec()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.events.lock().push(Event::End(command.to_vec()));

        if self.fail_program.as_deref() == command.first().map(String::as_str) {
            return Err(AnyvolError::CommandFailed {
                command: command.to_vec(),
                exit_code: Some(1),
            });
        }
        Ok(())
    }
}

/// Writes fixed content instead of downloading.
#[derive(Default)]
struct FakeFetcher {
    fail: bool,
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> AnyvolResult<()> {
        if self.fail {
            return Err(AnyvolError::Download {
                url: url.to_string(),
                message: "connection refused".to_string(),
            });
        }
        std::fs::write(dest, format!("fetched from {url}"))?;
        Ok(())
    }
}

struct Harness {
    _root: TempDir,
    paths: AnyvolPaths,
    executor: Arc<RecordingExecutor>,
    volumes: VolumeLifecycle,
}

fn harness_with(executor: RecordingExecutor, fetcher: FakeFetcher) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let paths = AnyvolPaths::with_root(root.path());
    let executor = Arc::new(executor);
    let engine = MountEngine::new(Arc::new(MountTypeCatalog::builtin()), executor.clone());
    let volumes = VolumeLifecycle::new(paths.clone(), engine, Arc::new(fetcher)).unwrap();
    Harness {
        _root: root,
        paths,
        executor,
        volumes,
    }
}

fn harness() -> Harness {
    harness_with(RecordingExecutor::default(), FakeFetcher::default())
}

fn opts(value: serde_json::Value) -> CreateOpts {
    serde_json::from_value(value).unwrap()
}

fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(ToString::to_string).collect()
}

#[test_log::test(tokio::test)]
async fn nfs_volume_full_lifecycle() {
    let h = harness();
    h.volumes
        .create("v1", Some(&opts(json!({"type": "nfs", "src": "host:/export"}))))
        .await
        .unwrap();

    let mountpoint = h.volumes.path("v1").unwrap();
    assert!(mountpoint.starts_with(h.paths.volumes()));

    let mounted = h.volumes.mount("v1", Some("c1")).await.unwrap();
    assert_eq!(mounted, mountpoint);
    assert!(mountpoint.is_dir());

    h.volumes.unmount("v1", Some("c1")).await.unwrap();
    assert!(!mountpoint.exists());

    let mp = mountpoint.display().to_string();
    assert_eq!(
        h.executor.commands(),
        vec![
            argv(&["mount", "-t", "nfs", "host:/export", &mp]),
            argv(&["umount", &mp]),
        ]
    );

    h.volumes.remove("v1").await.unwrap();
    assert!(h.volumes.list().is_empty());
    assert!(
        VolumeRegistry::load(&h.paths.state_file())
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn s3fs_credentials_are_written_to_a_private_file() {
    let h = harness();
    h.volumes
        .create(
            "bucket",
            Some(&opts(json!({
                "type": "s3fs",
                "src": "my-bucket",
                "access_key": "key",
                "secret_key": "secret",
                "o": "allow_other",
            }))),
        )
        .await
        .unwrap();

    let mountpoint = h.volumes.mount("bucket", None).await.unwrap();
    let creds = PathBuf::from(format!("{}.passwd-s3fs", mountpoint.display()));

    assert_eq!(std::fs::read_to_string(&creds).unwrap(), "key:secret\n");
    let mode = std::fs::metadata(&creds).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    let command = &h.executor.commands()[0];
    assert_eq!(
        command,
        &argv(&[
            "s3fs",
            "-o",
            &format!("passwd_file={}", creds.display()),
            "-o",
            "allow_other",
            "my-bucket",
            &mountpoint.display().to_string(),
        ])
    );
    assert!(!command.iter().any(|arg| arg.contains("access_key")));
    assert!(!command.iter().any(|arg| arg.contains("secret")));

    h.volumes.unmount("bucket", None).await.unwrap();
    assert!(!creds.exists());
}

#[tokio::test]
async fn unknown_type_leaves_registry_unchanged() {
    let h = harness();
    let err = h
        .volumes
        .create("v1", Some(&opts(json!({"type": "zfs", "src": "tank/data"}))))
        .await
        .unwrap_err();

    assert!(matches!(err, AnyvolError::UnknownType { .. }));
    assert!(err.is_client_error());
    assert!(h.volumes.list().is_empty());
    assert!(!h.paths.state_file().exists());
    assert!(h.executor.commands().is_empty());
}

#[tokio::test]
async fn template_errors_reject_create() {
    let h = harness();
    let err = h
        .volumes
        .create(
            "v1",
            Some(&opts(json!({"type": "s3fs", "src": "b", "access_key": "k"}))),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AnyvolError::Template(_)), "{err}");
    assert!(h.volumes.get("v1").is_err());
}

#[tokio::test]
async fn mountpoint_is_deterministic_and_name_scoped() {
    let request = opts(json!({"type": "nfs", "src": "host:/export"}));

    let first = harness();
    let second = harness();
    first.volumes.create("v1", Some(&request)).await.unwrap();
    second.volumes.create("v1", Some(&request)).await.unwrap();
    first.volumes.create("v2", Some(&request)).await.unwrap();

    let relative = |h: &Harness, name: &str| {
        h.volumes
            .path(name)
            .unwrap()
            .strip_prefix(h.paths.volumes())
            .unwrap()
            .to_path_buf()
    };
    assert_eq!(relative(&first, "v1"), relative(&second, "v1"));
    assert_ne!(relative(&first, "v1"), relative(&first, "v2"));
}

#[tokio::test]
async fn option_string_is_normalized() {
    let h = harness();
    h.volumes
        .create(
            "v1",
            Some(&opts(json!({"type": "nfs", "src": "host:/export", "o": "uid=1000,ro"}))),
        )
        .await
        .unwrap();

    let record = h.volumes.get("v1").unwrap();
    assert_eq!(record.options.len(), 2);
    assert_eq!(record.options["uid"], OptionValue::Text("1000".to_string()));
    assert_eq!(record.options["ro"], OptionValue::Flag(true));
}

#[tokio::test]
async fn duplicate_create_is_rejected() {
    let h = harness();
    let request = opts(json!({"type": "nfs", "src": "host:/export"}));
    h.volumes.create("v1", Some(&request)).await.unwrap();

    let other = opts(json!({"type": "nfs", "src": "other:/export"}));
    let err = h.volumes.create("v1", Some(&other)).await.unwrap_err();
    assert!(matches!(err, AnyvolError::VolumeExists { .. }));
    assert_eq!(h.volumes.get("v1").unwrap().src, "host:/export");
}

#[tokio::test]
async fn invalid_names_are_rejected() {
    let h = harness();
    let request = opts(json!({"type": "nfs", "src": "host:/export"}));
    for name in ["", "../etc", "-v1"] {
        let err = h.volumes.create(name, Some(&request)).await.unwrap_err();
        assert!(err.is_client_error(), "{name}: {err}");
    }
    assert!(h.volumes.list().is_empty());
}

#[tokio::test]
async fn unknown_volumes_are_not_found() {
    let h = harness();
    for err in [
        h.volumes.mount("ghost", None).await.unwrap_err(),
        h.volumes.unmount("ghost", None).await.unwrap_err(),
        h.volumes.remove("ghost").await.unwrap_err(),
        h.volumes.path("ghost").unwrap_err(),
        h.volumes.get("ghost").unwrap_err(),
    ] {
        assert!(matches!(err, AnyvolError::VolumeNotFound { .. }), "{err}");
        assert_eq!(err.to_string(), "no volume: ghost");
    }
}

#[tokio::test]
async fn mounts_are_shared_between_callers() {
    let h = harness();
    h.volumes
        .create("v1", Some(&opts(json!({"type": "nfs", "src": "host:/export"}))))
        .await
        .unwrap();

    h.volumes.mount("v1", Some("c1")).await.unwrap();
    h.volumes.mount("v1", Some("c2")).await.unwrap();
    assert_eq!(h.volumes.active_callers("v1"), 2);
    assert_eq!(h.executor.commands().len(), 1);

    let err = h.volumes.remove("v1").await.unwrap_err();
    assert!(matches!(err, AnyvolError::VolumeInUse { callers: 2, .. }));

    h.volumes.unmount("v1", Some("c1")).await.unwrap();
    assert_eq!(h.executor.commands().len(), 1);
    assert!(h.volumes.path("v1").unwrap().is_dir());

    h.volumes.unmount("v1", Some("c2")).await.unwrap();
    assert_eq!(h.executor.commands().len(), 2);
    assert_eq!(h.volumes.active_callers("v1"), 0);

    h.volumes.remove("v1").await.unwrap();
}

#[tokio::test]
async fn failed_mount_is_not_recorded_as_held() {
    let h = harness_with(
        RecordingExecutor {
            fail_program: Some("mount".to_string()),
            ..RecordingExecutor::default()
        },
        FakeFetcher::default(),
    );
    h.volumes
        .create("v1", Some(&opts(json!({"type": "nfs", "src": "host:/export"}))))
        .await
        .unwrap();

    let err = h.volumes.mount("v1", Some("c1")).await.unwrap_err();
    assert!(matches!(err, AnyvolError::CommandFailed { .. }));
    assert!(!err.is_client_error());
    assert_eq!(h.volumes.active_callers("v1"), 0);
    h.volumes.remove("v1").await.unwrap();
}

#[tokio::test]
async fn remote_sources_are_staged_and_cleaned_up() {
    let h = harness();
    h.volumes
        .create(
            "image",
            Some(&opts(json!({
                "type": "squashfuse",
                "src": "https://example.com/image.sqfs",
            }))),
        )
        .await
        .unwrap();

    let record = h.volumes.get("image").unwrap();
    let staged = record.staged_source.clone().unwrap();
    assert!(staged.starts_with(h.paths.staging()));
    assert_eq!(record.src, staged.display().to_string());
    assert_eq!(
        record.original_src.as_deref(),
        Some("https://example.com/image.sqfs")
    );
    assert_eq!(
        std::fs::read_to_string(&staged).unwrap(),
        "fetched from https://example.com/image.sqfs"
    );

    h.volumes.mount("image", None).await.unwrap();
    assert_eq!(h.executor.commands()[0][1], staged.display().to_string());
    h.volumes.unmount("image", None).await.unwrap();

    h.volumes.remove("image").await.unwrap();
    assert!(!staged.exists());
}

#[tokio::test]
async fn failed_download_aborts_create() {
    let h = harness_with(RecordingExecutor::default(), FakeFetcher { fail: true });
    let err = h
        .volumes
        .create(
            "image",
            Some(&opts(json!({
                "type": "squashfuse",
                "src": "https://example.com/image.sqfs",
            }))),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AnyvolError::Download { .. }));
    assert!(h.volumes.list().is_empty());
    assert_eq!(std::fs::read_dir(h.paths.staging()).unwrap().count(), 0);
}

#[tokio::test]
async fn failed_state_write_discards_staged_source() {
    let h = harness();
    let state_dir = h.paths.state();
    std::fs::remove_dir_all(&state_dir).unwrap();
    std::fs::write(&state_dir, "not a directory").unwrap();

    let err = h
        .volumes
        .create(
            "image",
            Some(&opts(json!({
                "type": "squashfuse",
                "src": "https://example.com/image.sqfs",
            }))),
        )
        .await
        .unwrap_err();

    assert!(!err.is_client_error());
    assert!(h.volumes.list().is_empty());
    assert!(matches!(
        h.volumes.get("image"),
        Err(AnyvolError::VolumeNotFound { .. })
    ));
    assert_eq!(std::fs::read_dir(h.paths.staging()).unwrap().count(), 0);
}

#[tokio::test]
async fn unmount_reports_a_busy_mountpoint() {
    let h = harness();
    h.volumes
        .create("v1", Some(&opts(json!({"type": "nfs", "src": "host:/export"}))))
        .await
        .unwrap();
    let mountpoint = h.volumes.mount("v1", Some("c1")).await.unwrap();
    std::fs::write(mountpoint.join("leftover"), "still here").unwrap();

    let err = h.volumes.unmount("v1", Some("c1")).await.unwrap_err();
    assert!(matches!(err, AnyvolError::Io(_)));
    assert!(!err.is_client_error());
    assert!(mountpoint.join("leftover").exists());
    assert_eq!(h.executor.commands().last().unwrap()[0], "umount");
}

#[tokio::test]
async fn registry_survives_restart() {
    let h = harness();
    h.volumes
        .create("v1", Some(&opts(json!({"type": "sshfs", "src": "user@host:/data"}))))
        .await
        .unwrap();
    let before = h.volumes.get("v1").unwrap();

    let engine = MountEngine::new(
        Arc::new(MountTypeCatalog::builtin()),
        h.executor.clone(),
    );
    let restarted =
        VolumeLifecycle::new(h.paths.clone(), engine, Arc::new(FakeFetcher::default())).unwrap();
    assert_eq!(restarted.get("v1").unwrap(), before);

    // Mount state is not persisted: unmount after a restart still unmounts.
    restarted.unmount("v1", Some("c1")).await.unwrap();
    assert_eq!(h.executor.commands().last().unwrap()[0], "fusermount");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_on_one_volume_never_interleave() {
    let h = Arc::new(harness_with(
        RecordingExecutor {
            delay: Some(Duration::from_millis(25)),
            ..RecordingExecutor::default()
        },
        FakeFetcher::default(),
    ));
    h.volumes
        .create("v1", Some(&opts(json!({"type": "nfs", "src": "host:/export"}))))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..4 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            let caller = format!("c{i}");
            h.volumes.mount("v1", Some(&caller)).await.unwrap();
            h.volumes.unmount("v1", Some(&caller)).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let events = h.executor.events.lock().clone();
    assert!(!events.is_empty());
    for pair in events.chunks(2) {
        match pair {
            [Event::Start(a), Event::End(b)] => assert_eq!(a, b),
            other => panic!("interleaved command execution: {other:?}"),
        }
    }
    assert_eq!(h.volumes.active_callers("v1"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_volumes_proceed_in_parallel() {
    let h = Arc::new(harness_with(
        RecordingExecutor {
            delay: Some(Duration::from_millis(200)),
            ..RecordingExecutor::default()
        },
        FakeFetcher::default(),
    ));
    for name in ["a", "b"] {
        h.volumes
            .create(name, Some(&opts(json!({"type": "nfs", "src": "host:/export"}))))
            .await
            .unwrap();
    }

    let started = std::time::Instant::now();
    let (a, b) = tokio::join!(h.volumes.mount("a", None), h.volumes.mount("b", None));
    a.unwrap();
    b.unwrap();
    assert!(started.elapsed() < Duration::from_millis(390));
}

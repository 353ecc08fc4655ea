use capsules_buildah::testing::StubRunner;
use capsules_buildah::{Buildah, ContainerHandle, RunOptions, Streams, ToolError};
use std::fs;
use std::rc::Rc;

fn open(stub: &Rc<StubRunner>) -> ContainerHandle {
    let tool = Buildah::new(stub.clone());
    ContainerHandle::create(tool, "docker.io/library/alpine:3.20", None).unwrap()
}

#[test]
fn create_reads_back_inherited_config_as_clean_snapshot() {
    let stub = Rc::new(StubRunner::new());
    let ctr = open(&stub);

    assert_eq!(ctr.id(), "working-container-1");
    assert_eq!(ctr.config().command, vec!["/bin/sh"]);
    assert_eq!(ctr.config(), ctr.snapshot());
    assert!(!ctr.is_dirty());
    assert_eq!(stub.subcommands(), vec!["from", "inspect"]);
}

#[test]
fn reconcile_on_clean_handle_issues_no_config_call() {
    let stub = Rc::new(StubRunner::new());
    let mut ctr = open(&stub);

    assert!(!ctr.reconcile().unwrap());
    ctr.inspect().unwrap();
    assert_eq!(stub.count("config"), 0);
}

#[test]
fn mutations_are_batched_into_one_config_call() {
    let stub = Rc::new(StubRunner::new());
    let mut ctr = open(&stub);

    let cfg = ctr.config_mut();
    cfg.environ.insert("A".to_string(), "1".to_string());
    cfg.environ.insert("B".to_string(), "2".to_string());
    cfg.volumes.insert("/data".to_string());
    cfg.workdir = "/srv".to_string();
    assert!(ctr.is_dirty());
    assert_eq!(stub.count("config"), 0, "mutations must stay in memory");

    assert!(ctr.reconcile().unwrap());
    assert_eq!(ctr.config(), ctr.snapshot());
    assert!(!ctr.reconcile().unwrap());

    let config_calls = stub.calls_for("config");
    assert_eq!(config_calls.len(), 1);
    assert_eq!(
        config_calls[0],
        vec![
            "config",
            "--env",
            "A=1",
            "--env",
            "B=2",
            "--volume",
            "/data",
            "--workingdir",
            "/srv",
            "working-container-1",
        ]
    );
}

#[test]
fn commit_flushes_pending_config_first() {
    let stub = Rc::new(StubRunner::new());
    let mut ctr = open(&stub);
    ctr.config_mut()
        .environ
        .insert("X".to_string(), "1".to_string());

    let image = ctr.commit().unwrap();

    assert_eq!(image.id(), "sha256:image2");
    let order = stub.subcommands();
    let config_at = order.iter().position(|s| s == "config").unwrap();
    let commit_at = order.iter().position(|s| s == "commit").unwrap();
    assert!(config_at < commit_at);
    assert_eq!(
        stub.calls_for("config")[0],
        vec!["config", "--env", "X=1", "working-container-1"]
    );

    // The handle remains usable after commit.
    ctr.config_mut().workdir = "/app".to_string();
    ctr.commit().unwrap();
    assert_eq!(stub.count("config"), 2);
}

#[test]
fn run_flushes_config_and_forwards_options() {
    let stub = Rc::new(StubRunner::new().with_captured_output("hello\n"));
    let mut ctr = open(&stub);
    ctr.config_mut().command = vec!["nginx".to_string(), "-g".to_string()];

    let out = ctr
        .run(
            &["echo".to_string(), "hello".to_string()],
            &RunOptions {
                user: Some("root".to_string()),
                volumes: vec!["/tmp:/tmp".to_string()],
                ..Default::default()
            },
            &Streams {
                capture: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(out.as_deref(), Some("hello\n"));
    assert_eq!(stub.subcommands(), vec!["from", "inspect", "config", "run"]);
    assert_eq!(
        stub.calls_for("run")[0],
        vec![
            "run",
            "--user",
            "root",
            "--volume",
            "/tmp:/tmp",
            "working-container-1",
            "--",
            "echo",
            "hello"
        ]
    );
}

#[test]
fn shell_mode_fails_fast_without_touching_buildah() {
    let stub = Rc::new(StubRunner::new());
    let mut ctr = open(&stub);
    ctr.config_mut().workdir = "/x".to_string();

    let err = ctr
        .run(
            &["echo hi".to_string()],
            &RunOptions {
                shell: true,
                ..Default::default()
            },
            &Streams::default(),
        )
        .unwrap_err();

    assert!(matches!(err, ToolError::NotImplemented { .. }));
    assert_eq!(stub.count("config"), 0);
    assert_eq!(stub.count("run"), 0);
}

#[test]
fn failed_config_keeps_handle_dirty() {
    let stub = Rc::new(StubRunner::new().fail_on("config"));
    let mut ctr = open(&stub);
    ctr.config_mut()
        .labels
        .insert("k".to_string(), "v".to_string());

    let err = ctr.commit().unwrap_err();
    assert!(matches!(err, ToolError::Failed { status: Some(125), .. }));
    assert!(ctr.is_dirty());
    assert_eq!(stub.count("commit"), 0);
}

#[test]
fn drop_removes_working_container_once() {
    let stub = Rc::new(StubRunner::new());
    {
        let mut ctr = open(&stub);
        ctr.release().unwrap();
        assert!(ctr.is_released());
        assert!(matches!(
            ctr.commit().unwrap_err(),
            ToolError::Released { .. }
        ));
    }
    assert_eq!(stub.calls_for("rm"), vec![vec!["rm", "working-container-1"]]);

    {
        let _ctr = open(&stub);
    }
    assert_eq!(stub.count("rm"), 2);
}

#[test]
fn failed_read_back_still_removes_container() {
    let stub = Rc::new(StubRunner::new().fail_on("inspect"));
    let tool = Buildah::new(stub.clone());
    let err = ContainerHandle::create(tool, "alpine", None).unwrap_err();
    assert!(matches!(err, ToolError::Failed { .. }));
    assert_eq!(stub.count("rm"), 1);
}

#[test]
fn named_container_uses_requested_name() {
    let stub = Rc::new(StubRunner::new());
    let tool = Buildah::new(stub.clone());
    let ctr = ContainerHandle::create(tool, "alpine", Some("builder")).unwrap();
    assert_eq!(ctr.id(), "builder");
    assert_eq!(
        stub.calls_for("from")[0],
        vec!["from", "--name", "builder", "alpine"]
    );
}

#[test]
fn copy_out_copies_directory_and_unmounts() {
    let rootfs = tempfile::tempdir().unwrap();
    fs::create_dir_all(rootfs.path().join("etc/app/conf.d")).unwrap();
    fs::write(rootfs.path().join("etc/app/main.conf"), "main").unwrap();
    fs::write(rootfs.path().join("etc/app/conf.d/extra.conf"), "extra").unwrap();

    let host = tempfile::tempdir().unwrap();
    let dest = host.path().join("app");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("stale.conf"), "stale").unwrap();

    let stub = Rc::new(StubRunner::new().with_mount_root(rootfs.path()));
    let ctr = open(&stub);
    ctr.copy_out("/etc/app", &dest).unwrap();

    assert_eq!(fs::read_to_string(dest.join("main.conf")).unwrap(), "main");
    assert_eq!(
        fs::read_to_string(dest.join("conf.d/extra.conf")).unwrap(),
        "extra"
    );
    assert!(!dest.join("stale.conf").exists());
    assert_eq!(stub.count("mount"), 1);
    assert_eq!(stub.count("umount"), 1);
}

#[test]
fn copy_out_single_file_replaces_existing_directory() {
    let rootfs = tempfile::tempdir().unwrap();
    fs::create_dir_all(rootfs.path().join("usr/bin")).unwrap();
    fs::write(rootfs.path().join("usr/bin/tool"), "binary").unwrap();

    let host = tempfile::tempdir().unwrap();
    let dest = host.path().join("tool");
    fs::create_dir_all(dest.join("nested")).unwrap();

    let stub = Rc::new(StubRunner::new().with_mount_root(rootfs.path()));
    let ctr = open(&stub);
    ctr.copy_out("usr/bin/tool", &dest).unwrap();

    assert_eq!(fs::read_to_string(&dest).unwrap(), "binary");
}

#[test]
fn copy_out_unmounts_even_when_copy_fails() {
    let rootfs = tempfile::tempdir().unwrap();
    let host = tempfile::tempdir().unwrap();

    let stub = Rc::new(StubRunner::new().with_mount_root(rootfs.path()));
    let ctr = open(&stub);
    let err = ctr
        .copy_out("/does/not/exist", &host.path().join("out"))
        .unwrap_err();

    assert!(matches!(err, ToolError::Io { .. }));
    assert_eq!(stub.count("umount"), 1);
}

#[cfg(unix)]
#[test]
fn copy_out_keeps_a_directory_symlink_as_a_link() {
    let rootfs = tempfile::tempdir().unwrap();
    fs::create_dir_all(rootfs.path().join("usr/lib/app")).unwrap();
    fs::write(rootfs.path().join("usr/lib/app/data"), "data").unwrap();
    std::os::unix::fs::symlink("/usr/lib/app", rootfs.path().join("opt-app")).unwrap();

    let host = tempfile::tempdir().unwrap();
    let dest = host.path().join("out/app");

    let stub = Rc::new(StubRunner::new().with_mount_root(rootfs.path()));
    let ctr = open(&stub);
    ctr.copy_out("/opt-app", &dest).unwrap();

    let meta = fs::symlink_metadata(&dest).unwrap();
    assert!(meta.file_type().is_symlink());
    assert_eq!(
        fs::read_link(&dest).unwrap(),
        std::path::PathBuf::from("/usr/lib/app")
    );
    assert_eq!(stub.count("umount"), 1);
}

#[test]
fn copy_in_delegates_to_buildah_copy() {
    let stub = Rc::new(StubRunner::new());
    let ctr = open(&stub);
    ctr.copy_in("./site", "/usr/share/nginx/html").unwrap();
    ctr.add("https://example.com/a.tar.gz", "/opt").unwrap();
    assert_eq!(
        stub.calls_for("copy")[0],
        vec!["copy", "working-container-1", "./site", "/usr/share/nginx/html"]
    );
    assert_eq!(stub.count("add"), 1);
}

#[test]
fn tagging_an_image_shows_up_in_its_names() {
    let stub = Rc::new(StubRunner::new());
    let mut ctr = open(&stub);
    let image = ctr.commit().unwrap();

    image.add_tag("localhost/demo:1").unwrap();
    image.add_tag("localhost/demo:latest").unwrap();

    let names = image.names().unwrap();
    assert!(names.contains(&"localhost/demo:1".to_string()));
    assert!(names.contains(&"localhost/demo:latest".to_string()));
    assert_eq!(image.to_string(), image.id());
}

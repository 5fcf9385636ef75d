use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use control::fake::{Call, RecordingClient};
use control::{ControlPlane, Status};
use simexec::exec::{
    ComponentRunError, CoupledRun, ModelContext, ModelRunner, Outcome, Phase, RunMode, Slave,
    TaskLifecycle, TaskSpec, MODEL_FILE, MANIFEST_FILE,
};
use tempfile::{tempdir, TempDir};

const RUN_ID: &str = "deadbeef";

/// Build an input bundle whose run directory holds the given `(path, contents)` files.
fn bundle(files: &[(&str, &str)]) -> Result<Vec<u8>> {
    let src = tempdir()?;
    let run_dir = src.path().join(RUN_ID);
    std::fs::create_dir(&run_dir)?;
    for (path, contents) in files {
        let path = run_dir.join(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
    }
    let archive = simexec::transfer::pack(RUN_ID, src.path())?;
    Ok(std::fs::read(archive)?)
}

fn spec(exec_dir: &Path, mode: RunMode) -> TaskSpec {
    TaskSpec {
        run_id: RUN_ID.to_owned(),
        server_url: "http://csdms.test".to_owned(),
        exec_dir: exec_dir.to_path_buf(),
        env: None,
        mode,
        echo: false,
    }
}

fn slave(client: &RecordingClient) -> Slave {
    Slave::new(Arc::new(client.clone()))
}

/// The run must end with exactly one terminal report, and it must be the last report.
fn assert_single_terminal(client: &RecordingClient, expected: Status) {
    let statuses = client.statuses();
    let terminal: Vec<&Status> = statuses.iter().filter(|s| s.is_terminal()).collect();
    assert_eq!(terminal, [&expected], "{statuses:?}");
    assert_eq!(statuses.last(), Some(&expected), "{statuses:?}");
}

fn last_message(client: &RecordingClient) -> String {
    client.reports().last().map(|r| r.1.clone()).unwrap_or_default()
}

/// Unpack the single uploaded archive into a fresh dir.
fn unpack_upload(client: &RecordingClient) -> Result<(TempDir, PathBuf)> {
    let uploaded = client.uploaded();
    assert_eq!(uploaded.len(), 1);
    let dir = tempdir()?;
    let archive = dir.path().join("upload.tar.gz");
    File::create(&archive)?.write_all(&uploaded[0])?;
    let dest = dir.path().join("out");
    std::fs::create_dir(&dest)?;
    simexec::transfer::unpack(&archive, &dest)?;
    let run_dir = dest.join(RUN_ID);
    Ok((dir, run_dir))
}

#[test]
fn test_separate_run_success() -> Result<()> {
    let exec = tempdir()?;
    let client = RecordingClient::new()
        .with_bundle(bundle(&[
            ("hydro/run.sh", "echo hydro ran > result.txt\n"),
            ("river/run.sh", "echo river ran\n"),
            ("notes/readme.txt", "not a component"),
        ])?)
        .with_upload_body(r#"{"url": "http://csdms.test/pickup/deadbeef"}"#);

    let result = slave(&client).start_task(spec(exec.path(), RunMode::Separate))?;

    assert_eq!(result["url"], "http://csdms.test/pickup/deadbeef");
    assert_single_terminal(&client, Status::Success);
    assert_eq!(last_message(&client), "simulation is complete and available for pickup");
    assert_eq!(
        client.statuses(),
        [
            Status::Downloading,
            Status::Downloaded,
            Status::Unpacking,
            Status::Unpacked,
            Status::Running,
            Status::Running,
            Status::Packing,
            Status::Packed,
            Status::Uploading,
            Status::Uploaded,
            Status::Success,
        ]
    );
    let running: Vec<String> = client
        .reports()
        .into_iter()
        .filter(|(s, _)| *s == Status::Running)
        .map(|(_, m)| m)
        .collect();
    assert_eq!(running, ["running component: hydro", "running component: river"]);

    // results went up, local copy is gone
    let (_dir, uploaded) = unpack_upload(&client)?;
    assert_eq!(std::fs::read_to_string(uploaded.join("hydro/result.txt"))?, "hydro ran\n");
    assert_eq!(std::fs::read_to_string(uploaded.join("river/_river.out"))?, "river ran\n");
    assert!(!exec.path().join(RUN_ID).exists());
    assert!(!exec.path().join("deadbeef.tar.gz").exists());
    Ok(())
}

#[test]
fn test_component_failure_is_fail_fast() -> Result<()> {
    let exec = tempdir()?;
    let client = RecordingClient::new().with_bundle(bundle(&[
        ("a_first/run.sh", "echo 'segfault in solver' >&2\nexit 1\n"),
        ("b_second/run.sh", "touch ran.txt\n"),
    ])?);

    let err = slave(&client)
        .start_task(spec(exec.path(), RunMode::Separate))
        .unwrap_err();

    let component_err = err.downcast_ref::<ComponentRunError>().expect("component error");
    assert_eq!(component_err.name, "a_first");
    assert!(!exec.path().join(RUN_ID).join("b_second/ran.txt").exists());

    assert_single_terminal(&client, Status::Error);
    let message = last_message(&client);
    assert!(message.contains("component a_first failed"), "{message}");
    assert!(message.contains("segfault in solver"), "{message}");
    assert!(client.uploaded().is_empty());
    Ok(())
}

#[test]
fn test_download_failure() -> Result<()> {
    let exec = tempdir()?;
    let client = RecordingClient::new().fail_download(404);

    let err = slave(&client)
        .start_task(spec(exec.path(), RunMode::Separate))
        .unwrap_err();

    assert_eq!(err.downcast_ref::<control::Error>().and_then(|e| e.code()), Some(404));
    assert_eq!(client.statuses(), [Status::Downloading, Status::Error]);
    assert!(last_message(&client).contains("unable to download (error 404)"));
    Ok(())
}

#[test]
fn test_upload_failure_leaves_run_in_place() -> Result<()> {
    let exec = tempdir()?;
    let client = RecordingClient::new()
        .with_bundle(bundle(&[("hydro/run.sh", "echo ok\n")])?)
        .fail_upload(500);

    assert!(slave(&client)
        .start_task(spec(exec.path(), RunMode::Separate))
        .is_err());

    assert_single_terminal(&client, Status::Error);
    assert!(last_message(&client).contains("unable to upload (error 500)"));
    assert!(exec.path().join(RUN_ID).join("hydro/_hydro.out").is_file());
    assert!(exec.path().join("deadbeef.tar.gz").is_file());
    Ok(())
}

#[test]
fn test_lifecycle_phases() -> Result<()> {
    let exec = tempdir()?;
    let client = RecordingClient::new()
        .with_bundle(bundle(&[("hydro/run.sh", "true\n")])?)
        .fail_upload(503);
    let shared: Arc<dyn ControlPlane> = Arc::new(client.clone());

    let mut task = TaskLifecycle::new(spec(exec.path(), RunMode::Separate), shared)?;
    assert_eq!(task.phase(), Phase::Created);
    assert!(task.sim_dir().is_dir());

    task.setup()?;
    assert!(task.sim_dir().join("hydro/run.sh").is_file());
    task.run()?;
    assert_eq!(task.phase(), Phase::Running);

    let outcome = task.teardown();
    assert!(matches!(outcome, Outcome::Undelivered(_)));
    assert_eq!(task.phase(), Phase::Error);
    // the lifecycle itself never sends the terminal report
    assert!(client.statuses().iter().all(|s| !s.is_terminal()));
    Ok(())
}

#[test]
fn test_run_dir_may_already_exist() -> Result<()> {
    let exec = tempdir()?;
    std::fs::create_dir_all(exec.path().join(RUN_ID))?;
    let client = RecordingClient::new().with_bundle(bundle(&[("hydro/run.sh", "true\n")])?);

    slave(&client).start_task(spec(exec.path(), RunMode::Separate))?;
    assert_single_terminal(&client, Status::Success);
    Ok(())
}

#[test]
fn test_empty_run_id_reported() -> Result<()> {
    let exec = tempdir()?;
    let client = RecordingClient::new();
    let mut spec = spec(exec.path(), RunMode::Separate);
    spec.run_id = String::new();

    assert!(slave(&client).start_task(spec).is_err());
    assert_single_terminal(&client, Status::Error);
    assert!(!client.calls().iter().any(|c| matches!(c, Call::Download { .. })));
    Ok(())
}

#[test]
fn test_run_id_escaping_exec_dir_rejected() -> Result<()> {
    let root = tempdir()?;
    let exec_dir = root.path().join("exec");
    let victim = root.path().join("victim");
    std::fs::create_dir(&victim)?;
    std::fs::write(victim.join("keep.txt"), "keep")?;

    let escaping = || TaskSpec {
        run_id: "../victim".to_owned(),
        ..spec(&exec_dir, RunMode::Separate)
    };
    let client = RecordingClient::new();
    assert!(TaskLifecycle::new(escaping(), Arc::new(client.clone())).is_err());

    assert!(slave(&client).start_task(escaping()).is_err());
    assert_single_terminal(&client, Status::Error);
    assert!(victim.join("keep.txt").exists());
    Ok(())
}

/// Writes a couple of output lines and a status record, like a driver would.
struct ScriptedModel {
    fail: bool,
}

impl ModelRunner for ScriptedModel {
    fn go(&self, ctx: &ModelContext<'_>, mut output: File) -> Result<()> {
        assert_eq!(ctx.model.driver, "hydro");
        assert_eq!(ctx.manifest.component_names(), ["hydro", "river"]);
        writeln!(output, "coupling hydro and river")?;
        std::fs::write(ctx.run_dir.join("_time.txt"), "time: 10.0\n")?;
        std::thread::sleep(Duration::from_millis(50));
        writeln!(output, "t = 10.0")?;
        if self.fail {
            anyhow::bail!("solver diverged");
        }
        std::fs::write(ctx.run_dir.join("hydro/output.nc"), "data")?;
        Ok(())
    }
}

fn coupled_bundle() -> Result<Vec<u8>> {
    bundle(&[
        (MODEL_FILE, "driver: hydro\n"),
        (MANIFEST_FILE, "hydro: {}\nriver: {}\n"),
        ("hydro/placeholder", ""),
    ])
}

fn coupled(fail: bool) -> RunMode {
    let run = CoupledRun::new(Box::new(ScriptedModel { fail }))
        .with_poll_interval(Duration::from_millis(10));
    RunMode::Coupled(run)
}

#[test]
fn test_coupled_run_success() -> Result<()> {
    let exec = tempdir()?;
    let client = RecordingClient::new().with_bundle(coupled_bundle()?);

    slave(&client).start_task(spec(exec.path(), coupled(false)))?;

    assert_single_terminal(&client, Status::Success);
    let messages: Vec<String> = client.reports().into_iter().map(|(_, m)| m).collect();
    assert!(messages.iter().any(|m| m == "running model"));
    assert!(messages.iter().any(|m| m == "finished"));
    assert!(messages.iter().any(|m| m.contains("coupling hydro and river")));

    let (_dir, uploaded) = unpack_upload(&client)?;
    assert!(uploaded.join("hydro/output.nc").is_file());
    let info: serde_yaml::Value = serde_yaml::from_str(&std::fs::read_to_string(uploaded.join("info.yaml"))?)?;
    assert_eq!(info["driver"].as_str(), Some("hydro"));
    assert_eq!(info["server"].as_str(), Some("http://csdms.test"));
    assert_eq!(info["id"].as_str(), Some(RUN_ID));
    Ok(())
}

#[test]
fn test_coupled_run_failure_reports_output() -> Result<()> {
    let exec = tempdir()?;
    let client = RecordingClient::new().with_bundle(coupled_bundle()?);

    let err = slave(&client)
        .start_task(spec(exec.path(), coupled(true)))
        .unwrap_err();
    assert!(format!("{err:?}").contains("solver diverged"));

    assert_single_terminal(&client, Status::Error);
    let message = last_message(&client);
    assert!(message.contains("[2] t = 10.0"), "{message}");
    assert!(client.uploaded().is_empty());
    Ok(())
}

struct PanickingModel;

impl ModelRunner for PanickingModel {
    fn go(&self, _ctx: &ModelContext<'_>, _output: File) -> Result<()> {
        panic!("driver crashed");
    }
}

#[test]
fn test_panic_still_reports_error() -> Result<()> {
    let exec = tempdir()?;
    let client = RecordingClient::new().with_bundle(coupled_bundle()?);
    let mode = RunMode::Coupled(
        CoupledRun::new(Box::new(PanickingModel)).with_poll_interval(Duration::from_millis(10)),
    );

    let err = slave(&client).start_task(spec(exec.path(), mode)).unwrap_err();
    assert!(err.to_string().contains("driver crashed"));

    let count = client.reports().len();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(client.reports().len(), count, "reporter kept running after the run ended");
    assert_single_terminal(&client, Status::Error);
    Ok(())
}

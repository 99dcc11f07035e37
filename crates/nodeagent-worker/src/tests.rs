use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use nodeagent_channel::{
    AppHost, ChannelPaths, GuardedAppHost, HostContext, ServerInfo, ServiceHostClient,
};
use nodeagent_core::{InstallationRecord, ServiceOptions, WorkerProcessRecord, WorkerSpec};

use super::*;
use crate::pid_file::PidFileGuard;
use crate::process_host::ProcessAppHost;
use crate::supervisor::{create_host, load_host_context, serve_until_shutdown, Shutdown};

fn installation(root: &std::path::Path) -> InstallationRecord {
    let record = InstallationRecord::new(root, "Acme", "1.0.0", Some("blue"));
    fs::create_dir_all(record.directory.join("app")).expect("create app dir");
    record
}

fn write_manifest(record: &InstallationRecord, worker: &str) {
    let manifest = format!("id = \"Acme\"\nversion = \"1.0.0\"\n{worker}");
    fs::write(record.directory.join("app").join("package.toml"), manifest).expect("write manifest");
}

#[test]
fn worker_arguments_from_the_agent_parse_back() {
    let record = InstallationRecord::new(std::path::Path::new("/srv/install"), "Acme", "1.0.0", Some("blue"));
    let options = ServiceOptions::from_installation(&record)
        .with_timeout(Some(Duration::from_secs(15)))
        .with_config_path(Some("/srv/install/Acme.1.0.0@blue/app.toml".into()));

    let mut argv = vec!["nodeagent-worker".to_string()];
    argv.extend(options.worker_args("run"));
    argv.extend(["--channel-directory".to_string(), "/srv/channels".to_string()]);

    let cli = Cli::try_parse_from(argv).expect("worker arguments parse");
    let Mode::Run(args) = cli.mode else {
        panic!("expected run mode");
    };
    assert_eq!(args.service_options(), options);
    assert_eq!(args.channel_directory(), PathBuf::from("/srv/channels"));
}

#[test]
fn channel_directory_defaults_next_to_install_root() {
    assert_eq!(
        default_channel_directory(std::path::Path::new("/opt/agent/install/Acme.1.0.0")),
        PathBuf::from("/opt/agent/channels")
    );
}

#[test]
fn host_context_comes_from_installed_manifest() {
    let temp = tempfile::tempdir().expect("tempdir");
    let record = installation(temp.path());
    write_manifest(&record, "[worker]\ncommand = \"app/acme\"\nargs = [\"--port\", \"80\"]\n");

    let context = load_host_context(&ServiceOptions::from_installation(&record)).expect("context");
    assert_eq!(context.worker.host, "process");
    assert_eq!(context.worker.args, vec!["--port", "80"]);
    assert_eq!(context.app_directory, record.directory.join("app"));
}

#[test]
fn manifest_without_worker_section_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let record = installation(temp.path());
    write_manifest(&record, "");

    let err = load_host_context(&ServiceOptions::from_installation(&record))
        .expect_err("worker section is required");
    assert!(err.to_string().contains("[worker]"));
}

#[test]
fn unknown_host_name_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let record = installation(temp.path());
    write_manifest(&record, "[worker]\nhost = \"dotnet\"\ncommand = \"acme\"\n");

    let err = create_host(&host_registry(), &ServiceOptions::from_installation(&record))
        .err()
        .expect("unknown host");
    assert!(err.to_string().contains("unknown application host 'dotnet'"));
}

#[test]
fn pid_file_lives_as_long_as_the_guard() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("worker.pid");
    {
        let _guard = PidFileGuard::create(&path, "Acme").expect("pid file");
        let record: WorkerProcessRecord =
            serde_json::from_str(&fs::read_to_string(&path).expect("read pid file")).expect("parse");
        assert_eq!(record.pid, std::process::id());
        assert_eq!(record.product_name.as_deref(), Some("Acme"));
        assert_eq!(record.file_version, env!("CARGO_PKG_VERSION"));
    }
    assert!(!path.exists());
}

#[derive(Default)]
struct Counters {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

struct CountingHost {
    counters: Arc<Counters>,
}

impl AppHost for CountingHost {
    fn start(&self, _timeout: Option<Duration>) -> anyhow::Result<()> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self, _timeout: Option<Duration>) -> anyhow::Result<()> {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn stop_over_the_channel_ends_the_worker() {
    let temp = tempfile::tempdir().expect("tempdir");
    let record = installation(temp.path());
    let channels = temp.path().join("channels");
    let options = ServiceOptions::from_installation(&record);

    let counters = Arc::new(Counters::default());
    let host = Arc::new(GuardedAppHost::new(Box::new(CountingHost {
        counters: Arc::clone(&counters),
    })));

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    let worker = {
        let options = options.clone();
        let channels = channels.clone();
        thread::spawn(move || serve_until_shutdown(host, &options, &channels, shutdown_tx, shutdown_rx))
    };

    let client = ServiceHostClient::new(&channels, &options, Duration::from_secs(5));
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        assert!(Instant::now() < deadline, "worker never started its application");
        if client.is_reachable() && client.get_status().expect("status")["Started"] == true {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert!(record.pid_file().exists());

    client.stop(None).expect("stop");
    worker
        .join()
        .expect("worker thread")
        .expect("worker exits cleanly");

    assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
    assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    assert!(!client.is_reachable());
    assert!(!record.pid_file().exists());
}

#[test]
fn second_worker_leaves_a_served_channel_and_its_pid_file_alone() {
    let temp = tempfile::tempdir().expect("tempdir");
    let record = installation(temp.path());
    let channels = temp.path().join("channels");
    let options = ServiceOptions::from_installation(&record);

    let paths = ChannelPaths::new(&channels, &options.app_name());
    paths.ensure_dirs().expect("channel dirs");
    let foreign = ServerInfo {
        pid: 1,
        ..ServerInfo::current()
    };
    fs::write(
        paths.server_file(),
        serde_json::to_string(&foreign).expect("server info json"),
    )
    .expect("write server file");
    let first_worker = r#"{"pid":1,"started_at_unix":1,"module_name":"nodeagent-worker","file_version":"0.4.0"}"#;
    fs::write(record.pid_file(), first_worker).expect("write pid file");

    let counters = Arc::new(Counters::default());
    let host = Arc::new(GuardedAppHost::new(Box::new(CountingHost {
        counters: Arc::clone(&counters),
    })));
    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    let err = serve_until_shutdown(host, &options, &channels, shutdown_tx, shutdown_rx)
        .expect_err("channel is taken");

    assert!(format!("{err:#}").contains("already served by pid 1"), "{err:#}");
    assert_eq!(counters.starts.load(Ordering::SeqCst), 0);
    assert_eq!(
        fs::read_to_string(record.pid_file()).expect("pid file survives"),
        first_worker
    );
}

#[test]
fn signal_shutdown_stops_the_application() {
    let temp = tempfile::tempdir().expect("tempdir");
    let record = installation(temp.path());
    let options = ServiceOptions::from_installation(&record);
    let counters = Arc::new(Counters::default());
    let host = Arc::new(GuardedAppHost::new(Box::new(CountingHost {
        counters: Arc::clone(&counters),
    })));

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    shutdown_tx.send(Shutdown::Signal).expect("queue signal");
    serve_until_shutdown(host, &options, &temp.path().join("channels"), shutdown_tx, shutdown_rx)
        .expect("worker exits cleanly");

    assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
    assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
}

fn shell_host(directory: &std::path::Path, args: &[&str], init_args: &[&str]) -> ProcessAppHost {
    let record = InstallationRecord::new(directory, "Acme", "1.0.0", None);
    fs::create_dir_all(&record.directory).expect("create installation");
    ProcessAppHost::from_context(&HostContext {
        options: ServiceOptions::from_installation(&record),
        worker: WorkerSpec {
            host: "process".to_string(),
            command: Some("sh".to_string()),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            init_args: init_args.iter().map(|arg| arg.to_string()).collect(),
        },
        app_directory: record.directory.join("app"),
    })
    .expect("process host")
}

#[cfg(unix)]
#[test]
fn process_host_starts_and_terminates_child() {
    let temp = tempfile::tempdir().expect("tempdir");
    let host = shell_host(temp.path(), &["-c", "sleep 30"], &[]);

    host.start(None).expect("start");
    let status = host.status().expect("status");
    assert_eq!(status["Running"], true);

    let started = Instant::now();
    host.stop(Some(Duration::from_secs(5))).expect("stop");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(host.status().expect("status")["Running"], false);
}

#[cfg(unix)]
#[test]
fn process_host_init_reports_failure() {
    let temp = tempfile::tempdir().expect("tempdir");

    let nothing_to_do = shell_host(temp.path(), &[], &[]);
    nothing_to_do.init(None).expect("no init arguments");

    let failing = shell_host(temp.path(), &[], &["-c", "exit 3"]);
    let err = failing.init(Some(Duration::from_secs(5))).expect_err("init fails");
    assert!(err.to_string().contains("initialization failed"));
}

#[test]
fn process_host_requires_a_command() {
    let temp = tempfile::tempdir().expect("tempdir");
    let record = InstallationRecord::new(temp.path(), "Acme", "1.0.0", None);
    let err = ProcessAppHost::from_context(&HostContext {
        options: ServiceOptions::from_installation(&record),
        worker: WorkerSpec {
            host: "process".to_string(),
            command: None,
            args: Vec::new(),
            init_args: Vec::new(),
        },
        app_directory: record.directory.join("app"),
    })
    .expect_err("command is required");
    assert!(err.to_string().contains("declares no worker command"));
}

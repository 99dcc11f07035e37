use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nodeagent_core::{AgentError, InstallationRecord, ServiceOptions, WorkerSpec};
use serde_json::{json, Value};

use super::*;

#[derive(Default)]
struct Counters {
    starts: AtomicUsize,
    stops: AtomicUsize,
    shutdowns: AtomicUsize,
}

struct CountingHost {
    counters: Arc<Counters>,
    start_delay: Duration,
    stop_delay: Duration,
    fail_stop: bool,
}

impl CountingHost {
    fn new(counters: &Arc<Counters>) -> Self {
        Self {
            counters: Arc::clone(counters),
            start_delay: Duration::ZERO,
            stop_delay: Duration::ZERO,
            fail_stop: false,
        }
    }
}

impl AppHost for CountingHost {
    fn start(&self, _timeout: Option<Duration>) -> anyhow::Result<()> {
        thread::sleep(self.start_delay);
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self, _timeout: Option<Duration>) -> anyhow::Result<()> {
        thread::sleep(self.stop_delay);
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            anyhow::bail!("application refused to stop");
        }
        Ok(())
    }

    fn status(&self) -> anyhow::Result<Value> {
        Ok(json!({ "Requests": 7 }))
    }
}

fn serve(dir: &std::path::Path, name: &str, host: CountingHost, counters: &Arc<Counters>) -> ServiceHostServer {
    let shutdown_counters = Arc::clone(counters);
    let mut server = ServiceHostServer::new(
        dir,
        name,
        Arc::new(GuardedAppHost::new(Box::new(host))),
        move || {
            shutdown_counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        },
    )
    .with_stop_grace(Duration::from_secs(2));
    server.start().expect("server starts");
    server
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

const LONG: Option<Duration> = Some(Duration::from_secs(10));

#[test]
fn client_without_server_is_unreachable() {
    let temp = tempfile::tempdir().expect("tempdir");
    let client = FileChannelClient::new(temp.path(), "Acme.1.0.0");

    assert!(!client.is_reachable());
    let err = client
        .invoke(GET_STATUS, Value::Null, LONG)
        .expect_err("nobody listens");
    assert!(err.is_channel_unreachable());
}

#[test]
fn stale_heartbeat_counts_as_unreachable() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = ChannelPaths::new(temp.path(), "Acme.1.0.0");
    fs::create_dir_all(paths.root()).expect("mkdir");
    let stale = ServerInfo {
        pid: 1,
        heartbeat_unix_ms: 1_000,
    };
    fs::write(paths.server_file(), serde_json::to_vec(&stale).expect("json")).expect("write");

    let client = FileChannelClient::new(temp.path(), "Acme.1.0.0");
    let err = client.check_server().expect_err("stale server");
    assert!(matches!(err, AgentError::ChannelUnreachable { ref reason, .. } if reason.contains("stale")));
}

#[test]
fn requests_round_trip_and_report_remote_errors() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut server = FileChannelServer::new(temp.path(), "Echo.1.0.0");
    server.subscribe("Echo", Subscription::new(Ok));
    server.subscribe(
        "Fail",
        Subscription::new(|_| Err(anyhow::anyhow!("bad input"))),
    );
    server.start().expect("server starts");

    let client = FileChannelClient::new(temp.path(), "Echo.1.0.0");
    let result = client
        .invoke("Echo", json!({ "Value": 42 }), LONG)
        .expect("echo answers");
    assert_eq!(result, json!({ "Value": 42 }));

    let err = client.invoke("Fail", Value::Null, LONG).expect_err("handler fails");
    assert!(
        matches!(err, AgentError::RemoteOperationFailed { ref message, .. } if message.contains("bad input"))
    );

    let err = client.invoke("Missing", Value::Null, LONG).expect_err("unknown op");
    assert!(
        matches!(err, AgentError::RemoteOperationFailed { ref message, .. } if message.contains("unknown operation"))
    );

    server.stop();
    assert!(!server.paths().server_file().exists());
    assert!(!client.is_reachable());
}

#[test]
fn guarded_host_runs_start_and_stop_once() {
    let counters = Arc::new(Counters::default());
    let host = GuardedAppHost::new(Box::new(CountingHost::new(&counters)));

    host.stop(None).expect("stop before start is a no-op");
    host.start(None).expect("start");
    host.start(None).expect("start again");
    assert!(host.is_started());
    host.stop(None).expect("stop");
    host.stop(None).expect("stop again");

    assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
    assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    assert!(!host.is_started());
}

#[test]
fn service_host_start_is_idempotent_and_stop_always_signals_shutdown() {
    let temp = tempfile::tempdir().expect("tempdir");
    let counters = Arc::new(Counters::default());
    let _server = serve(temp.path(), "Acme.1.0.0", CountingHost::new(&counters), &counters);

    let client = FileChannelClient::new(temp.path(), "Acme.1.0.0");
    client
        .invoke(START, json!({ "Timeout": 5 }), LONG)
        .expect("start");
    client
        .invoke(START, json!({ "Timeout": null }), LONG)
        .expect("start again");
    assert_eq!(counters.starts.load(Ordering::SeqCst), 1);

    let status = client.invoke(GET_STATUS, Value::Null, LONG).expect("status");
    assert_eq!(status["Started"], true);
    assert_eq!(status["Status"]["Requests"], 7);

    client.invoke(STOP, json!({ "Timeout": 5 }), LONG).expect("stop");
    assert!(wait_until(|| counters.shutdowns.load(Ordering::SeqCst) == 1));

    client
        .invoke(STOP, json!({ "Timeout": 5 }), LONG)
        .expect("stopping a stopped app succeeds");
    assert!(wait_until(|| counters.shutdowns.load(Ordering::SeqCst) == 2));
    assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_stop_still_signals_shutdown() {
    let temp = tempfile::tempdir().expect("tempdir");
    let counters = Arc::new(Counters::default());
    let mut host = CountingHost::new(&counters);
    host.fail_stop = true;
    let _server = serve(temp.path(), "Acme.1.0.0", host, &counters);

    let client = FileChannelClient::new(temp.path(), "Acme.1.0.0");
    client.invoke(START, Value::Null, LONG).expect("start");
    let err = client.invoke(STOP, Value::Null, LONG).expect_err("stop fails");
    assert!(matches!(err, AgentError::RemoteOperationFailed { .. }));
    assert!(wait_until(|| counters.shutdowns.load(Ordering::SeqCst) == 1));
}

#[test]
fn slow_stop_times_out_on_the_client() {
    let temp = tempfile::tempdir().expect("tempdir");
    let counters = Arc::new(Counters::default());
    let mut host = CountingHost::new(&counters);
    host.stop_delay = Duration::from_millis(1_500);
    let _server = serve(temp.path(), "Slow.1.0.0", host, &counters);

    let client = FileChannelClient::new(temp.path(), "Slow.1.0.0");
    client.invoke(START, Value::Null, LONG).expect("start");

    let started = Instant::now();
    let err = client
        .invoke(STOP, Value::Null, Some(Duration::from_millis(300)))
        .expect_err("stop outlives the timeout");
    assert!(err.is_channel_timeout());
    assert!(started.elapsed() < Duration::from_millis(1_500));
}

#[test]
fn status_is_answered_while_start_is_running() {
    let temp = tempfile::tempdir().expect("tempdir");
    let counters = Arc::new(Counters::default());
    let mut host = CountingHost::new(&counters);
    host.start_delay = Duration::from_millis(1_000);
    let _server = serve(temp.path(), "Busy.1.0.0", host, &counters);

    let starter = {
        let dir = temp.path().to_path_buf();
        thread::spawn(move || {
            FileChannelClient::new(&dir, "Busy.1.0.0").invoke(START, Value::Null, LONG)
        })
    };
    thread::sleep(Duration::from_millis(200));

    let client = FileChannelClient::new(temp.path(), "Busy.1.0.0");
    let status = client
        .invoke(GET_STATUS, Value::Null, Some(Duration::from_millis(700)))
        .expect("status does not wait for start");
    assert_eq!(status["Started"], false);

    starter
        .join()
        .expect("starter thread")
        .expect("start completes");
    assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
}

#[test]
fn host_client_timeout_never_drops_below_the_default() {
    let temp = tempfile::tempdir().expect("tempdir");
    let record = InstallationRecord::new(temp.path(), "Acme", "1.0.0", Some("blue"));
    let options = ServiceOptions::from_installation(&record);

    let floored = ServiceHostClient::new(temp.path(), &options, Duration::from_secs(1));
    assert_eq!(floored.default_timeout(), MIN_CHANNEL_TIMEOUT);
    assert_eq!(floored.app_name(), "Acme.1.0.0@blue");

    let client = ServiceHostClient::new(temp.path(), &options, Duration::from_secs(10));
    let ten = Duration::from_secs(10);
    assert_eq!(client.effective_timeout(None), ten);
    assert_eq!(client.effective_timeout(Some(Duration::from_secs(3))), ten);
    assert_eq!(
        client.effective_timeout(Some(Duration::from_secs(60))),
        Duration::from_secs(60)
    );
    assert_eq!(client.effective_timeout(None), ten, "override applies to one call only");

    let err = client.stop(None).expect_err("no worker runs");
    assert!(err.is_channel_unreachable());
}

#[test]
fn host_registry_resolves_factories_by_name() {
    let counters = Arc::new(Counters::default());
    let mut registry = HostRegistry::new();
    let factory_counters = Arc::clone(&counters);
    registry.register("Counting", move |_| {
        Ok(Box::new(CountingHost::new(&factory_counters)) as Box<dyn AppHost>)
    });

    let temp = tempfile::tempdir().expect("tempdir");
    let record = InstallationRecord::new(temp.path(), "Acme", "1.0.0", None);
    let context = HostContext {
        options: ServiceOptions::from_installation(&record),
        worker: WorkerSpec {
            host: "counting".to_string(),
            command: None,
            args: Vec::new(),
            init_args: Vec::new(),
        },
        app_directory: record.directory.join("app"),
    };

    let host = registry.create("COUNTING", &context).expect("known host");
    host.start(None).expect("start");
    assert_eq!(counters.starts.load(Ordering::SeqCst), 1);

    let err = match registry.create("docker", &context) {
        Ok(_) => panic!("unknown host must fail"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("known: counting"));
}

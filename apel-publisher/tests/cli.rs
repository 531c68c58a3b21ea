use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use std::fs::write;
use tempfile::NamedTempFile;

/// Writes a complete config whose certificate paths do not exist, so nothing can reach the network.
fn create_offline_config() -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    write(
        config.path(),
        r#"
auditor:
  host: 127.0.0.1
  port: 1
intervals:
  run_interval: 1
  report_interval: 1
paths:
  time_db_path: ./does-not-matter.db
site:
  publish_since: "2023-02-01 00:00:00+00:00"
  sites_to_report: all
  submit_host: ce.example.org
  infrastructure_type: grid
uservo:
  vo_mapping:
    - pattern: "^atl"
      vo: atlas
      vogroup: /atlas
      vorole: Role=NULL
components:
  cores_name: Cores
  cpu_time_name: TotalCPU
  nnodes_name: NNodes
  benchmark_name: HEPSPEC
metadata:
  site_key: site_id
  user_key: user_id
authentication:
  auth_url: https://auth.invalid/token
  ams_url: https://msg.invalid/publish?key=
  client_cert: /nonexistent/hostcert.pem
  client_key: /nonexistent/hostkey.pem
"#,
    )
    .expect("Writing temp config failed");
    config
}

#[test]
fn republish_requires_year_month_and_site() {
    let config = create_offline_config();
    let mut cmd = Command::cargo_bin("apel-publisher").expect("Binary exists");

    cmd.arg("republish").arg("--config").arg(config.path()).arg("--month").arg("3");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--year").and(predicate::str::contains("--site")));
}

#[test]
fn republish_rejects_month_out_of_range() {
    let config = create_offline_config();
    let mut cmd = Command::cargo_bin("apel-publisher").expect("Binary exists");

    cmd.args(["republish", "--year", "2023", "--month", "13", "--site", "UNI-FREIBURG"])
        .arg("--config")
        .arg(config.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("13"));
}

#[test]
fn run_fails_for_missing_config_file() {
    let mut cmd = Command::cargo_bin("apel-publisher").expect("Binary exists");

    cmd.args(["run", "--config", "/definitely/not/here.yaml"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
#[serial]
fn run_fails_when_certificate_cannot_be_read() {
    let config = create_offline_config();
    let mut cmd = Command::cargo_bin("apel-publisher").expect("Binary exists");

    cmd.arg("run")
        .arg("--config")
        .arg(config.path())
        .env_remove("APEL_CLIENT_CERT")
        .env_remove("APEL_CLIENT_KEY");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("hostcert.pem"));
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{:?}", event));
    }
}

#[tokio::test]
#[serial]
async fn emits_trace_initialised_event() {
    std::env::remove_var("APEL_CLIENT_CERT");
    std::env::remove_var("APEL_CLIENT_KEY");

    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use apel_publisher::cli::{run, Commands};
    use apel_publisher::load_config::load_config;

    let config_file = create_offline_config();
    let config = load_config(config_file.path()).expect("Config should load");
    let command = Commands::Run {
        config: config_file.path().to_path_buf(),
    };

    let result = run(command, config).await;
    assert!(result.is_err(), "Missing certificate must stop the publisher");

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}

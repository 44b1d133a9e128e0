use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use std::fs::write;
use tempfile::{tempdir, NamedTempFile};

use dgu::cli::{lookup, Lookup};
use dgu_core::contract::{DirectoryError, MockDirectory};

fn config_file(yaml: &str) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    write(config.path(), yaml).expect("Writing temp config failed");
    config
}

#[test]
fn reports_rejects_unknown_letters() {
    let config = config_file("reports:\n  output_group: www-data\n");
    let out = tempdir().unwrap();

    Command::cargo_bin("dgu")
        .expect("Binary exists")
        .arg("reports")
        .arg("--config")
        .arg(config.path())
        .arg(out.path())
        .arg("AG")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown report letter"));
}

#[test]
fn reports_abort_before_database_when_group_is_missing() {
    let config = config_file(
        "reports:\n  database_url: \"sqlite::memory:\"\nsearch:\n  ckan_url: http://127.0.0.1:9\n",
    );
    let out = tempdir().unwrap();
    let output_dir = out.path().join("mi");

    Command::cargo_bin("dgu")
        .expect("Binary exists")
        .arg("reports")
        .arg("--config")
        .arg(config.path())
        .arg(&output_dir)
        .env("MI_REPORT_TEST", "no-such-group-for-dgu-cli")
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not find group no-such-group-for-dgu-cli"));

    assert!(!output_dir.exists(), "no output should be created");
}

#[test]
fn directory_lookup_without_domain_is_a_setup_error() {
    let config = config_file("");

    Command::cargo_bin("dgu")
        .expect("Binary exists")
        .arg("directory")
        .arg("--config")
        .arg(config.path())
        .arg("publishers")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Drupal XMLRPC not configured"));
}

#[test]
fn help_lists_both_commands() {
    Command::cargo_bin("dgu")
        .expect("Binary exists")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("reports").and(predicate::str::contains("directory")));
}

#[tokio::test]
async fn lookup_maps_absent_session_to_null() {
    let mut directory = MockDirectory::new();
    directory
        .expect_get_user_id_from_session_id()
        .withf(|session| session == "expired")
        .return_once(|_| Ok(None));

    let value = lookup(
        &directory,
        &Lookup::Session {
            session_id: "expired".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(value, serde_json::Value::Null);
}

#[tokio::test]
async fn lookup_passes_node_type_filter() {
    let mut directory = MockDirectory::new();
    directory
        .expect_get_nodes()
        .withf(|node_type| *node_type == Some("app"))
        .return_once(|_| Ok(vec![json!({"nid": "1", "type": "app"})]));

    let value = lookup(
        &directory,
        &Lookup::Nodes {
            node_type: Some("app".to_string()),
        },
    )
    .await
    .unwrap();
    assert_eq!(value, json!([{"nid": "1", "type": "app"}]));
}

#[tokio::test]
async fn lookup_propagates_not_found() {
    let mut directory = MockDirectory::new();
    directory
        .expect_get_department_from_organisation()
        .return_once(|_| Err(DirectoryError::NotFound("No parent department".into())));

    let err = lookup(
        &directory,
        &Lookup::Department {
            organisation_id: "12".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DirectoryError::NotFound(_)));
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
        use std::fmt::Write as FmtWrite;
        let mut msg = String::new();
        let _ = write!(&mut msg, "{:?}", event);
        self.events.lock().unwrap().push(msg);
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use dgu::cli::{run, Cli, Commands, ReportLetters};
    use dgu_core::reports::ReportKind;

    // A missing config file fails the run after the initial event.
    let cli = Cli {
        command: Commands::Reports {
            config: std::path::PathBuf::from("dummy.yaml"),
            date: None,
            output_dir: std::path::PathBuf::from("dummy-out"),
            letters: ReportLetters(vec![ReportKind::A]),
        },
    };

    let _ = run(cli).await;

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}

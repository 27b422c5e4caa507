use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use httpmock::Method::{GET, POST};
use httpmock::{Mock, MockServer};
use serde_json::json;
use tempfile::TempDir;
use tfops_access::{AccessGate, AllowList};
use tfops_commands::CommandParser;
use tfops_contract::{
    InboundEvent, MergeRequestAction, MergeRequestEvent, MergeRequestInfo, NoteEvent,
    ReviewThreadRef, ReviewThreads,
};
use tfops_events::{
    ConsumerConfig, EventConsumer, EventDisposition, EventPipeline, EventQueue,
    InMemoryEventQueue, SpoolEventQueue,
};
use tfops_tfc::TfcClient;
use tfops_trigger::{
    OrchestratorConfig, ProjectTriggerFactory, ProjectWorkspaces, WorkspaceDirectory,
    WorkspaceEntry,
};
use tfops_vcs::GitCliRepository;
use tokio::sync::watch;

const PROJECT: &str = "acme/infra";

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn write_file(dir: &Path, relative: &str, content: &str) {
    let path = dir.join(relative);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, content).expect("write");
}

fn commit_all(dir: &Path, message: &str) -> String {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "--quiet", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

/// Upstream repository with `main` and three branches, plus a clone of it
/// the bridge works from:
/// - `feature` touches `service-foo`
/// - `docs` touches only the README
/// - `wide` touches the shared vpc module and `service-foo`
struct Fixture {
    _temp: TempDir,
    clone: PathBuf,
    feature_head: String,
    docs_head: String,
    wide_head: String,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let upstream = temp.path().join("upstream");
        std::fs::create_dir_all(&upstream).expect("mkdir upstream");
        git(&upstream, &["init", "--quiet"]);
        git(&upstream, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&upstream, &["config", "user.email", "tfops@example.com"]);
        git(&upstream, &["config", "user.name", "tfops"]);
        git(&upstream, &["config", "commit.gpgsign", "false"]);
        write_file(&upstream, "terraform/network/main.tf", "# network\n");
        write_file(&upstream, "terraform/service-foo/main.tf", "# foo\n");
        write_file(&upstream, "modules/vpc/main.tf", "# vpc\n");
        commit_all(&upstream, "init");

        let clone = temp.path().join("clone");
        git(
            temp.path(),
            &["clone", "--quiet", upstream.to_str().expect("utf8 path"), "clone"],
        );

        git(&upstream, &["checkout", "--quiet", "-b", "feature"]);
        write_file(&upstream, "terraform/service-foo/outputs.tf", "# outputs\n");
        let feature_head = commit_all(&upstream, "service-foo outputs");

        git(&upstream, &["checkout", "--quiet", "-b", "docs", "main"]);
        write_file(&upstream, "README.md", "# infra\n");
        let docs_head = commit_all(&upstream, "readme");

        git(&upstream, &["checkout", "--quiet", "-b", "wide", "main"]);
        write_file(&upstream, "modules/vpc/main.tf", "# vpc v2\n");
        write_file(&upstream, "terraform/service-foo/variables.tf", "# vars\n");
        let wide_head = commit_all(&upstream, "vpc and service-foo");

        git(&upstream, &["checkout", "--quiet", "main"]);
        // Moves main after the branch point; must not leak into the diff.
        write_file(&upstream, "terraform/network/variables.tf", "# vars\n");
        commit_all(&upstream, "network vars");

        Self {
            _temp: temp,
            clone,
            feature_head,
            docs_head,
            wide_head,
        }
    }

    fn directory(&self) -> WorkspaceDirectory {
        WorkspaceDirectory::new(vec![
            WorkspaceEntry::new("network", "terraform/network")
                .with_trigger_dirs(vec!["modules/vpc".to_string()]),
            WorkspaceEntry::new("service-foo", "terraform/service-foo"),
        ])
        .expect("directory")
    }

    fn note(&self, body: &str) -> InboundEvent {
        self.note_on("feature", &self.feature_head, body)
    }

    fn note_on(&self, branch: &str, head: &str, body: &str) -> InboundEvent {
        InboundEvent::Note(NoteEvent {
            project: PROJECT.to_string(),
            merge_request_iid: 42,
            note: body.to_string(),
            author: Some("dev".to_string()),
            source_branch: Some(branch.to_string()),
            target_branch: Some("main".to_string()),
            last_commit: Some(head.to_string()),
        })
    }
}

#[derive(Default)]
struct RecordingThreads {
    comments: Mutex<Vec<(ReviewThreadRef, String)>>,
    failing_posts: Mutex<usize>,
    merge_request: Option<MergeRequestInfo>,
}

impl RecordingThreads {
    fn failing_posts(count: usize) -> Self {
        Self {
            failing_posts: Mutex::new(count),
            ..Self::default()
        }
    }

    fn comments(&self) -> Vec<(ReviewThreadRef, String)> {
        self.comments.lock().expect("comments lock").clone()
    }
}

#[async_trait]
impl ReviewThreads for RecordingThreads {
    async fn post_comment(&self, thread: &ReviewThreadRef, body: &str) -> Result<()> {
        {
            let mut failing = self.failing_posts.lock().expect("failing lock");
            if *failing > 0 {
                *failing -= 1;
                bail!("review host unavailable");
            }
        }
        self.comments
            .lock()
            .expect("comments lock")
            .push((thread.clone(), body.to_string()));
        Ok(())
    }

    async fn merge_request(&self, thread: &ReviewThreadRef) -> Result<MergeRequestInfo> {
        match &self.merge_request {
            Some(info) => Ok(info.clone()),
            None => bail!("merge request {thread} not found"),
        }
    }
}

fn pipeline(fixture: &Fixture, server: &MockServer, threads: Arc<RecordingThreads>) -> EventPipeline {
    let tfc = TfcClient::new(&format!("{}/api/v2", server.base_url()), "tfc-token", "acme", 2_000)
        .expect("tfc client")
        .with_retry(2, 1);
    let project = ProjectWorkspaces::new(
        Arc::new(GitCliRepository::new(&fixture.clone)),
        Arc::new(fixture.directory()),
    );
    let factory = ProjectTriggerFactory::new(Arc::new(tfc), OrchestratorConfig::default())
        .with_project(PROJECT, project);
    EventPipeline::new(
        AccessGate::new(AllowList::from_prefixes(["acme/"])),
        CommandParser::default(),
        threads,
        Arc::new(factory),
    )
}

async fn workspace_mock<'a>(server: &'a MockServer, name: &str, id: &str) -> Mock<'a> {
    let path = format!("/api/v2/organizations/acme/workspaces/{name}");
    let body = json!({ "data": { "id": id, "type": "workspaces" } });
    server
        .mock_async(|when, then| {
            when.method(GET).path(path);
            then.status(200).json_body(body);
        })
        .await
}

async fn missing_workspace_mock<'a>(server: &'a MockServer, name: &str) -> Mock<'a> {
    let path = format!("/api/v2/organizations/acme/workspaces/{name}");
    server
        .mock_async(|when, then| {
            when.method(GET).path(path);
            then.status(404).json_body(json!({ "errors": [{ "status": "404" }] }));
        })
        .await
}

fn consumer_config() -> ConsumerConfig {
    ConsumerConfig {
        workers: 2,
        poll_interval: Duration::from_millis(10),
        requeue_interval: Duration::from_millis(50),
        transient_error_backoff_initial: Duration::from_millis(1),
        transient_error_backoff_max: Duration::from_millis(5),
        redelivery_delay_initial: Duration::ZERO,
        redelivery_delay_max: Duration::ZERO,
        ..ConsumerConfig::default()
    }
}

#[tokio::test]
async fn integration_plan_comment_runs_only_workspaces_changed_on_branch() {
    let fixture = Fixture::new();
    let server = MockServer::start_async().await;
    let foo = workspace_mock(&server, "service-foo", "ws-foo").await;
    let network = workspace_mock(&server, "network", "ws-net").await;
    let run = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v2/runs").json_body_includes(json!({
                "data": {
                    "attributes": { "plan-only": true },
                    "relationships": {
                        "workspace": { "data": { "type": "workspaces", "id": "ws-foo" } }
                    }
                }
            }).to_string());
            then.status(201).json_body(json!({ "data": { "id": "run-foo" } }));
        })
        .await;

    let threads = Arc::new(RecordingThreads::default());
    let report = pipeline(&fixture, &server, threads.clone())
        .process(&fixture.note("tfc plan"))
        .await;

    assert!(report.should_acknowledge());
    assert_eq!(
        report.outcome.expect("disposition"),
        EventDisposition::Completed {
            executed: vec!["service-foo".to_string()],
            errored: Vec::new(),
            commented: false,
        }
    );
    foo.assert_calls_async(1).await;
    network.assert_calls_async(0).await;
    run.assert_calls_async(1).await;
    assert!(threads.comments().is_empty());
}

#[tokio::test]
async fn integration_apply_on_unknown_workspace_reports_error_comment() {
    let fixture = Fixture::new();
    let server = MockServer::start_async().await;
    let lookup = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v2/organizations/acme/workspaces/ghost");
            then.status(404).json_body(json!({ "errors": [{ "status": "404" }] }));
        })
        .await;
    let run = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v2/runs");
            then.status(201).json_body(json!({ "data": { "id": "run-x" } }));
        })
        .await;

    let threads = Arc::new(RecordingThreads::default());
    let report = pipeline(&fixture, &server, threads.clone())
        .process(&fixture.note("tfc apply -w ghost"))
        .await;

    assert!(report.should_acknowledge());
    lookup.assert_calls_async(1).await;
    run.assert_calls_async(0).await;
    let comments = threads.comments();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].0, ReviewThreadRef::new(PROJECT, 42));
    assert!(comments[0]
        .1
        .starts_with(":no_entry: ghost could not be run because: workspace 'ghost' is not available"));
    assert!(comments[0].1.ends_with('\n'));
}

#[tokio::test]
async fn integration_missing_source_revision_posts_event_failure() {
    let fixture = Fixture::new();
    let server = MockServer::start_async().await;
    let run = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v2/runs");
            then.status(201).json_body(json!({ "data": { "id": "run-x" } }));
        })
        .await;

    let threads = Arc::new(RecordingThreads::default());
    let InboundEvent::Note(mut note) = fixture.note("tfc plan") else {
        unreachable!("fixture builds notes");
    };
    note.last_commit = Some("0000000000000000000000000000000000000000".to_string());
    let report = pipeline(&fixture, &server, threads.clone())
        .process(&InboundEvent::Note(note))
        .await;

    assert!(matches!(
        report.outcome,
        Ok(EventDisposition::Failed { reported: true, .. })
    ));
    run.assert_calls_async(0).await;
    let comments = threads.comments();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].1.starts_with(":no_entry: tfc plan could not be run because: "));
}

#[tokio::test]
async fn integration_consumer_gates_ignores_and_plans_from_queue() {
    let fixture = Fixture::new();
    let server = MockServer::start_async().await;
    workspace_mock(&server, "service-foo", "ws-foo").await;
    let run = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v2/runs");
            then.status(201).json_body(json!({ "data": { "id": "run-foo" } }));
        })
        .await;

    let threads = Arc::new(RecordingThreads {
        merge_request: Some(MergeRequestInfo {
            iid: 7,
            source_branch: "feature".to_string(),
            target_branch: "main".to_string(),
            latest_commit: fixture.feature_head.clone(),
        }),
        ..RecordingThreads::default()
    });
    let queue = Arc::new(InMemoryEventQueue::default());
    queue
        .publish(InboundEvent::MergeRequest(MergeRequestEvent {
            project: PROJECT.to_string(),
            merge_request_iid: 7,
            action: MergeRequestAction::Open,
            source_branch: None,
            target_branch: None,
            last_commit: None,
        }))
        .await
        .expect("publish open");
    queue
        .publish(InboundEvent::MergeRequest(MergeRequestEvent {
            project: PROJECT.to_string(),
            merge_request_iid: 7,
            action: MergeRequestAction::Merge,
            source_branch: None,
            target_branch: None,
            last_commit: None,
        }))
        .await
        .expect("publish merge");
    let mut foreign = fixture.note("tfc plan");
    if let InboundEvent::Note(note) = &mut foreign {
        note.project = "other/infra".to_string();
    }
    queue.publish(foreign).await.expect("publish foreign");
    queue
        .publish(fixture.note("looks good to me"))
        .await
        .expect("publish chatter");

    let consumer = EventConsumer::new(
        queue.clone(),
        Arc::new(pipeline(&fixture, &server, threads.clone())),
        consumer_config(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    assert!(queue.wait_until_drained(Duration::from_secs(20)).await);
    shutdown_tx.send(true).expect("shutdown");
    handle.await.expect("join").expect("consumer");

    run.assert_calls_async(1).await;
    assert!(threads.comments().is_empty());
}

#[tokio::test]
async fn integration_spooled_event_is_redelivered_after_comment_failure() {
    let fixture = Fixture::new();
    let server = MockServer::start_async().await;
    let lookup = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v2/organizations/acme/workspaces/ghost");
            then.status(404).body("not found");
        })
        .await;

    let spool = tempfile::tempdir().expect("spool dir");
    let queue = Arc::new(SpoolEventQueue::open(spool.path()).await.expect("open spool"));
    let id = queue
        .publish(fixture.note("tfc plan -w ghost"))
        .await
        .expect("publish");

    let threads = Arc::new(RecordingThreads::failing_posts(1));
    let consumer = EventConsumer::new(
        queue.clone(),
        Arc::new(pipeline(&fixture, &server, threads.clone())),
        consumer_config(),
    );

    let first = consumer
        .process_once("worker-1")
        .await
        .expect("first pass")
        .expect("delivery");
    assert!(!first.should_acknowledge());
    assert_eq!(queue.pending_ids().await.expect("pending"), vec![id.clone()]);

    let second = consumer
        .process_once("worker-2")
        .await
        .expect("second pass")
        .expect("redelivery");
    assert!(second.should_acknowledge());
    assert!(queue.pending_ids().await.expect("pending").is_empty());
    assert!(queue.in_flight_ids().await.expect("in flight").is_empty());

    lookup.assert_calls_async(2).await;
    let comments = threads.comments();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].1.starts_with(":no_entry: ghost could not be run because: "));
}

#[tokio::test]
async fn integration_plan_on_branch_without_workspace_changes_is_quiet() {
    let fixture = Fixture::new();
    let server = MockServer::start_async().await;
    let network = workspace_mock(&server, "network", "ws-net").await;
    let foo = workspace_mock(&server, "service-foo", "ws-foo").await;
    let run = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v2/runs");
            then.status(201).json_body(json!({ "data": { "id": "run-x" } }));
        })
        .await;

    let threads = Arc::new(RecordingThreads::default());
    let queue = Arc::new(InMemoryEventQueue::default());
    queue
        .publish(fixture.note_on("docs", &fixture.docs_head, "tfc plan"))
        .await
        .expect("publish");
    let consumer = EventConsumer::new(
        queue.clone(),
        Arc::new(pipeline(&fixture, &server, threads.clone())),
        consumer_config(),
    );

    let report = consumer
        .process_once("worker-1")
        .await
        .expect("process")
        .expect("delivery");
    assert_eq!(
        report.outcome.expect("disposition"),
        EventDisposition::Completed {
            executed: Vec::new(),
            errored: Vec::new(),
            commented: false,
        }
    );
    assert!(queue.wait_until_drained(Duration::from_millis(10)).await);
    assert!(queue.dead_letter_ids().await.is_empty());
    network.assert_calls_async(0).await;
    foo.assert_calls_async(0).await;
    run.assert_calls_async(0).await;
    assert!(threads.comments().is_empty());
}

#[tokio::test]
async fn integration_every_failed_workspace_is_listed_in_one_comment() {
    let fixture = Fixture::new();
    let server = MockServer::start_async().await;
    let network = missing_workspace_mock(&server, "network").await;
    let foo = missing_workspace_mock(&server, "service-foo").await;
    let run = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v2/runs");
            then.status(201).json_body(json!({ "data": { "id": "run-x" } }));
        })
        .await;

    let threads = Arc::new(RecordingThreads::default());
    let report = pipeline(&fixture, &server, threads.clone())
        .process(&fixture.note_on("wide", &fixture.wide_head, "tfc plan"))
        .await;

    assert!(matches!(
        &report.outcome,
        Ok(EventDisposition::Completed { executed, errored, commented: true })
            if executed.is_empty() && errored.len() == 2
    ));
    network.assert_calls_async(1).await;
    foo.assert_calls_async(1).await;
    run.assert_calls_async(0).await;

    let comments = threads.comments();
    assert_eq!(comments.len(), 1);
    let lines: Vec<&str> = comments[0].1.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with(":no_entry: network could not be run because: "));
    assert!(lines[1].starts_with(":no_entry: service-foo could not be run because: "));
}

#[tokio::test]
async fn integration_spooled_event_is_dead_lettered_after_max_attempts() {
    let fixture = Fixture::new();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v2/organizations/acme/workspaces/ghost");
            then.status(404).body("not found");
        })
        .await;

    let spool = tempfile::tempdir().expect("spool dir");
    let queue = Arc::new(SpoolEventQueue::open(spool.path()).await.expect("open spool"));
    let id = queue
        .publish(fixture.note("tfc plan -w ghost"))
        .await
        .expect("publish");

    let threads = Arc::new(RecordingThreads::failing_posts(usize::MAX));
    let consumer = EventConsumer::new(
        queue.clone(),
        Arc::new(pipeline(&fixture, &server, threads.clone())),
        ConsumerConfig {
            max_attempts: 2,
            ..consumer_config()
        },
    );

    for worker in ["worker-1", "worker-2"] {
        let report = consumer
            .process_once(worker)
            .await
            .expect("process")
            .expect("delivery");
        assert!(!report.should_acknowledge());
    }
    assert!(consumer
        .process_once("worker-3")
        .await
        .expect("process")
        .is_none());
    assert!(queue.pending_ids().await.expect("pending").is_empty());
    assert!(queue.in_flight_ids().await.expect("in flight").is_empty());
    assert_eq!(queue.dead_letter_ids().await.expect("dead"), vec![id]);
    assert!(threads.comments().is_empty());
}

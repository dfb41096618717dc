//! End-to-end harvest tests
//!
//! These tests use wiremock to stand in for the provider API and run real
//! harvests against an on-disk database in a temporary directory.

use post_harvester::config::load_config;
use post_harvester::harvest::Harvester;
use post_harvester::output::{load_forest, load_statistics};
use post_harvester::storage::Storage;
use post_harvester::RunOutcome;
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Writes a config pointing at the mock server and returns its path
fn write_config(dir: &TempDir, server: &MockServer, targets: &str) -> std::path::PathBuf {
    let config_path = dir.path().join("harvester.toml");
    let db_path = dir.path().join("harvest.db");

    let content = format!(
        r#"
[provider]
auth-url = "{uri}/api/v1/access_token"
api-url = "{uri}"
user-agent = "post-harvester-tests/0.1"
request-timeout-secs = 5

[rate-limit]
min-remaining = 5
safety-margin-ms = 50
max-single-sleep-ms = 1000
call-pacing-ms = 0

[retry]
max-attempts = 2
initial-delay-ms = 5
max-delay-ms = 10

[storage]
database-path = "{db}"

[[credential]]
id = "main"
client-id = "client"
client-secret = "secret"
username = "bot"
password = "hunter2"
{targets}
"#,
        uri = server.uri(),
        db = db_path.display(),
        targets = targets
    );

    let mut file = std::fs::File::create(&config_path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    config_path
}

fn harvester(config_path: &Path) -> Harvester {
    let config = load_config(config_path).expect("Failed to load config");
    Harvester::from_config(config).expect("Failed to build harvester")
}

fn post(id: &str, score: i64) -> Value {
    json!({
        "kind": "t3",
        "data": {
            "id": id,
            "subreddit": "rust",
            "title": format!("Post {}", id),
            "author": "poster",
            "score": score,
            "upvote_ratio": 0.9,
            "num_comments": 2,
            "created_utc": 1700000000.0
        }
    })
}

fn comment(id: &str, parent: &str, body: &str, replies: Value) -> Value {
    json!({
        "kind": "t1",
        "data": {
            "id": id,
            "parent_id": parent,
            "body": body,
            "author": "commenter",
            "score": 1,
            "created_utc": 1700000100.0,
            "replies": replies
        }
    })
}

fn listing(children: Vec<Value>, after: Option<&str>) -> Value {
    json!({ "kind": "Listing", "data": { "after": after, "children": children } })
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-1",
            "expires_in": 86400
        })))
        .mount(server)
        .await;
}

async fn mount_posts(server: &MockServer, scores: (i64, i64)) {
    Mock::given(method("GET"))
        .and(path("/r/rust/top"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(listing(vec![post("p1", scores.0), post("p2", scores.1)], None))
                .insert_header("x-ratelimit-remaining", "590")
                .insert_header("x-ratelimit-used", "10")
                .insert_header("x-ratelimit-reset", "400"),
        )
        .mount(server)
        .await;
}

async fn mount_comments(server: &MockServer) {
    let thread = json!([
        listing(vec![post("p1", 0)], None),
        listing(
            vec![
                comment(
                    "c1",
                    "t3_p1",
                    "first",
                    listing(vec![comment("c2", "t1_c1", "reply", json!(""))], None),
                ),
                comment("c3", "t3_p1", "[removed]", json!("")),
            ],
            None
        )
    ]);
    Mock::given(method("GET"))
        .and(path("/comments/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(thread))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/comments/p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            listing(vec![post("p2", 0)], None),
            listing(vec![], None)
        ])))
        .mount(server)
        .await;
}

const RUST_TARGET: &str = r#"
[[target]]
name = "rust"
credential = "main"
listing = "top"
time-window = "week"
max-items-per-run = 10
max-children-per-item = 10
max-child-depth = 1
"#;

#[tokio::test]
async fn test_full_run_stores_items_and_children() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_posts(&server, (10, 20)).await;
    mount_comments(&server).await;

    let dir = TempDir::new().unwrap();
    let harvester = harvester(&write_config(&dir, &server, RUST_TARGET));

    let run = harvester
        .scheduler()
        .run_target("rust")
        .await
        .expect("run should start")
        .expect("nothing else running");

    assert_eq!(run.outcome, RunOutcome::Success);
    assert_eq!(run.items.inserted, 2);
    assert_eq!(run.children.inserted, 2);
    assert_eq!(run.skipped_invalid, 1);
    assert!(run.error.is_none());

    let storage = harvester.storage();
    let storage = storage.lock().unwrap();
    assert_eq!(storage.count_items(Some("rust")).unwrap(), 2);
    assert_eq!(storage.count_children(Some("rust")).unwrap(), 2);

    let forest = load_forest(&*storage, "p1").unwrap();
    assert_eq!(forest.roots.len(), 1);
    assert_eq!(forest.roots[0].child.id, "c1");
    assert_eq!(forest.roots[0].replies[0].child.id, "c2");
    assert!(forest.orphans.is_empty());

    let stats = load_statistics(&*storage, 10).unwrap();
    assert_eq!(stats.recent_runs.len(), 1);
    assert_eq!(stats.rate_limits.len(), 1);
    assert_eq!(stats.rate_limits[0].1.remaining, 590);
}

#[tokio::test]
async fn test_rerun_refreshes_only_changed_items() {
    let dir = TempDir::new().unwrap();

    let first_server = MockServer::start().await;
    mount_token(&first_server).await;
    mount_posts(&first_server, (10, 20)).await;
    mount_comments(&first_server).await;

    let config_path = write_config(&dir, &first_server, RUST_TARGET);
    let first = harvester(&config_path).scheduler().run_target("rust").await.unwrap().unwrap();
    assert_eq!(first.items.inserted, 2);

    // Same listing, one score moved.
    let second_server = MockServer::start().await;
    mount_token(&second_server).await;
    mount_posts(&second_server, (10, 35)).await;
    mount_comments(&second_server).await;

    let config_path = write_config(&dir, &second_server, RUST_TARGET);
    let harvester = harvester(&config_path);

    // The first run left a next run an hour out; run it by hand.
    let state = harvester.scheduler().state("rust").unwrap();
    assert!(state.record.next_run.is_some());

    let second = harvester.scheduler().run_target("rust").await.unwrap().unwrap();
    assert_eq!(second.outcome, RunOutcome::Success);
    assert_eq!(second.items.inserted, 0);
    assert_eq!(second.items.updated, 1);
    assert_eq!(second.items.skipped, 1);
    assert_eq!(second.children.skipped, 2);

    let storage = harvester.storage();
    let storage = storage.lock().unwrap();
    assert_eq!(storage.count_items(None).unwrap(), 2);
    assert_eq!(storage.get_item("p2").unwrap().unwrap().score, 35);
}

#[tokio::test]
async fn test_auth_failure_flags_target() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let harvester = harvester(&write_config(&dir, &server, RUST_TARGET));

    let run = harvester.scheduler().run_target("rust").await.unwrap().unwrap();
    assert_eq!(run.outcome, RunOutcome::Failed);
    assert!(run.error.is_some());

    let state = harvester.scheduler().state("rust").unwrap();
    assert!(state.record.needs_attention);
    assert!(state.record.next_run.is_some());

    let storage = harvester.storage();
    let stored = storage.lock().unwrap().get_target("rust").unwrap().unwrap();
    assert!(stored.needs_attention);
}

#[tokio::test]
async fn test_missing_target_fails_without_data() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/r/rust/top"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let harvester = harvester(&write_config(&dir, &server, RUST_TARGET));

    let run = harvester.scheduler().run_target("rust").await.unwrap().unwrap();
    assert_eq!(run.outcome, RunOutcome::Failed);
    assert!(!harvester.scheduler().state("rust").unwrap().record.needs_attention);
}

#[tokio::test]
async fn test_transient_failure_after_first_page_is_partial() {
    let server = MockServer::start().await;
    mount_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/r/rust/new"))
        .and(query_param("after", "t3_p2"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/rust/new"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(listing(vec![post("p1", 1), post("p2", 2)], Some("t3_p2"))),
        )
        .mount(&server)
        .await;

    let target = r#"
[[target]]
name = "rust"
credential = "main"
listing = "new"
max-items-per-run = 50
fetch-children = false
"#;
    let dir = TempDir::new().unwrap();
    let harvester = harvester(&write_config(&dir, &server, target));

    let run = harvester.scheduler().run_target("rust").await.unwrap().unwrap();
    assert_eq!(run.outcome, RunOutcome::Partial);
    assert_eq!(run.items.inserted, 2);

    let storage = harvester.storage();
    assert_eq!(storage.lock().unwrap().count_items(None).unwrap(), 2);
}

#[tokio::test]
async fn test_deactivated_target_is_refused() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config_path = write_config(&dir, &server, RUST_TARGET);

    harvester(&config_path)
        .scheduler()
        .set_active("rust", false)
        .unwrap();

    let harvester = harvester(&config_path);
    assert!(harvester.scheduler().run_target("rust").await.is_err());
    assert!(!harvester.scheduler().state("rust").unwrap().record.active);
}

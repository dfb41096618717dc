//! Integration tests for the HTTP provider
//!
//! These tests use wiremock to stand in for the token endpoint and the API,
//! and check how responses are decoded and classified.

use post_harvester::config::{CredentialEntry, ProviderConfig};
use post_harvester::provider::{
    ChildrenRequest, Credential, Listing, ListingRequest, Provider, ProviderError, RedditProvider,
    TimeWindow,
};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider_for(server: &MockServer) -> RedditProvider {
    RedditProvider::new(&ProviderConfig {
        auth_url: format!("{}/api/v1/access_token", server.uri()),
        api_url: server.uri(),
        user_agent: "post-harvester-tests/0.1".to_string(),
        request_timeout_secs: 5,
    })
    .expect("Failed to build provider")
}

fn credential() -> Credential {
    Credential::from_entry(&CredentialEntry {
        id: "main".to_string(),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        username: "bot".to_string(),
        password: "hunter2".to_string(),
    })
}

fn listing_request(target: &str, limit: u32) -> ListingRequest {
    ListingRequest {
        target: target.to_string(),
        listing: Listing::Top,
        window: TimeWindow::Week,
        limit,
        after: None,
    }
}

fn listing(ids: &[&str], after: Option<&str>) -> Value {
    let children: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "kind": "t3",
                "data": {
                    "id": id,
                    "subreddit": "rust",
                    "title": format!("Post {}", id),
                    "author": "poster",
                    "score": 10,
                    "upvote_ratio": 0.97,
                    "num_comments": 2,
                    "created_utc": 1700000000.0,
                    "edited": false
                }
            })
        })
        .collect();
    json!({ "kind": "Listing", "data": { "after": after, "children": children } })
}

async fn mount_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=bot"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-1",
            "token_type": "bearer",
            "expires_in": 86400
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_lists_items_and_reads_quota_headers() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/r/rust/top"))
        .and(header("authorization", "Bearer tok-1"))
        .and(query_param("t", "week"))
        .and(query_param("limit", "25"))
        .and(query_param("raw_json", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(listing(&["p1", "p2"], Some("t3_p2")))
                .insert_header("x-ratelimit-remaining", "598.0")
                .insert_header("x-ratelimit-used", "2")
                .insert_header("x-ratelimit-reset", "300"),
        )
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let response = provider
        .list_items(&credential(), &listing_request("rust", 25))
        .await
        .expect("listing should succeed");

    assert_eq!(response.body.items.len(), 2);
    assert_eq!(response.body.items[0].id.as_deref(), Some("p1"));
    assert_eq!(response.body.after.as_deref(), Some("t3_p2"));

    let quota = response.rate_limit.expect("quota headers present");
    assert_eq!(quota.remaining, 598);
    assert_eq!(quota.limit_total, 600);
}

#[tokio::test]
async fn test_token_reused_across_calls() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/r/rust/new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["p1"], None)))
        .expect(2)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut request = listing_request("rust", 10);
    request.listing = Listing::New;

    for _ in 0..2 {
        let response = provider.list_items(&credential(), &request).await.unwrap();
        assert!(response.rate_limit.is_none());
        assert_eq!(response.body.after, None);
    }
}

#[tokio::test]
async fn test_aliases_of_one_account_keep_separate_tokens() {
    let server = MockServer::start().await;
    mount_token(&server, 2).await;

    Mock::given(method("GET"))
        .and(path("/r/rust/top"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["p1"], None)))
        .expect(2)
        .mount(&server)
        .await;

    let main = credential();
    let rotated = Credential::from_entry(&CredentialEntry {
        id: "rotated".to_string(),
        client_id: "client".to_string(),
        client_secret: "new-secret".to_string(),
        username: "bot".to_string(),
        password: "correct-horse".to_string(),
    });
    assert_eq!(main.key, rotated.key);

    let provider = provider_for(&server);
    for cred in [&main, &rotated] {
        provider
            .list_items(cred, &listing_request("rust", 10))
            .await
            .expect("listing should succeed");
    }
}

#[tokio::test]
async fn test_limit_clamped_to_page_size() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/r/rust/top"))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&[], None)))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let response = provider
        .list_items(&credential(), &listing_request("rust", 500))
        .await
        .unwrap();
    assert!(response.body.items.is_empty());
}

#[tokio::test]
async fn test_bad_password_is_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "invalid_grant" })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider
        .list_items(&credential(), &listing_request("rust", 10))
        .await
        .unwrap_err();

    assert!(err.is_auth(), "unexpected error: {:?}", err);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_rejected_token_refreshed_once() {
    let server = MockServer::start().await;
    mount_token(&server, 2).await;

    Mock::given(method("GET"))
        .and(path("/r/rust/top"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider
        .list_items(&credential(), &listing_request("rust", 10))
        .await
        .unwrap_err();

    assert!(err.is_auth());
}

#[tokio::test]
async fn test_status_classification() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/r/missing/top"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/renamed/top"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", "/subreddits/search?q=renamed"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/private/top"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/flaky/top"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/busy/top"))
        .respond_with(ResponseTemplate::new(429).insert_header("x-ratelimit-reset", "42"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/garbled/top"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "unexpected": true })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let cred = credential();
    let fetch = |target: &'static str| {
        let provider = &provider;
        let cred = &cred;
        async move {
            provider
                .list_items(cred, &listing_request(target, 10))
                .await
                .unwrap_err()
        }
    };

    assert!(matches!(fetch("missing").await, ProviderError::InvalidTarget(_)));
    assert!(matches!(fetch("renamed").await, ProviderError::InvalidTarget(_)));
    assert!(matches!(fetch("private").await, ProviderError::InvalidTarget(_)));
    assert!(fetch("flaky").await.is_retryable());
    assert!(matches!(fetch("garbled").await, ProviderError::Malformed(_)));

    match fetch("busy").await {
        ProviderError::QuotaExceeded { reset_after } => {
            assert_eq!(reset_after, Some(Duration::from_secs(42)));
        }
        other => panic!("expected quota refusal, got {:?}", other),
    }
}

#[tokio::test]
async fn test_children_flattened_depth_first() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    let body = json!([
        listing(&["p1"], None),
        {
            "kind": "Listing",
            "data": {
                "children": [
                    {
                        "kind": "t1",
                        "data": {
                            "id": "c1",
                            "parent_id": "t3_p1",
                            "body": "top level",
                            "author": "a",
                            "score": 5,
                            "depth": 0,
                            "replies": {
                                "kind": "Listing",
                                "data": {
                                    "children": [{
                                        "kind": "t1",
                                        "data": {
                                            "id": "c2",
                                            "parent_id": "t1_c1",
                                            "body": "reply",
                                            "author": "b",
                                            "score": 1,
                                            "depth": 1,
                                            "replies": ""
                                        }
                                    }]
                                }
                            }
                        }
                    },
                    {
                        "kind": "t1",
                        "data": {
                            "id": "c3",
                            "parent_id": "t3_p1",
                            "body": "another",
                            "author": "c",
                            "score": 2,
                            "depth": 0,
                            "replies": ""
                        }
                    },
                    { "kind": "more", "data": { "count": 12, "children": ["c9"] } }
                ]
            }
        }
    ]);

    Mock::given(method("GET"))
        .and(path("/comments/p1"))
        .and(query_param("sort", "top"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let provider = provider_for(&server);

    let deep = provider
        .list_children(
            &credential(),
            &ChildrenRequest {
                item_id: "p1".to_string(),
                limit: 50,
                max_depth: 1,
            },
        )
        .await
        .unwrap();
    let ids: Vec<_> = deep.body.iter().filter_map(|c| c.id.as_deref()).collect();
    assert_eq!(ids, ["c1", "c2", "c3"]);

    let shallow = provider
        .list_children(
            &credential(),
            &ChildrenRequest {
                item_id: "p1".to_string(),
                limit: 50,
                max_depth: 0,
            },
        )
        .await
        .unwrap();
    let ids: Vec<_> = shallow.body.iter().filter_map(|c| c.id.as_deref()).collect();
    assert_eq!(ids, ["c1", "c3"]);
}

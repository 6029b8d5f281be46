//! Declarative REST, RSS and OAuth2 devices against a local HTTP server.

use devkind_core::{LoaderError, Params, Value};
use devkind_loader::{DeviceResolver, Subscription};
use devkind_testing::{fixtures, MockRegistry, TempPlatform};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn resolver(registry: MockRegistry) -> DeviceResolver {
    DeviceResolver::builder(Arc::new(registry), Arc::new(TempPlatform::new().unwrap())).build()
}

fn state(value: serde_json::Value) -> devkind_core::DeviceState {
    value.as_object().cloned().unwrap_or_default()
}

fn weather_manifest(base: &str) -> serde_json::Value {
    json!({
        "module_type": "generic_rest",
        "version": 3,
        "auth": { "type": "basic" },
        "queries": {
            "current": {
                "url": format!("{}/weather/${{city:url}}", base),
                "json_key": "data",
                "poll_interval": 50,
                "args": [
                    { "name": "city", "type": "String", "is_input": true },
                    { "name": "temperature", "type": "Measure(C)", "json_key": "main.temp" },
                    { "name": "updated", "type": "Date", "json_key": "time" }
                ]
            }
        },
        "actions": {
            "set_mode": {
                "url": format!("{}/mode", base),
                "method": "PUT",
                "default": { "mode": "auto", "level": 1 }
            }
        }
    })
}

fn city(name: &str) -> Params {
    let mut params = Params::new();
    params.insert("city".into(), Value::from(name));
    params
}

#[tokio::test]
async fn test_rest_query_with_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weather/San%20Francisco"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "main": { "temp": 21.5 }, "time": "2024-01-02T03:04:05Z" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver(
        MockRegistry::new().with_manifest("com.example.weather", weather_manifest(&server.uri())),
    );
    let class = resolver.get_device_class("com.example.weather").await.unwrap();
    let device = class.instantiate(state(json!({ "username": "user", "password": "pass" })));

    let records = device.get("current", &city("San Francisco")).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["temperature"], Value::Number(21.5));
    assert!(matches!(records[0]["updated"], Value::Date(_)));
    assert!(!records[0].contains_key("city"));
}

#[tokio::test]
async fn test_rest_http_error_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let resolver = resolver(
        MockRegistry::new().with_manifest("com.example.weather", weather_manifest(&server.uri())),
    );
    let device = resolver
        .get_device_class("com.example.weather")
        .await
        .unwrap()
        .instantiate(state(json!({})));

    let err = device.get("current", &city("Oslo")).await.unwrap_err();
    assert!(matches!(err, LoaderError::Http { status: 503, .. }));
}

#[tokio::test]
async fn test_rest_action_merges_defaults() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/mode"))
        .and(body_json(json!({ "mode": "auto", "level": 5.0 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver(
        MockRegistry::new().with_manifest("com.example.weather", weather_manifest(&server.uri())),
    );
    let device = resolver
        .get_device_class("com.example.weather")
        .await
        .unwrap()
        .instantiate(state(json!({})));

    let mut params = Params::new();
    params.insert("level".into(), Value::Number(5.0));
    let result = device.invoke("set_mode", &params).await.unwrap();
    assert_eq!(result, json!({ "ok": true }));
}

#[tokio::test]
async fn test_get_action_sends_parameters_as_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lights"))
        .and(query_param("room", "kitchen"))
        .and(query_param("on", "true"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let manifest = json!({
        "module_type": "generic_rest",
        "version": 1,
        "actions": {
            "switch": {
                "url": format!("{}/lights", server.uri()),
                "method": "GET",
                "default": { "room": "kitchen" }
            }
        }
    });
    let resolver = resolver(MockRegistry::new().with_manifest("com.example.lights", manifest));
    let device = resolver
        .get_device_class("com.example.lights")
        .await
        .unwrap()
        .instantiate(state(json!({})));

    let mut params = Params::new();
    params.insert("on".into(), Value::Boolean(true));
    assert_eq!(device.invoke("switch", &params).await.unwrap(), json!(null));
}

#[tokio::test]
async fn test_polling_subscription_until_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weather/Oslo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "main": { "temp": -3 } }]
        })))
        .mount(&server)
        .await;

    let resolver = resolver(
        MockRegistry::new().with_manifest("com.example.weather", weather_manifest(&server.uri())),
    );
    let device = resolver
        .get_device_class("com.example.weather")
        .await
        .unwrap()
        .instantiate(state(json!({})));

    let mut subscription: Subscription = device.subscribe("current", city("Oslo")).unwrap();
    let first = subscription.next().await.unwrap().unwrap();
    let second = subscription.next().await.unwrap().unwrap();
    assert_eq!(first.record["temperature"], Value::Number(-3.0));
    assert!(second.timestamp >= first.timestamp);

    subscription.cancel();
    let next = tokio::time::timeout(Duration::from_secs(1), subscription.next())
        .await
        .unwrap();
    assert!(next.is_none());

    // several poll intervals pass without another request
    let polled = server.received_requests().await.unwrap().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(subscription.next().await.is_none());
    assert_eq!(server.received_requests().await.unwrap().len(), polled);
}

#[tokio::test]
async fn test_cancel_handle_stops_polling_from_another_task() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weather/Oslo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "main": { "temp": 4 } }
        })))
        .mount(&server)
        .await;

    let resolver = resolver(
        MockRegistry::new().with_manifest("com.example.weather", weather_manifest(&server.uri())),
    );
    let device = resolver
        .get_device_class("com.example.weather")
        .await
        .unwrap()
        .instantiate(state(json!({})));

    let mut subscription = device.subscribe("current", city("Oslo")).unwrap();
    let handle = subscription.cancel_handle();
    let consumer = tokio::spawn(async move {
        let mut seen = 0;
        while let Some(observation) = subscription.next().await {
            observation.unwrap();
            seen += 1;
        }
        seen
    });

    tokio::time::sleep(Duration::from_millis(120)).await;
    handle.cancel();
    let seen = tokio::time::timeout(Duration::from_secs(1), consumer)
        .await
        .unwrap()
        .unwrap();
    assert!(seen >= 1);

    let polled = server.received_requests().await.unwrap().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.received_requests().await.unwrap().len(), polled);
}

#[tokio::test]
async fn test_rss_feed() {
    let server = MockServer::start().await;
    let feed = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>News</title>
    <item>
      <title>First</title>
      <link>https://news.example.com/1</link>
      <pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Second</title>
      <link>https://news.example.com/2</link>
    </item>
  </channel>
</rss>"#;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed))
        .mount(&server)
        .await;

    let resolver = resolver(MockRegistry::new().with_manifest(
        "com.example.news",
        fixtures::rss_manifest(&format!("{}/feed.xml", server.uri())),
    ));
    let device = resolver
        .get_device_class("com.example.news")
        .await
        .unwrap()
        .instantiate(state(json!({})));

    let records = device.get("articles", &Params::new()).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["title"], Value::from("First"));
    assert_eq!(records[0]["link"], Value::entity("https://news.example.com/1"));
    assert!(matches!(records[0]["updated_time"], Value::Date(_)));
    assert!(records[1]["updated_time"].is_null());
}

#[tokio::test]
async fn test_oauth2_exchange_and_profile() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 3600,
            "scope": "read"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer at"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u1",
            "name": "Ann",
            "email": "ann@example.com"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/inbox"))
        .and(header("authorization", "Bearer at"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "subject": "hi" }])))
        .expect(1)
        .mount(&server)
        .await;

    let base = server.uri();
    let manifest = json!({
        "module_type": "generic_rest",
        "version": 1,
        "name": "Account ${name}",
        "auth": {
            "type": "oauth2",
            "client_id": "client",
            "client_secret": "secret",
            "authorize_url": format!("{}/authorize", base),
            "token_url": format!("{}/token", base),
            "scope": ["read"],
            "get_profile_url": format!("{}/me", base),
            "profile_fields": ["id", "name"]
        },
        "queries": {
            "inbox": {
                "url": format!("{}/inbox", base),
                "args": [{ "name": "subject", "type": "String" }]
            }
        }
    });
    let resolver = resolver(MockRegistry::new().with_manifest("com.example.mail", manifest));
    let class = resolver.get_device_class("com.example.mail").await.unwrap();

    let flow = class.oauth().unwrap();
    let authorize = flow.authorize_url("https://app.example.com/cb", "s1").unwrap();
    assert!(authorize.starts_with(&format!("{}/authorize?", base)));

    let tokens = flow.exchange_code("abc", "https://app.example.com/cb").await.unwrap();
    let device = class.complete_oauth(tokens).await.unwrap();

    assert_eq!(device.access_token(), Some("at"));
    assert_eq!(device.refresh_token(), Some("rt"));
    assert_eq!(device.state()["id"], "u1");
    assert_eq!(device.state()["scope"], "read");
    assert!(!device.state().contains_key("email"));
    assert!(!device.state().contains_key("expires_in"));
    assert_eq!(device.name(), Some("Account Ann"));
    assert_eq!(device.unique_id(), None);

    let records = device.get("inbox", &Params::new()).await.unwrap();
    assert_eq!(records[0]["subject"], Value::from("hi"));
}

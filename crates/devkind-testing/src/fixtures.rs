//! Manifest fixtures, as the JSON the registry would serve.

use serde_json::{json, Value};

/// REST device with one polled `status` query reading `$.value`.
pub fn rest_manifest(url: &str) -> Value {
    json!({
        "module_type": "generic_rest",
        "version": 1,
        "name": "Test REST device",
        "queries": {
            "status": {
                "url": url,
                "poll_interval": 1000,
                "args": [
                    { "name": "value", "type": "Number" }
                ]
            }
        }
    })
}

/// RSS device with one `articles` query.
pub fn rss_manifest(url: &str) -> Value {
    json!({
        "module_type": "rss",
        "version": 1,
        "queries": {
            "articles": {
                "url": url,
                "poll_interval": 3600000,
                "args": [
                    { "name": "title", "type": "String" },
                    { "name": "link", "type": "Entity(tt:url)" },
                    { "name": "updated_time", "type": "Date" }
                ]
            }
        }
    })
}

/// Builtin device manifest with no functions.
pub fn builtin_manifest() -> Value {
    json!({
        "module_type": "builtin",
        "version": 1
    })
}

/// Packaged device declaring a `readings` query and a `reset` action.
pub fn packaged_manifest(version: i64, package_version: i64) -> Value {
    json!({
        "module_type": "packaged",
        "version": version,
        "package_version": package_version,
        "queries": {
            "readings": {
                "poll_interval": 60000,
                "args": [
                    { "name": "value", "type": "Number" }
                ]
            }
        },
        "actions": {
            "reset": {}
        }
    })
}

/// Packaged parent declaring `child_types`.
pub fn packaged_parent_manifest(package_version: i64, children: &[&str]) -> Value {
    let mut manifest = packaged_manifest(1, package_version);
    manifest["child_types"] = json!(children);
    manifest
}

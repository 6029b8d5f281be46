//! Declarative RSS/Atom adapter.
//!
//! Feed items decode to `{title, link, description, updated_time, guid,
//! author}` objects, then go through the same extraction rules as REST
//! responses. RSS devices cannot declare actions or use a zero poll interval.

use super::http::DeviceRequest;
use crate::device::{Device, DeviceClass, QueryBinding, QueryHandler};
use crate::extract::{extract_one, parse_date_str};
use crate::template::format_string;
use async_trait::async_trait;
use chrono::SecondsFormat;
use devkind_core::{DeviceManifest, FunctionSpec, HttpMethod, LoaderError, LoaderResult, Params, Record};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

/// Element text, ignoring attributes.
#[derive(Debug, Default, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<Text>,
    link: Option<Text>,
    description: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<Text>,
    guid: Option<Text>,
    author: Option<Text>,
    #[serde(rename = "creator", alias = "dc:creator")]
    creator: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href", default)]
    href: String,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<Text>,
    #[serde(default)]
    link: Vec<AtomLink>,
    summary: Option<Text>,
    content: Option<Text>,
    updated: Option<Text>,
    published: Option<Text>,
    id: Option<Text>,
    author: Option<AtomAuthor>,
}

fn text(t: Option<Text>) -> Option<String> {
    t.map(|t| t.value.trim().to_string()).filter(|s| !s.is_empty())
}

fn normalize_date(raw: Option<String>) -> Option<String> {
    raw.map(|s| match parse_date_str(&s) {
        Some(date) => date.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => s,
    })
}

fn item_json(
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    updated_time: Option<String>,
    guid: Option<String>,
    author: Option<String>,
) -> JsonValue {
    json!({
        "title": title,
        "link": link,
        "description": description,
        "updated_time": normalize_date(updated_time),
        "guid": guid,
        "author": author,
    })
}

/// Decode an RSS 2.0 or Atom document into item objects.
pub fn parse_feed(body: &str) -> LoaderResult<Vec<JsonValue>> {
    if let Ok(rss) = quick_xml::de::from_str::<Rss>(body) {
        return Ok(rss
            .channel
            .item
            .into_iter()
            .map(|item| {
                item_json(
                    text(item.title),
                    text(item.link),
                    text(item.description),
                    text(item.pub_date),
                    text(item.guid),
                    text(item.author).or_else(|| text(item.creator)),
                )
            })
            .collect());
    }

    let feed: AtomFeed = quick_xml::de::from_str(body)
        .map_err(|e| LoaderError::Communication(format!("Invalid feed: {}", e)))?;
    Ok(feed
        .entry
        .into_iter()
        .map(|entry| {
            let link = entry
                .link
                .iter()
                .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
                .or_else(|| entry.link.first())
                .map(|l| l.href.clone())
                .filter(|href| !href.is_empty());
            item_json(
                text(entry.title),
                link,
                text(entry.summary).or_else(|| text(entry.content)),
                text(entry.updated).or_else(|| text(entry.published)),
                text(entry.id),
                entry.author.and_then(|a| a.name),
            )
        })
        .collect())
}

pub struct RssQuery {
    spec: FunctionSpec,
    http: reqwest::Client,
}

impl RssQuery {
    pub fn new(spec: FunctionSpec, http: reqwest::Client) -> Self {
        Self { spec, http }
    }
}

#[async_trait]
impl QueryHandler for RssQuery {
    async fn get(&self, device: &Device, params: &Params) -> LoaderResult<Vec<Record>> {
        let template = self.spec.url.as_deref().unwrap_or_default();
        let url = format_string(template, device.state(), Some(params));

        let body = DeviceRequest {
            method: HttpMethod::Get,
            url: &url,
            query: Vec::new(),
            body: None,
            auth: device.auth_header(),
            accept: Some("application/rss+xml, application/atom+xml, application/xml, text/xml"),
        }
        .send(&self.http)
        .await?;

        Ok(parse_feed(&body)?
            .iter()
            .map(|item| extract_one(item, &self.spec))
            .collect())
    }
}

/// Build a device class for an `rss` manifest.
pub fn build_rss_class(manifest: Arc<DeviceManifest>, http: reqwest::Client) -> LoaderResult<DeviceClass> {
    let mut queries = IndexMap::new();
    for (name, spec) in &manifest.queries {
        if spec.poll_interval == 0 {
            return Err(LoaderError::Implementation(format!(
                "Poll interval cannot be 0 for RSS query {}",
                name
            )));
        }
        let handler = Arc::new(RssQuery::new(spec.clone(), http.clone()));
        queries.insert(name.clone(), QueryBinding::new(name, spec, handler, None)?);
    }

    if let Some(action) = manifest.actions.keys().next() {
        return Err(LoaderError::Implementation(format!(
            "Invalid action {}: RSS devices cannot have actions",
            action
        )));
    }

    Ok(DeviceClass::new(manifest, queries, IndexMap::new(), http))
}

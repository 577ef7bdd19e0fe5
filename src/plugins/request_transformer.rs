//! Request mutation: remove, rename, replace, add, append over headers,
//! query string, and JSON bodies, applied in that order. `add` never
//! overwrites an existing key; `replace` only touches existing keys.
//!
//! Configured values may reference the request through `$(headers.<name>)`,
//! `$(query.<name>)`, and `$(consumer.<field>)` templates, resolved against
//! the context before insertion.
use std::{collections::HashMap, sync::LazyLock};

use async_trait::async_trait;
use bytes::Bytes;
use eyre::Result;
use http::{HeaderName, HeaderValue, header};
use regex::Regex;
use serde::Deserialize;

use crate::plugins::{Plugin, RequestContext, build_query, query_pairs};

static TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\(([^)]+)\)").expect("valid template pattern"));

/// Resolve `$(...)` templates in a configured value.
///
/// `headers.*` and `query.*` resolve to the request's value or empty;
/// `consumer.*` resolves only when an auth plugin attached a consumer.
/// Unrecognized tokens are left verbatim.
fn interpolate(value: &str, ctx: &RequestContext) -> String {
    if !value.contains("$(") {
        return value.to_string();
    }
    TEMPLATE
        .replace_all(value, |caps: &regex::Captures| {
            let token = &caps[1];
            match token.split_once('.') {
                Some(("headers", name)) => ctx.header(name).unwrap_or_default().to_string(),
                Some(("query", name)) => ctx.query_param(name).unwrap_or_default(),
                Some(("consumer", field)) => match ctx.consumer.as_ref() {
                    Some(consumer) => match field {
                        "username" => consumer.username.clone(),
                        "custom_id" => consumer.custom_id.clone(),
                        "user_id" | "sub" => consumer.user_id.clone(),
                        _ => None,
                    }
                    .unwrap_or_default(),
                    None => caps[0].to_string(),
                },
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Interpolate string-valued JSON entries; other value kinds pass through.
fn interpolate_json(value: &serde_json::Value, ctx: &RequestContext) -> serde_json::Value {
    match value.as_str() {
        Some(s) => serde_json::Value::String(interpolate(s, ctx)),
        None => value.clone(),
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RemoveSet {
    headers: Vec<String>,
    querystring: Vec<String>,
    body: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MapSet {
    headers: HashMap<String, String>,
    querystring: HashMap<String, String>,
    body: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TransformOptions {
    remove: RemoveSet,
    rename: MapSet,
    replace: MapSet,
    add: MapSet,
    append: MapSet,
}

pub struct RequestTransformerPlugin {
    options: TransformOptions,
}

impl RequestTransformerPlugin {
    pub fn from_options(options: &serde_json::Value) -> Result<Self> {
        Ok(Self {
            options: serde_json::from_value(options.clone())?,
        })
    }

    fn transform_headers(&self, ctx: &mut RequestContext) {
        for name in &self.options.remove.headers {
            ctx.headers.remove(name.as_str());
        }

        for (old, new) in &self.options.rename.headers {
            if let Some(value) = ctx.headers.remove(old.as_str()) {
                if let Ok(name) = HeaderName::try_from(new.as_str()) {
                    ctx.headers.insert(name, value);
                }
            }
        }

        for (key, value) in &self.options.replace.headers {
            if ctx.headers.contains_key(key.as_str()) {
                let resolved = interpolate(value, ctx);
                if let (Ok(name), Ok(value)) = (
                    HeaderName::try_from(key.as_str()),
                    HeaderValue::from_str(&resolved),
                ) {
                    ctx.headers.insert(name, value);
                }
            }
        }

        for (key, value) in &self.options.add.headers {
            if !ctx.headers.contains_key(key.as_str()) {
                let resolved = interpolate(value, ctx);
                if let (Ok(name), Ok(value)) = (
                    HeaderName::try_from(key.as_str()),
                    HeaderValue::from_str(&resolved),
                ) {
                    ctx.headers.insert(name, value);
                }
            }
        }

        for (key, value) in &self.options.append.headers {
            let resolved = interpolate(value, ctx);
            let appended = match ctx.header(key) {
                Some(existing) => format!("{existing}, {resolved}"),
                None => resolved,
            };
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(key.as_str()),
                HeaderValue::from_str(&appended),
            ) {
                ctx.headers.insert(name, value);
            }
        }
    }

    fn transform_query(&self, ctx: &mut RequestContext) {
        let mut pairs = query_pairs(ctx.uri.query().unwrap_or(""));

        pairs.retain(|(k, _)| !self.options.remove.querystring.contains(k));

        for (old, new) in &self.options.rename.querystring {
            for pair in pairs.iter_mut().filter(|(k, _)| k == old) {
                pair.0 = new.clone();
            }
        }

        for (key, value) in &self.options.replace.querystring {
            let resolved = interpolate(value, ctx);
            for pair in pairs.iter_mut().filter(|(k, _)| k == key) {
                pair.1 = resolved.clone();
            }
        }

        for (key, value) in &self.options.add.querystring {
            if !pairs.iter().any(|(k, _)| k == key) {
                pairs.push((key.clone(), interpolate(value, ctx)));
            }
        }

        for (key, value) in &self.options.append.querystring {
            let resolved = interpolate(value, ctx);
            match pairs.iter_mut().find(|(k, _)| k == key) {
                Some(pair) if !pair.1.is_empty() => pair.1 = format!("{},{resolved}", pair.1),
                Some(pair) => pair.1 = resolved,
                None => pairs.push((key.clone(), resolved)),
            }
        }

        let path = ctx.uri.path().to_string();
        let rebuilt = if pairs.is_empty() {
            path
        } else {
            format!("{path}?{}", build_query(&pairs))
        };
        if let Ok(uri) = rebuilt.parse() {
            ctx.uri = uri;
        }
    }

    fn transform_body(&self, ctx: &mut RequestContext) {
        let no_body_work = self.options.remove.body.is_empty()
            && self.options.rename.body.is_empty()
            && self.options.replace.body.is_empty()
            && self.options.add.body.is_empty()
            && self.options.append.body.is_empty();
        if no_body_work || ctx.body.is_empty() {
            return;
        }

        let is_json = ctx
            .header("content-type")
            .is_some_and(|ct| ct.contains("application/json"));
        if !is_json {
            return;
        }

        let Ok(serde_json::Value::Object(mut data)) =
            serde_json::from_slice::<serde_json::Value>(&ctx.body)
        else {
            return;
        };

        for key in &self.options.remove.body {
            data.remove(key);
        }
        for (old, new) in &self.options.rename.body {
            if let Some(value) = data.remove(old.as_str()) {
                data.insert(new.as_str().unwrap_or(old).to_string(), value);
            }
        }
        for (key, value) in &self.options.replace.body {
            if data.contains_key(key) {
                data.insert(key.clone(), interpolate_json(value, ctx));
            }
        }
        for (key, value) in &self.options.add.body {
            if !data.contains_key(key) {
                data.insert(key.clone(), interpolate_json(value, ctx));
            }
        }
        for (key, value) in &self.options.append.body {
            let resolved = interpolate_json(value, ctx);
            match data.get_mut(key) {
                Some(serde_json::Value::String(existing)) => {
                    if let Some(suffix) = resolved.as_str() {
                        existing.push_str(suffix);
                    }
                }
                Some(serde_json::Value::Array(existing)) => existing.push(resolved),
                Some(_) => {}
                None => {
                    data.insert(key.clone(), resolved);
                }
            }
        }

        let body = serde_json::Value::Object(data).to_string();
        if let Ok(len) = HeaderValue::from_str(&body.len().to_string()) {
            ctx.headers.insert(header::CONTENT_LENGTH, len);
        }
        ctx.body = Bytes::from(body);
    }
}

#[async_trait]
impl Plugin for RequestTransformerPlugin {
    fn name(&self) -> &'static str {
        "request-transformer"
    }

    async fn access(&self, ctx: &mut RequestContext) -> Result<()> {
        self.transform_headers(ctx);
        self.transform_query(ctx);
        self.transform_body(ctx);
        Ok(())
    }
}

//! Response mutation: the same remove / rename / replace / add / append
//! shape as the request transformer, applied to response headers and JSON
//! bodies during the response phase.
use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use eyre::Result;
use http::{HeaderName, HeaderValue};
use serde::Deserialize;

use crate::plugins::{Plugin, ProxyResponse, RequestContext};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RemoveSet {
    headers: Vec<String>,
    json: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MapSet {
    headers: HashMap<String, String>,
    json: HashMap<String, serde_json::Value>,
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

pub struct ResponseTransformerPlugin {
    options: TransformOptions,
}

impl ResponseTransformerPlugin {
    pub fn from_options(options: &serde_json::Value) -> Result<Self> {
        Ok(Self {
            options: serde_json::from_value(options.clone())?,
        })
    }

    fn transform_headers(&self, resp: &mut ProxyResponse) {
        for name in &self.options.remove.headers {
            resp.headers.remove(name.as_str());
        }

        for (old, new) in &self.options.rename.headers {
            if let Some(value) = resp.headers.remove(old.as_str()) {
                if let Ok(name) = HeaderName::try_from(new.as_str()) {
                    resp.headers.insert(name, value);
                }
            }
        }

        for (key, value) in &self.options.replace.headers {
            if resp.headers.contains_key(key.as_str()) {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::try_from(key.as_str()),
                    HeaderValue::from_str(value),
                ) {
                    resp.headers.insert(name, value);
                }
            }
        }

        for (key, value) in &self.options.add.headers {
            if !resp.headers.contains_key(key.as_str()) {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::try_from(key.as_str()),
                    HeaderValue::from_str(value),
                ) {
                    resp.headers.insert(name, value);
                }
            }
        }

        for (key, value) in &self.options.append.headers {
            let appended = match resp.headers.get(key.as_str()).and_then(|v| v.to_str().ok()) {
                Some(existing) => format!("{existing}, {value}"),
                None => value.clone(),
            };
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(key.as_str()),
                HeaderValue::from_str(&appended),
            ) {
                resp.headers.insert(name, value);
            }
        }
    }

    fn transform_json(&self, resp: &mut ProxyResponse) {
        let no_json_work = self.options.remove.json.is_empty()
            && self.options.replace.json.is_empty()
            && self.options.add.json.is_empty()
            && self.options.append.json.is_empty();
        if no_json_work {
            return;
        }

        let is_json = resp
            .headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        if !is_json {
            return;
        }

        let Ok(serde_json::Value::Object(mut data)) =
            serde_json::from_slice::<serde_json::Value>(&resp.body)
        else {
            return;
        };

        for key in &self.options.remove.json {
            data.remove(key);
        }
        for (key, value) in &self.options.replace.json {
            if data.contains_key(key) {
                data.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in &self.options.add.json {
            if !data.contains_key(key) {
                data.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in &self.options.append.json {
            match data.get_mut(key) {
                Some(serde_json::Value::String(existing)) => {
                    if let Some(suffix) = value.as_str() {
                        existing.push_str(suffix);
                    }
                }
                Some(serde_json::Value::Array(existing)) => existing.push(value.clone()),
                Some(_) => {}
                None => {
                    data.insert(key.clone(), value.clone());
                }
            }
        }

        resp.set_body(Bytes::from(serde_json::Value::Object(data).to_string()));
    }
}

#[async_trait]
impl Plugin for ResponseTransformerPlugin {
    fn name(&self) -> &'static str {
        "response-transformer"
    }

    async fn response(&self, _ctx: &mut RequestContext, resp: &mut ProxyResponse) -> Result<()> {
        self.transform_headers(resp);
        self.transform_json(resp);
        Ok(())
    }
}

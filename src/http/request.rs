use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE};
use serde_json::{Map, Value};
use url::Url;

use crate::error::{HrpError, Result};
use crate::model::{Request, TConfig, VariablesMap};
use crate::parser::{format_value, Parser};

/// A fully realized request: everything the client needs to send it.
#[derive(Debug)]
pub struct RealizedRequest {
    pub method: reqwest::Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub allow_redirects: bool,
    /// From an explicit Content-Length header, overwritten by the encoded
    /// body length.
    pub declared_content_length: Option<i64>,
}

/// Resolve a step URL against the case base URL. Absolute step URLs win.
fn build_url(base_url: &str, step_url: &str) -> Result<String> {
    match Url::parse(step_url) {
        Ok(url) => Ok(url.to_string()),
        Err(_) => {
            if base_url.is_empty() {
                return Err(HrpError::Config(format!(
                    "relative url {:?} without base_url",
                    step_url
                )));
            }
            let base = Url::parse(base_url)
                .map_err(|e| HrpError::Config(format!("invalid base_url {:?}: {}", base_url, e)))?;
            base.join(step_url)
                .map(|u| u.to_string())
                .map_err(|e| HrpError::Config(format!("invalid url {:?}: {}", step_url, e)))
        }
    }
}

/// Turns a declarative `Request` plus a variable scope into a realized
/// request and a mirror map for hooks and reporting. Pure: performs no
/// network I/O.
pub struct RequestBuilder<'a> {
    parser: &'a Parser,
    config: &'a TConfig,
    step_request: &'a Request,
    url: String,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    declared_content_length: Option<i64>,
    request_map: Map<String, Value>,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(parser: &'a Parser, config: &'a TConfig, step_request: &'a Request) -> Self {
        let request_map = serde_json::to_value(step_request)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        Self {
            parser,
            config,
            step_request,
            url: String::new(),
            headers: HeaderMap::new(),
            body: None,
            declared_content_length: None,
            request_map,
        }
    }

    pub async fn build(mut self, step_variables: &VariablesMap) -> Result<(RealizedRequest, Value)> {
        self.prepare_url_params(step_variables).await?;
        self.prepare_headers(step_variables).await?;
        self.prepare_body(step_variables).await?;

        let url = Url::parse(&self.url)
            .map_err(|e| HrpError::Config(format!("invalid url {:?}: {}", self.url, e)))?;
        let realized = RealizedRequest {
            method: self.step_request.method.to_reqwest(),
            url,
            headers: self.headers,
            body: self.body,
            timeout: self.step_request.timeout.map(Duration::from_secs_f64),
            allow_redirects: self.step_request.allow_redirects,
            declared_content_length: self.declared_content_length,
        };
        Ok((realized, Value::Object(self.request_map)))
    }

    async fn prepare_url_params(&mut self, variables: &VariablesMap) -> Result<()> {
        let request_url = self.parser.parse_string(&self.step_request.url, variables).await?;
        let mut raw_url = build_url(&self.config.base_url, &request_url)?;

        if !self.step_request.params.is_empty() {
            let params = self
                .parser
                .parse(&Value::Object(self.step_request.params.clone()), variables)
                .await?;
            let parsed = params.as_object().cloned().unwrap_or_default();
            self.request_map.insert("params".to_string(), Value::Object(parsed.clone()));
            if !parsed.is_empty() {
                let mut serializer = url::form_urlencoded::Serializer::new(String::new());
                for (k, v) in &parsed {
                    serializer.append_pair(k, &format_value(v));
                }
                let query = serializer.finish();
                raw_url.push(if raw_url.contains('?') { '&' } else { '?' });
                raw_url.push_str(&query);
            }
        }

        self.request_map.insert("url".to_string(), Value::String(raw_url.clone()));
        self.url = raw_url;
        Ok(())
    }

    async fn prepare_headers(&mut self, variables: &VariablesMap) -> Result<()> {
        // step headers win over config headers
        let mut merged = self.config.headers.clone();
        merged.extend(self.step_request.headers.clone());

        if !merged.is_empty() {
            let parsed = self.parser.parse_headers(&merged, variables).await?;
            for (key, value) in &parsed {
                // omit pseudo header names for HTTP/1, e.g. :authority, :path
                if key.starts_with(':') {
                    continue;
                }
                let name = HeaderName::from_bytes(key.as_bytes())
                    .map_err(|e| HrpError::Config(format!("invalid header name {:?}: {}", key, e)))?;
                let header_value = HeaderValue::from_str(value)
                    .map_err(|e| HrpError::Config(format!("invalid header value {:?}: {}", value, e)))?;
                self.headers.append(name, header_value);

                if key.eq_ignore_ascii_case("content-length") {
                    if let Ok(length) = value.parse::<i64>() {
                        self.declared_content_length = Some(length);
                    }
                }
            }
        }

        if !self.step_request.cookies.is_empty() {
            let mut pairs = Vec::with_capacity(self.step_request.cookies.len());
            for (name, raw_value) in &self.step_request.cookies {
                let value = self
                    .parser
                    .parse(&Value::String(raw_value.clone()), variables)
                    .await?;
                pairs.push(format!("{}={}", name, format_value(&value)));
            }
            pairs.sort();
            let cookie_header = pairs.join("; ");
            let header_value = HeaderValue::from_str(&cookie_header)
                .map_err(|e| HrpError::Config(format!("invalid cookie value: {}", e)))?;
            self.headers.append(COOKIE, header_value);
        }

        let headers_map: HashMap<String, String> = self
            .headers
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        self.request_map
            .insert("headers".to_string(), serde_json::to_value(headers_map)?);
        Ok(())
    }

    async fn prepare_body(&mut self, variables: &VariablesMap) -> Result<()> {
        let Some(body) = &self.step_request.body else {
            return Ok(());
        };
        let data = self.parser.parse(body, variables).await?;
        self.request_map.insert("body".to_string(), data.clone());

        let content_type = self
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let bytes = match &data {
            Value::Object(map) if content_type.starts_with("application/x-www-form-urlencoded") => {
                let mut serializer = url::form_urlencoded::Serializer::new(String::new());
                for (k, v) in map {
                    serializer.append_pair(k, &format_value(v));
                }
                serializer.finish().into_bytes()
            }
            Value::Object(_) | Value::Array(_) => {
                let encoded = serde_json::to_vec(&data)?;
                if content_type.is_empty() {
                    self.headers.insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("application/json; charset=utf-8"),
                    );
                }
                encoded
            }
            Value::String(s) => s.clone().into_bytes(),
            other => {
                return Err(HrpError::BodyType(format!(
                    "unsupported request body type: {}",
                    match other {
                        Value::Bool(_) => "bool",
                        Value::Number(_) => "number",
                        _ => "null",
                    }
                )));
            }
        };

        self.declared_content_length = Some(bytes.len() as i64);
        self.body = Some(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Method;
    use serde_json::json;

    fn config_with_base(base: &str) -> TConfig {
        TConfig::new("t").with_base_url(base)
    }

    fn scope(pairs: &[(&str, Value)]) -> VariablesMap {
        let mut map = VariablesMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.clone());
        }
        map
    }

    #[test]
    fn url_resolution() {
        assert_eq!(build_url("http://h", "/u/1").unwrap(), "http://h/u/1");
        assert_eq!(build_url("http://h/api/", "v1/users").unwrap(), "http://h/api/v1/users");
        // absolute step url wins over base
        assert_eq!(build_url("http://h", "http://other/x").unwrap(), "http://other/x");
        assert!(build_url("", "/relative").is_err());
    }

    #[tokio::test]
    async fn params_are_appended_to_query() {
        let parser = Parser::new();
        let config = config_with_base("http://h");
        let mut request = Request::new(Method::Get, "/search?q=a");
        request.params.insert("page".to_string(), json!("$p"));
        let builder = RequestBuilder::new(&parser, &config, &request);
        let (realized, request_map) = builder.build(&scope(&[("p", json!(2))])).await.unwrap();

        assert_eq!(realized.url.as_str(), "http://h/search?q=a&page=2");
        assert_eq!(request_map["params"], json!({"page": 2}));
    }

    #[tokio::test]
    async fn step_headers_override_config_and_pseudo_headers_skipped() {
        let parser = Parser::new();
        let mut config = config_with_base("http://h");
        config.headers.insert("X-Env".to_string(), "config".to_string());
        config.headers.insert("X-Shared".to_string(), "base".to_string());

        let mut request = Request::new(Method::Get, "/");
        request.headers.insert("X-Shared".to_string(), "step".to_string());
        request.headers.insert(":authority".to_string(), "nope".to_string());
        request.cookies.insert("sid".to_string(), "$sid".to_string());

        let builder = RequestBuilder::new(&parser, &config, &request);
        let (realized, _) = builder.build(&scope(&[("sid", json!("abc"))])).await.unwrap();

        assert_eq!(realized.headers.get("x-shared").unwrap(), "step");
        assert_eq!(realized.headers.get("x-env").unwrap(), "config");
        assert!(realized.headers.get(":authority").is_none());
        assert_eq!(realized.headers.get(COOKIE).unwrap(), "sid=abc");
    }

    #[tokio::test]
    async fn form_body_is_url_encoded() {
        let parser = Parser::new();
        let config = config_with_base("http://h");
        let mut request = Request::new(Method::Post, "/submit");
        request
            .headers
            .insert("Content-Type".to_string(), "application/x-www-form-urlencoded".to_string());
        request.body = Some(json!({"a": "1", "b": "2"}));

        let builder = RequestBuilder::new(&parser, &config, &request);
        let (realized, _) = builder.build(&VariablesMap::new()).await.unwrap();
        let body = String::from_utf8(realized.body.unwrap()).unwrap();

        let mut fields: Vec<&str> = body.split('&').collect();
        fields.sort();
        assert_eq!(fields, vec!["a=1", "b=2"]);
        assert_eq!(realized.declared_content_length, Some(7));
    }

    #[tokio::test]
    async fn json_body_gets_default_content_type() {
        let parser = Parser::new();
        let config = config_with_base("http://h");
        let mut request = Request::new(Method::Post, "/items");
        request.body = Some(json!([1, 2, 3]));

        let builder = RequestBuilder::new(&parser, &config, &request);
        let (realized, request_map) = builder.build(&VariablesMap::new()).await.unwrap();

        assert_eq!(
            realized.headers.get(CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );
        assert_eq!(realized.body.unwrap(), b"[1,2,3]".to_vec());
        assert_eq!(request_map["body"], json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn string_body_passes_through_raw() {
        let parser = Parser::new();
        let config = config_with_base("http://h");
        let mut request = Request::new(Method::Post, "/raw");
        request.body = Some(json!("plain text"));

        let builder = RequestBuilder::new(&parser, &config, &request);
        let (realized, _) = builder.build(&VariablesMap::new()).await.unwrap();
        assert_eq!(realized.body.unwrap(), b"plain text".to_vec());
    }

    #[tokio::test]
    async fn scalar_body_is_a_body_type_error() {
        let parser = Parser::new();
        let config = config_with_base("http://h");
        let mut request = Request::new(Method::Post, "/bad");
        request.body = Some(json!(true));

        let builder = RequestBuilder::new(&parser, &config, &request);
        let err = builder.build(&VariablesMap::new()).await.unwrap_err();
        assert_eq!(err.kind(), "body_type_error");
    }

    #[tokio::test]
    async fn explicit_content_length_is_adopted() {
        let parser = Parser::new();
        let config = config_with_base("http://h");
        let mut request = Request::new(Method::Get, "/");
        request.headers.insert("Content-Length".to_string(), "11".to_string());

        let builder = RequestBuilder::new(&parser, &config, &request);
        let (realized, _) = builder.build(&VariablesMap::new()).await.unwrap();
        assert_eq!(realized.declared_content_length, Some(11));
    }
}

use std::collections::HashMap;
use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{HrpError, Result};
use crate::model::{Validator, VariablesMap};
use crate::parser::Parser;
use crate::validate::{compare, ValidationResult};

/// Decompress the body according to Content-Encoding. For gzip and deflate
/// the declared content length no longer matches the decoded stream, so it
/// is invalidated.
fn decode_body(encoding: &str, raw: &[u8], content_length: &mut i64) -> Result<Vec<u8>> {
    match encoding {
        "br" => {
            let mut out = Vec::new();
            brotli::Decompressor::new(raw, 4096)
                .read_to_end(&mut out)
                .map_err(|e| HrpError::Decode(format!("brotli: {}", e)))?;
            Ok(out)
        }
        "gzip" => {
            let mut out = Vec::new();
            GzDecoder::new(raw)
                .read_to_end(&mut out)
                .map_err(|e| HrpError::Decode(format!("gzip: {}", e)))?;
            *content_length = -1;
            Ok(out)
        }
        "deflate" => {
            let mut out = Vec::new();
            ZlibDecoder::new(raw)
                .read_to_end(&mut out)
                .map_err(|e| HrpError::Decode(format!("deflate: {}", e)))?;
            *content_length = -1;
            Ok(out)
        }
        _ => Ok(raw.to_vec()),
    }
}

fn parse_set_cookie(raw: &str) -> Option<(String, String)> {
    let first = raw.split(';').next()?;
    let (name, value) = first.split_once('=')?;
    Some((name.trim().to_string(), value.trim().to_string()))
}

/// Response snapshot exposing a JMESPath-searchable virtual document with
/// fields `status_code`, `headers`, `cookies`, `body`.
#[derive(Debug)]
pub struct ResponseObject {
    meta: Value,
    pub content_size: i64,
    pub validation_results: Vec<ValidationResult>,
}

impl ResponseObject {
    /// Fully reads and decodes the response body.
    pub async fn from_response(response: reqwest::Response) -> Result<Self> {
        let status = response.status().as_u16();
        let mut content_length: i64 = response.content_length().map(|l| l as i64).unwrap_or(-1);

        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let cookies: HashMap<String, String> = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();

        let encoding = headers.get("content-encoding").cloned().unwrap_or_default();
        let raw = response
            .bytes()
            .await
            .map_err(|e| HrpError::Io(format!("read response body failed: {}", e)))?;
        let decoded = decode_body(&encoding, &raw, &mut content_length)?;

        let text = String::from_utf8_lossy(&decoded).to_string();
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(Self::from_parts(status, headers, cookies, body, content_length))
    }

    pub fn from_parts(
        status: u16,
        headers: HashMap<String, String>,
        cookies: HashMap<String, String>,
        body: Value,
        content_size: i64,
    ) -> Self {
        Self {
            meta: json!({
                "status_code": status,
                "headers": headers,
                "cookies": cookies,
                "body": body,
            }),
            content_size,
            validation_results: Vec::new(),
        }
    }

    /// The virtual response document.
    pub fn meta(&self) -> &Value {
        &self.meta
    }

    /// Evaluate a JMESPath expression over the response document. Missing
    /// paths yield null; malformed paths are extract errors.
    pub fn search(&self, path: &str) -> Result<Value> {
        let expr = jmespath::compile(path)
            .map_err(|e| HrpError::Extract(format!("invalid jmespath {:?}: {}", path, e)))?;
        let doc = jmespath::Variable::from_json(&self.meta.to_string())
            .map_err(|e| HrpError::Extract(format!("response document: {}", e)))?;
        let found = expr
            .search(doc)
            .map_err(|e| HrpError::Extract(format!("jmespath {:?}: {}", path, e)))?;
        serde_json::to_value(found.as_ref()).map_err(Into::into)
    }

    /// Apply named extractors; extraction is advisory, so missing paths
    /// yield null entries rather than errors.
    pub fn extract(&self, extractors: &HashMap<String, String>) -> Result<VariablesMap> {
        let mut out = VariablesMap::new();
        for (name, path) in extractors {
            let value = self.search(path)?;
            debug!(var = %name, path = %path, ?value, "extracted");
            out.insert(name.clone(), value);
        }
        Ok(out)
    }

    /// Evaluate validators in order, recording every result. The first
    /// failure is returned after all entries ran.
    pub async fn validate(
        &mut self,
        parser: &Parser,
        validators: &[Validator],
        scope: &VariablesMap,
    ) -> Result<()> {
        self.validation_results.clear();
        let mut first_failure: Option<HrpError> = None;

        for validator in validators {
            // a check containing `$` is a scope expression, not a path
            let actual = if validator.check.contains('$') {
                parser
                    .parse(&Value::String(validator.check.clone()), scope)
                    .await?
            } else {
                self.search(&validator.check)?
            };
            let expect = parser.parse(&validator.expect, scope).await?;
            let passed = compare(&validator.assert, &actual, &expect)?;

            if passed {
                debug!(check = %validator.check, assert = %validator.assert, "validate ok");
            } else {
                warn!(
                    check = %validator.check,
                    assert = %validator.assert,
                    ?expect,
                    ?actual,
                    "validate failed"
                );
                if first_failure.is_none() {
                    let detail = format!(
                        "assert {} {} failed: expect {}, actual {}",
                        validator.check, validator.assert, expect, actual
                    );
                    first_failure = Some(HrpError::Validation(if validator.message.is_empty() {
                        detail
                    } else {
                        format!("{} ({})", validator.message, detail)
                    }));
                }
            }

            self.validation_results.push(ValidationResult {
                check: validator.check.clone(),
                assert: validator.assert.clone(),
                expect,
                actual,
                passed,
            });
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn sample() -> ResponseObject {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let mut cookies = HashMap::new();
        cookies.insert("sid".to_string(), "abc".to_string());
        ResponseObject::from_parts(
            200,
            headers,
            cookies,
            json!({"id": 42, "tags": ["a", "b"]}),
            17,
        )
    }

    #[test]
    fn search_over_virtual_document() {
        let resp = sample();
        assert_eq!(resp.search("status_code").unwrap(), json!(200));
        assert_eq!(resp.search("body.id").unwrap(), json!(42));
        assert_eq!(resp.search("cookies.sid").unwrap(), json!("abc"));
        assert_eq!(resp.search("body.missing").unwrap(), Value::Null);
    }

    #[test]
    fn malformed_path_is_extract_error() {
        let resp = sample();
        let err = resp.search("body.[").unwrap_err();
        assert_eq!(err.kind(), "extract_error");
    }

    #[test]
    fn extraction_is_idempotent() {
        let resp = sample();
        let mut extractors = HashMap::new();
        extractors.insert("uid".to_string(), "body.id".to_string());
        extractors.insert("nothing".to_string(), "body.absent".to_string());
        let first = resp.extract(&extractors).unwrap();
        let second = resp.extract(&extractors).unwrap();
        assert_eq!(first, second);
        assert_eq!(first["uid"], json!(42));
        assert_eq!(first["nothing"], Value::Null);
    }

    #[tokio::test]
    async fn validate_records_all_entries_and_returns_first_failure() {
        let mut resp = sample();
        let parser = Parser::new();
        let validators = vec![
            Validator {
                check: "status_code".to_string(),
                assert: "equals".to_string(),
                expect: json!(200),
                message: String::new(),
            },
            Validator {
                check: "body.id".to_string(),
                assert: "equals".to_string(),
                expect: json!(7),
                message: "id mismatch".to_string(),
            },
            Validator {
                check: "body.tags".to_string(),
                assert: "length_equals".to_string(),
                expect: json!(2),
                message: String::new(),
            },
        ];
        let err = resp
            .validate(&parser, &validators, &VariablesMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert!(err.to_string().contains("id mismatch"));
        // all three entries recorded, in order
        assert_eq!(resp.validation_results.len(), 3);
        assert!(resp.validation_results[0].passed);
        assert!(!resp.validation_results[1].passed);
        assert!(resp.validation_results[2].passed);
    }

    #[tokio::test]
    async fn check_with_variable_reference_uses_scope() {
        let mut resp = sample();
        let parser = Parser::new();
        let mut scope = VariablesMap::new();
        scope.insert("x".to_string(), json!(3));
        let validators = vec![Validator {
            check: "${x}".to_string(),
            assert: "equals".to_string(),
            expect: json!(3),
            message: String::new(),
        }];
        resp.validate(&parser, &validators, &scope).await.unwrap();
        assert!(resp.validation_results[0].passed);
    }

    #[test]
    fn gzip_body_decodes_and_invalidates_length() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"ok":true}"#).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut content_length = compressed.len() as i64;
        let decoded = decode_body("gzip", &compressed, &mut content_length).unwrap();
        assert_eq!(decoded, br#"{"ok":true}"#.to_vec());
        assert_eq!(content_length, -1);
    }

    #[test]
    fn unknown_encoding_passes_through() {
        let mut content_length = 4;
        let decoded = decode_body("", b"abcd", &mut content_length).unwrap();
        assert_eq!(decoded, b"abcd".to_vec());
        assert_eq!(content_length, 4);
    }

    #[test]
    fn corrupt_gzip_is_decode_error() {
        let mut content_length = 3;
        let err = decode_body("gzip", b"not gzip", &mut content_length).unwrap_err();
        assert_eq!(err.kind(), "decode_error");
    }

    #[test]
    fn set_cookie_parsing() {
        assert_eq!(
            parse_set_cookie("sid=abc; Path=/; HttpOnly"),
            Some(("sid".to_string(), "abc".to_string()))
        );
        assert_eq!(parse_set_cookie("malformed"), None);
    }
}

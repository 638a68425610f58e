use std::collections::HashMap;
use std::sync::Arc;

use async_recursion::async_recursion;
use serde_json::{Map, Value};

use crate::error::{HrpError, Result};
use crate::model::VariablesMap;
use crate::plugin::PluginCaller;

pub mod template;

use template::{has_tokens, tokenize, Argument, Segment};

/// Renders a JSON value for embedding in a string context.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// True when any string leaf of the value still carries interpolation
/// tokens.
pub fn value_has_tokens(value: &Value) -> bool {
    match value {
        Value::String(s) => has_tokens(s),
        Value::Array(items) => items.iter().any(value_has_tokens),
        Value::Object(map) => map.iter().any(|(k, v)| has_tokens(k) || value_has_tokens(v)),
        _ => false,
    }
}

/// Overlay `vars` on top of `base` (`vars` wins on key collisions).
pub fn merge_variables(vars: &VariablesMap, base: &VariablesMap) -> VariablesMap {
    if vars.is_empty() {
        return base.clone();
    }
    if base.is_empty() {
        return vars.clone();
    }
    let mut merged = base.clone();
    for (k, v) in vars {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Interpolates `$var` / `${expr}` tokens against a scope, dispatching
/// `${fn(...)}` tokens to the configured plugin.
#[derive(Clone, Default)]
pub struct Parser {
    plugin: Option<Arc<dyn PluginCaller>>,
}

impl Parser {
    pub fn new() -> Self {
        Self { plugin: None }
    }

    pub fn with_plugin(plugin: Arc<dyn PluginCaller>) -> Self {
        Self { plugin: Some(plugin) }
    }

    /// Deep copy of `value` with every string leaf interpolated. Map keys
    /// are interpolated as strings.
    #[async_recursion]
    pub async fn parse(&self, value: &Value, scope: &VariablesMap) -> Result<Value> {
        match value {
            Value::String(s) => self.parse_string_value(s, scope).await,
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.parse(item, scope).await?);
                }
                Ok(Value::Array(out))
            }
            Value::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    let key = self.parse_string(k, scope).await?;
                    out.insert(key, self.parse(v, scope).await?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Interpolate a string, returning the rendered string.
    pub async fn parse_string(&self, input: &str, scope: &VariablesMap) -> Result<String> {
        let value = self.parse_string_value(input, scope).await?;
        Ok(format_value(&value))
    }

    /// Interpolate keys and values of a header map.
    pub async fn parse_headers(
        &self,
        headers: &HashMap<String, String>,
        scope: &VariablesMap,
    ) -> Result<HashMap<String, String>> {
        let mut out = HashMap::with_capacity(headers.len());
        for (k, v) in headers {
            let key = self.parse_string(k, scope).await?;
            let value = self.parse_string(v, scope).await?;
            out.insert(key, value);
        }
        Ok(out)
    }

    /// Resolve a variable mapping against itself: values may reference
    /// other variables in the same mapping. Runs in passes until stable;
    /// circular or unknown references are parse errors.
    pub async fn parse_variables(&self, variables: &VariablesMap) -> Result<VariablesMap> {
        let mut parsed = variables.clone();
        let max_rounds = parsed.len().max(1);

        for _ in 0..=max_rounds {
            let pending: Vec<String> = parsed
                .iter()
                .filter(|(_, v)| value_has_tokens(v))
                .map(|(k, _)| k.clone())
                .collect();
            if pending.is_empty() {
                return Ok(parsed);
            }

            let mut progressed = false;
            let mut last_err: Option<HrpError> = None;
            for name in pending {
                let raw = parsed.get(&name).cloned().unwrap_or(Value::Null);
                match self.parse(&raw, &parsed).await {
                    Ok(value) => {
                        if value != raw {
                            progressed = true;
                        }
                        parsed.insert(name, value);
                    }
                    Err(err) => last_err = Some(err),
                }
            }
            if !progressed {
                return Err(last_err.unwrap_or_else(|| {
                    HrpError::Parse("circular reference in variables".to_string())
                }));
            }
        }
        Err(HrpError::Parse("unresolved variables after maximum passes".to_string()))
    }

    async fn parse_string_value(&self, input: &str, scope: &VariablesMap) -> Result<Value> {
        let segments = tokenize(input)?;

        // A string that is exactly one token keeps the token's type.
        if segments.len() == 1 {
            return match &segments[0] {
                Segment::Literal(text) => Ok(Value::String(text.clone())),
                Segment::Variable(name) => self.lookup(name, scope),
                Segment::FunctionCall { name, args } => self.call_function(name, args, scope).await,
            };
        }

        let mut rendered = String::new();
        for segment in &segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Variable(name) => {
                    rendered.push_str(&format_value(&self.lookup(name, scope)?));
                }
                Segment::FunctionCall { name, args } => {
                    let value = self.call_function(name, args, scope).await?;
                    rendered.push_str(&format_value(&value));
                }
            }
        }
        Ok(Value::String(rendered))
    }

    fn lookup(&self, name: &str, scope: &VariablesMap) -> Result<Value> {
        scope
            .get(name)
            .cloned()
            .ok_or_else(|| HrpError::Parse(format!("variable not found: {}", name)))
    }

    async fn call_function(
        &self,
        name: &str,
        args: &[Argument],
        scope: &VariablesMap,
    ) -> Result<Value> {
        let plugin = self
            .plugin
            .as_ref()
            .ok_or_else(|| HrpError::Parse(format!("function not available: {}", name)))?;

        let mut resolved = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Argument::Variable(var) => resolved.push(self.lookup(var, scope)?),
                Argument::Literal(value) => resolved.push(value.clone()),
            }
        }

        plugin.call(name, &resolved).await.map_err(|err| match err {
            parse @ HrpError::Parse(_) => parse,
            other => HrpError::Parse(format!("call {} failed: {}", name, other)),
        })
    }
}

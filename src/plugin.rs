use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{HrpError, Result};

/// Capability for invoking user-defined helper functions from interpolated
/// expressions. The core does not constrain the transport: hosts may
/// implement this in-process or over an RPC channel.
#[async_trait]
pub trait PluginCaller: Send + Sync {
    async fn call(&self, name: &str, args: &[Value]) -> Result<Value>;
}

type HelperFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// In-process `PluginCaller` over registered closures. Used by embedders
/// and by the test suite.
#[derive(Default)]
pub struct FuncRegistry {
    funcs: HashMap<String, Box<HelperFn>>,
}

impl FuncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.funcs.insert(name.into(), Box::new(func));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }
}

#[async_trait]
impl PluginCaller for FuncRegistry {
    async fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let func = self
            .funcs
            .get(name)
            .ok_or_else(|| HrpError::Parse(format!("function not found: {}", name)))?;
        func(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registered_function_is_callable() {
        let mut registry = FuncRegistry::new();
        registry.register("sum", |args| {
            let total: i64 = args.iter().filter_map(|v| v.as_i64()).sum();
            Ok(json!(total))
        });
        assert!(registry.contains("sum"));
        let out = registry.call("sum", &[json!(1), json!(2)]).await.unwrap();
        assert_eq!(out, json!(3));
    }

    #[tokio::test]
    async fn unknown_function_is_a_parse_error() {
        let registry = FuncRegistry::new();
        let err = registry.call("nope", &[]).await.unwrap_err();
        assert_eq!(err.kind(), "parse_error");
    }
}

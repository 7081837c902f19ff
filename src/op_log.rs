use std::collections::HashMap;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::AppError;

fn context_to_json(context: &HashMap<String, String>) -> Option<Value> {
    if context.is_empty() {
        None
    } else {
        let mut map = Map::with_capacity(context.len());
        for (key, value) in context {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        Some(Value::Object(map))
    }
}

fn wrap_details(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        json!({ "value": value })
    }
}

fn error_details(err: &AppError) -> Value {
    let mut map = Map::new();
    map.insert("code".into(), Value::String(err.code().to_string()));
    map.insert("message".into(), Value::String(err.message().to_string()));
    if let Some(context) = context_to_json(err.context()) {
        map.insert("context".into(), context);
    }
    Value::Object(map)
}

/// Enter/success/fail records for one store operation.
pub struct LogScope {
    cmd: &'static str,
    user_id: Option<String>,
    start: Instant,
}

impl LogScope {
    pub fn new(cmd: &'static str, user_id: Option<&str>) -> Self {
        let scope = Self {
            cmd,
            user_id: user_id.map(str::to_string),
            start: Instant::now(),
        };
        debug!(
            target: "acta",
            cmd = scope.cmd,
            user_id = scope.user_id.as_deref(),
            details = %json!({ "stage": "enter" })
        );
        scope
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn success(&self, details: Value) {
        info!(
            target: "acta",
            cmd = self.cmd,
            user_id = self.user_id.as_deref(),
            duration_ms = self.elapsed_ms(),
            details = %wrap_details(details)
        );
    }

    /// Caller mistakes and missing records log at warn, everything else at error.
    pub fn fail(&self, err: &AppError) {
        if err.is_validation() || err.is_not_found() {
            warn!(
                target: "acta",
                cmd = self.cmd,
                user_id = self.user_id.as_deref(),
                duration_ms = self.elapsed_ms(),
                details = %error_details(err)
            );
            return;
        }
        error!(
            target: "acta",
            cmd = self.cmd,
            user_id = self.user_id.as_deref(),
            duration_ms = self.elapsed_ms(),
            details = %error_details(err)
        );
    }

    /// Logs the outcome of `result` and hands it back unchanged.
    pub fn finish<T>(
        &self,
        result: Result<T, AppError>,
        details: impl FnOnce(&T) -> Value,
    ) -> Result<T, AppError> {
        match &result {
            Ok(value) => self.success(details(value)),
            Err(err) => self.fail(err),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_object_details_are_wrapped() {
        assert_eq!(wrap_details(json!(3)), json!({ "value": 3 }));
        assert_eq!(wrap_details(json!({ "id": "a" })), json!({ "id": "a" }));
    }

    #[test]
    fn error_details_include_context() {
        let err = AppError::new("VALIDATION/TITLE", "Title is required")
            .with_context("field", "title");
        let details = error_details(&err);
        assert_eq!(details["code"], "VALIDATION/TITLE");
        assert_eq!(details["context"]["field"], "title");
    }

    #[test]
    fn finish_passes_result_through() {
        let scope = LogScope::new("test_op", Some("u1"));
        let ok: Result<i32, AppError> = scope.finish(Ok(5), |v| json!({ "value": v }));
        assert_eq!(ok.unwrap(), 5);
        let err = scope
            .finish::<i32>(Err(AppError::new("TASK/NOT_FOUND", "gone")), |_| json!({}))
            .unwrap_err();
        assert!(err.is_not_found());
    }
}

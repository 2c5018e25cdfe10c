//! Closure task kind: a pre-registered operator applied to a delegate
//! context on the worker.
//!
//! User code cannot be shipped as machine code across nodes, so the closure
//! payload is bounded: `code` names an operator registered for the session
//! plus a data-only parameter record, and `delegate` carries the variable
//! bindings the operator runs against. The worker resolves both through the
//! same session registry, the crate's analogue of a session-bound class
//! loader.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::codec;
use crate::error::{FlowgridError, Result};

/// The bindings a closure task runs against. The holder map is rehydrated on
/// the worker, mutated by the operator, and shipped back in the result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskContext {
    holder: HashMap<String, Value>,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_holder(holder: HashMap<String, Value>) -> Self {
        Self { holder }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.holder.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.holder.insert(key.into(), value);
    }

    pub fn holder(&self) -> &HashMap<String, Value> {
        &self.holder
    }

    pub fn into_holder(self) -> HashMap<String, Value> {
        self.holder
    }
}

/// The dehydrated form of a closure: an operator name plus its data-only
/// parameter record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorCall {
    pub operator: String,
    pub params: Value,
}

impl OperatorCall {
    pub fn new(operator: impl Into<String>, params: Value) -> Self {
        Self {
            operator: operator.into(),
            params,
        }
    }
}

/// A named computation invokable on a worker. Bound to the delegate context
/// as its mutable receiver at invocation time.
pub trait Operator: Send + Sync {
    fn apply(&self, ctx: &mut TaskContext, params: &Value) -> Result<Value>;
}

impl<F> Operator for F
where
    F: Fn(&mut TaskContext, &Value) -> Result<Value> + Send + Sync,
{
    fn apply(&self, ctx: &mut TaskContext, params: &Value) -> Result<Value> {
        (self)(ctx, params)
    }
}

/// Operators available to one session's closure tasks.
#[derive(Default)]
pub struct OperatorRegistry {
    ops: HashMap<String, Arc<dyn Operator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, op: impl Operator + 'static) {
        self.ops.insert(name.into(), Arc::new(op));
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Operator>> {
        self.ops
            .get(name)
            .cloned()
            .ok_or_else(|| FlowgridError::UnknownOperator(name.to_string()))
    }
}

/// Worker-side resolver from session id to that session's operators.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<OperatorRegistry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bind(&self, session_id: Uuid, registry: OperatorRegistry) {
        self.sessions
            .write()
            .await
            .insert(session_id, Arc::new(registry));
        tracing::debug!(session_id = %session_id, "Session operator registry bound");
    }

    pub async fn registry_for(&self, session_id: Uuid) -> Result<Arc<OperatorRegistry>> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(FlowgridError::UnknownSession(session_id))
    }
}

/// Result of a closure execution: the operator's return value and the
/// post-execution delegate bindings.
#[derive(Debug, Clone)]
pub struct ClosureOutcome {
    pub value: Value,
    pub context: HashMap<String, Value>,
}

/// Wire form of a closure task: both fields are closure-codec payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosureSpec {
    pub code: Vec<u8>,
    pub delegate: Vec<u8>,
}

impl ClosureSpec {
    pub fn new(call: &OperatorCall, delegate: &TaskContext) -> Result<Self> {
        Ok(Self {
            code: codec::encode_object(call)?,
            delegate: codec::encode_object(delegate)?,
        })
    }

    /// Rehydrate the delegate and the call, resolve the operator through the
    /// session registry, and invoke it against the mutable context.
    /// Cancellation is best-effort: checked before invocation, no preemption.
    pub async fn run(
        &self,
        session_id: Uuid,
        sessions: &SessionRegistry,
        cancel: &CancellationToken,
    ) -> Result<ClosureOutcome> {
        let registry = sessions.registry_for(session_id).await?;
        let mut ctx: TaskContext = codec::decode_object(&self.delegate)?;
        let call: OperatorCall = codec::decode_object(&self.code)?;
        let op = registry.get(&call.operator)?;

        if cancel.is_cancelled() {
            return Err(FlowgridError::Cancelled);
        }

        let value = op.apply(&mut ctx, &call.params)?;
        Ok(ClosureOutcome {
            value,
            context: ctx.into_holder(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_closure_run_resolves_operator_and_mutates_context() {
        let sessions = SessionRegistry::new();
        let session_id = Uuid::new_v4();

        let mut registry = OperatorRegistry::new();
        registry.register("bump", |ctx: &mut TaskContext, params: &Value| {
            let by = params["by"].as_i64().unwrap_or(0);
            let count = ctx.get("count").and_then(Value::as_i64).unwrap_or(0);
            ctx.set("count", json!(count + by));
            Ok(json!({ "count": count + by }))
        });
        sessions.bind(session_id, registry).await;

        let mut delegate = TaskContext::new();
        delegate.set("count", json!(0));
        let spec = ClosureSpec::new(&OperatorCall::new("bump", json!({"by": 2})), &delegate).unwrap();

        let out = spec
            .run(session_id, &sessions, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.value, json!({"count": 2}));
        assert_eq!(out.context.get("count"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_unknown_operator_is_an_error() {
        let sessions = SessionRegistry::new();
        let session_id = Uuid::new_v4();
        sessions.bind(session_id, OperatorRegistry::new()).await;

        let spec =
            ClosureSpec::new(&OperatorCall::new("missing", json!(null)), &TaskContext::new())
                .unwrap();
        let result = spec
            .run(session_id, &sessions, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(FlowgridError::UnknownOperator(_))));
    }

    #[tokio::test]
    async fn test_unknown_session_is_an_error() {
        let sessions = SessionRegistry::new();
        let spec =
            ClosureSpec::new(&OperatorCall::new("noop", json!(null)), &TaskContext::new()).unwrap();
        let result = spec
            .run(Uuid::new_v4(), &sessions, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(FlowgridError::UnknownSession(_))));
    }
}

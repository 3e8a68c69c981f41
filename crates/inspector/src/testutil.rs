//! Scripted page double for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::InspectorError;
use crate::ports::InspectorPage;

#[derive(Clone, Debug)]
pub enum MockOp {
    Evaluate(String),
    Preload,
    BypassCsp(bool),
    Reload,
    FullAxTree,
    Resolve(u64),
    CallFunction { object_id: String, args: Vec<Value> },
}

/// InspectorPage double. Responses are queued ahead of time; every call is
/// recorded so assertions can check ordering and counts.
#[derive(Default)]
pub struct MockPage {
    eval_results: Mutex<VecDeque<Result<Value, InspectorError>>>,
    call_results: Mutex<VecDeque<Result<Value, InspectorError>>>,
    resolve_results: Mutex<VecDeque<Result<String, InspectorError>>>,
    ax_nodes: Mutex<Vec<Value>>,
    ops: Mutex<Vec<MockOp>>,
}

impl MockPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_eval(&self, value: Value) {
        self.eval_results.lock().unwrap().push_back(Ok(value));
    }

    pub fn push_eval_err(&self, err: InspectorError) {
        self.eval_results.lock().unwrap().push_back(Err(err));
    }

    pub fn push_call(&self, value: Value) {
        self.call_results.lock().unwrap().push_back(Ok(value));
    }

    pub fn push_call_err(&self, err: InspectorError) {
        self.call_results.lock().unwrap().push_back(Err(err));
    }

    pub fn push_resolve(&self, object_id: &str) {
        self.resolve_results
            .lock()
            .unwrap()
            .push_back(Ok(object_id.to_owned()));
    }

    pub fn push_resolve_err(&self, err: InspectorError) {
        self.resolve_results.lock().unwrap().push_back(Err(err));
    }

    pub fn set_ax_nodes(&self, nodes: Vec<Value>) {
        *self.ax_nodes.lock().unwrap() = nodes;
    }

    pub fn ops(&self) -> Vec<MockOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&MockOp) -> bool) -> usize {
        self.ops.lock().unwrap().iter().filter(|op| pred(op)).count()
    }

    fn record(&self, op: MockOp) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl InspectorPage for MockPage {
    async fn evaluate(&self, expression: &str) -> Result<Value, InspectorError> {
        self.record(MockOp::Evaluate(expression.to_owned()));
        self.eval_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(InspectorError::Payload("unscripted evaluate".into())))
    }

    async fn add_preload_script(&self, _source: &str) -> Result<(), InspectorError> {
        self.record(MockOp::Preload);
        Ok(())
    }

    async fn set_bypass_csp(&self, enabled: bool) -> Result<(), InspectorError> {
        self.record(MockOp::BypassCsp(enabled));
        Ok(())
    }

    async fn reload(&self) -> Result<(), InspectorError> {
        self.record(MockOp::Reload);
        Ok(())
    }

    async fn full_ax_tree(&self) -> Result<Vec<Value>, InspectorError> {
        self.record(MockOp::FullAxTree);
        Ok(self.ax_nodes.lock().unwrap().clone())
    }

    async fn resolve_backend_node(&self, backend_ref: u64) -> Result<String, InspectorError> {
        self.record(MockOp::Resolve(backend_ref));
        self.resolve_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(InspectorError::Resolution {
                    reference: backend_ref,
                    reason: "unscripted resolve".into(),
                })
            })
    }

    async fn call_function_on(
        &self,
        object_id: &str,
        _declaration: &str,
        args: &[Value],
    ) -> Result<Value, InspectorError> {
        self.record(MockOp::CallFunction {
            object_id: object_id.to_owned(),
            args: args.to_vec(),
        });
        self.call_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(InspectorError::Payload("unscripted call".into())))
    }
}

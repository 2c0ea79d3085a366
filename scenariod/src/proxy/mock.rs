//! In-memory proxy for testing scenarios without a control plane
//!
//! `MockProxy` keeps enabled state and attached toxics in memory and records
//! every call, so tests can assert both the end state and the exact sequence
//! of operations a scenario performed. Individual operations can be switched
//! to fail.

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

use super::{Proxy, Toxic, ToxicSpec};
use crate::error::ProxyError;

/// One recorded call against a [`MockProxy`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyCall {
    /// `enable()`
    Enable,
    /// `disable()`
    Disable,
    /// `add_toxic()`, with the effective toxic name
    AddToxic(String),
    /// `remove_toxic()`
    RemoveToxic(String),
    /// `toxics()`
    ListToxics,
}

#[derive(Debug, Default)]
struct FailureConfig {
    enable: bool,
    disable: bool,
    add_toxic: bool,
    remove_toxic: bool,
    list_toxics: bool,
}

#[derive(Debug)]
struct MockState {
    enabled: bool,
    toxics: Vec<Toxic>,
    calls: Vec<ProxyCall>,
    fail: FailureConfig,
}

/// Mock in-memory proxy
#[derive(Debug)]
pub struct MockProxy {
    name: String,
    state: Mutex<MockState>,
}

impl MockProxy {
    /// Create an enabled proxy with no toxics
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MockState {
                enabled: true,
                toxics: Vec::new(),
                calls: Vec::new(),
                fail: FailureConfig::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // Poisoned only by a panicking test thread; the state is still consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether traffic currently flows
    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Toxics currently attached
    pub fn active_toxics(&self) -> Vec<Toxic> {
        self.lock().toxics.clone()
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<ProxyCall> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls matching `predicate`
    pub fn count_calls(&self, predicate: impl Fn(&ProxyCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Forget recorded calls, keeping state
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make `enable()` fail
    pub fn fail_enable(&self, fail: bool) {
        self.lock().fail.enable = fail;
    }

    /// Make `disable()` fail
    pub fn fail_disable(&self, fail: bool) {
        self.lock().fail.disable = fail;
    }

    /// Make `add_toxic()` fail
    pub fn fail_add_toxic(&self, fail: bool) {
        self.lock().fail.add_toxic = fail;
    }

    /// Make `remove_toxic()` fail
    pub fn fail_remove_toxic(&self, fail: bool) {
        self.lock().fail.remove_toxic = fail;
    }

    /// Make `toxics()` fail
    pub fn fail_list_toxics(&self, fail: bool) {
        self.lock().fail.list_toxics = fail;
    }

    fn rejected(&self, operation: &str) -> ProxyError {
        ProxyError::Rejected(format!("mock {} failure on {}", operation, self.name))
    }
}

#[async_trait]
impl Proxy for MockProxy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enable(&self) -> Result<(), ProxyError> {
        let mut state = self.lock();
        state.calls.push(ProxyCall::Enable);
        if state.fail.enable {
            return Err(self.rejected("enable"));
        }
        state.enabled = true;
        Ok(())
    }

    async fn disable(&self) -> Result<(), ProxyError> {
        let mut state = self.lock();
        state.calls.push(ProxyCall::Disable);
        if state.fail.disable {
            return Err(self.rejected("disable"));
        }
        state.enabled = false;
        Ok(())
    }

    async fn add_toxic(&self, spec: &ToxicSpec) -> Result<Toxic, ProxyError> {
        let toxic = Toxic::from(spec);
        let mut state = self.lock();
        state.calls.push(ProxyCall::AddToxic(toxic.name.clone()));
        if state.fail.add_toxic {
            return Err(self.rejected("add toxic"));
        }
        if state.toxics.iter().any(|t| t.name == toxic.name) {
            return Err(ProxyError::Status {
                status: 409,
                body: "toxic already exists".to_string(),
            });
        }
        state.toxics.push(toxic.clone());
        Ok(toxic)
    }

    async fn remove_toxic(&self, name: &str) -> Result<(), ProxyError> {
        let mut state = self.lock();
        state.calls.push(ProxyCall::RemoveToxic(name.to_string()));
        if state.fail.remove_toxic {
            return Err(self.rejected("remove toxic"));
        }
        let before = state.toxics.len();
        state.toxics.retain(|t| t.name != name);
        if state.toxics.len() == before {
            return Err(ProxyError::Status {
                status: 404,
                body: "toxic not found".to_string(),
            });
        }
        Ok(())
    }

    async fn toxics(&self) -> Result<Vec<Toxic>, ProxyError> {
        let mut state = self.lock();
        state.calls.push(ProxyCall::ListToxics);
        if state.fail.list_toxics {
            return Err(self.rejected("list toxics"));
        }
        Ok(state.toxics.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let proxy = MockProxy::new("p");
        proxy.disable().await.unwrap();
        proxy.add_toxic(&ToxicSpec::latency(10, 0)).await.unwrap();
        proxy.remove_toxic("latency_downstream").await.unwrap();
        proxy.enable().await.unwrap();

        assert_eq!(
            proxy.calls(),
            vec![
                ProxyCall::Disable,
                ProxyCall::AddToxic("latency_downstream".into()),
                ProxyCall::RemoveToxic("latency_downstream".into()),
                ProxyCall::Enable,
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_toxic_conflicts() {
        let proxy = MockProxy::new("p");
        let spec = ToxicSpec::timeout(100).named("t");
        proxy.add_toxic(&spec).await.unwrap();
        let err = proxy.add_toxic(&spec).await.unwrap_err();
        assert!(matches!(err, ProxyError::Status { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_configured_failure_leaves_state_untouched() {
        let proxy = MockProxy::new("p");
        proxy.fail_disable(true);
        assert!(proxy.disable().await.is_err());
        assert!(proxy.is_enabled());
        assert_eq!(proxy.count_calls(|c| *c == ProxyCall::Disable), 1);
    }
}

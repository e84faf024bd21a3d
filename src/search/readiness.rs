/// Model availability checks
use crate::store::{ModelService, StoreError};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Deployment state of a model as last observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum ModelReadiness {
    /// Deployed and serving; the only state that allows queries
    Started,
    /// Known to the cluster but not deployed
    Down,
    /// Unknown to the cluster
    NotAvailable,
    /// Any other deployment state reported verbatim (`starting`, `stopping`, ...)
    Other(String),
}

impl ModelReadiness {
    pub fn from_state(state: &str) -> Self {
        match state {
            "started" => Self::Started,
            "down" => Self::Down,
            "na" => Self::NotAvailable,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Started)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Started => "started",
            Self::Down => "down",
            Self::NotAvailable => "na",
            Self::Other(state) => state,
        }
    }
}

impl fmt::Display for ModelReadiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ModelReadiness> for String {
    fn from(readiness: ModelReadiness) -> Self {
        readiness.as_str().to_string()
    }
}

/// Reads a model's deployment state from the cluster on every call
///
/// Nothing is cached: deployment state can change between requests, so each
/// query-serving request checks again.
#[derive(Clone)]
pub struct AvailabilityMonitor {
    models: Arc<dyn ModelService>,
}

impl AvailabilityMonitor {
    pub fn new(models: Arc<dyn ModelService>) -> Self {
        Self { models }
    }

    pub async fn check(&self, model_id: &str) -> Result<ModelReadiness, StoreError> {
        let readiness = match self.models.deployment_state(model_id).await {
            Ok(Some(state)) => ModelReadiness::from_state(&state),
            Ok(None) => ModelReadiness::Down,
            Err(StoreError::ModelNotFound(_)) => ModelReadiness::NotAvailable,
            Err(e) => return Err(e),
        };
        tracing::debug!("Model {} readiness: {}", model_id, readiness);
        Ok(readiness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Known models mapped to their optional deployment state
    struct StubModels(HashMap<String, Option<String>>);

    #[async_trait]
    impl ModelService for StubModels {
        async fn deployment_state(&self, model_id: &str) -> Result<Option<String>, StoreError> {
            self.0
                .get(model_id)
                .cloned()
                .ok_or_else(|| StoreError::ModelNotFound(model_id.to_string()))
        }

        async fn infer_text(&self, model_id: &str, _text: &str) -> Result<Vec<f32>, StoreError> {
            Err(StoreError::ModelNotFound(model_id.to_string()))
        }
    }

    fn monitor() -> AvailabilityMonitor {
        let mut models = HashMap::new();
        models.insert("running".to_string(), Some("started".to_string()));
        models.insert("undeployed".to_string(), None);
        models.insert("warming".to_string(), Some("starting".to_string()));
        AvailabilityMonitor::new(Arc::new(StubModels(models)))
    }

    #[tokio::test]
    async fn test_running_deployment_is_started() {
        let readiness = monitor().check("running").await.unwrap();
        assert_eq!(readiness, ModelReadiness::Started);
        assert!(readiness.is_ready());
    }

    #[tokio::test]
    async fn test_no_deployment_stats_is_down() {
        let readiness = monitor().check("undeployed").await.unwrap();
        assert_eq!(readiness, ModelReadiness::Down);
        assert!(!readiness.is_ready());
    }

    #[tokio::test]
    async fn test_unknown_model_is_na() {
        let readiness = monitor().check("missing").await.unwrap();
        assert_eq!(readiness, ModelReadiness::NotAvailable);
        assert_eq!(readiness.to_string(), "na");
    }

    #[tokio::test]
    async fn test_other_states_recorded_verbatim() {
        let readiness = monitor().check("warming").await.unwrap();
        assert_eq!(readiness, ModelReadiness::Other("starting".to_string()));
        assert_eq!(readiness.as_str(), "starting");
        assert!(!readiness.is_ready());
    }
}

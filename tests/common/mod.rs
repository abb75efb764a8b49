//! Shared test fixtures: an in-memory service wired against a mock
//! downstream bank, plus a classifier stub with fixed output.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;

use tellerflow::banking::{
    banking_graph, BankingClient, Classification, ClassifierError, ExtractedEntities,
    IntentClassifier, RuleClassifier,
};
use tellerflow::config::EngineConfig;
use tellerflow::engine::{Engine, WorkflowService};
use tellerflow::state::Intent;
use tellerflow::store::Stores;

pub struct Harness {
    pub service: Arc<WorkflowService>,
    pub stores: Stores,
    pub config: EngineConfig,
}

pub fn test_config(downstream_base_url: &str) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.downstream.base_url = downstream_base_url.to_string();
    config.downstream.timeout_ms = 2_000;
    config
}

/// Service over in-memory stores with the rule classifier.
pub fn harness(downstream_base_url: &str) -> Harness {
    harness_with_classifier(downstream_base_url, Arc::new(RuleClassifier::new()))
}

/// Service over in-memory stores with a caller-provided classifier.
pub fn harness_with_classifier(
    downstream_base_url: &str,
    classifier: Arc<dyn IntentClassifier>,
) -> Harness {
    let config = test_config(downstream_base_url);
    let stores = Stores::in_memory();
    let client = Arc::new(BankingClient::new(&config.downstream).expect("client"));
    let graph = banking_graph(classifier, client, &stores, &config).expect("graph");
    let engine = Engine::new(Arc::new(graph), stores.clone());
    Harness {
        service: Arc::new(WorkflowService::new(engine, stores.clone(), config.clone())),
        stores,
        config,
    }
}

/// Classifier stub that always returns the same classification.
pub struct FixedClassifier {
    pub intent: Intent,
    pub confidence: f64,
    pub amount: Option<f64>,
    pub recipient: Option<String>,
}

#[async_trait]
impl IntentClassifier for FixedClassifier {
    async fn classify(&self, _message: &str) -> Result<Classification, ClassifierError> {
        Ok(Classification {
            intent: self.intent,
            confidence: self.confidence,
            entities: ExtractedEntities {
                amount: self.amount,
                recipient: self.recipient.clone(),
            },
        })
    }
}

/// Classifier stub that always errors, forcing the rule fallback.
pub struct BrokenClassifier;

#[async_trait]
impl IntentClassifier for BrokenClassifier {
    async fn classify(&self, _message: &str) -> Result<Classification, ClassifierError> {
        Err(ClassifierError::Unavailable("model offline".into()))
    }
}

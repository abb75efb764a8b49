//! Intent classification.
//!
//! The classifier is a plugin: deployments can wire an NL model behind the
//! [`IntentClassifier`] trait, and the engine falls back to the bundled
//! regex rules (at a fixed 0.50 confidence) whenever the primary errors.

use async_trait::async_trait;
use miette::Diagnostic;
use regex::Regex;
use thiserror::Error;

use crate::state::Intent;

/// Slots extracted from the utterance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractedEntities {
    pub amount: Option<f64>,
    pub recipient: Option<String>,
}

/// Classifier output: intent, confidence in `[0, 1]`, extracted entities.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f64,
    pub entities: ExtractedEntities,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    #[diagnostic(
        code(tellerflow::classifier::unavailable),
        help("The engine falls back to rule-based classification; no action needed.")
    )]
    Unavailable(String),
}

/// Pluggable message classifier.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, message: &str) -> Result<Classification, ClassifierError>;
}

/// Keyword/regex rules. Doubles as the default primary classifier and as the
/// fallback when a remote classifier errors.
pub struct RuleClassifier {
    balance: Regex,
    transfer: Regex,
    statement: Regex,
    loan: Regex,
    greeting: Regex,
    amount: Regex,
    recipient: Regex,
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleClassifier {
    #[must_use]
    pub fn new() -> Self {
        // The patterns are fixed at compile time; construction cannot fail.
        Self {
            balance: Regex::new(r"(?i)\b(balance|how much (money|do i have))\b").unwrap(),
            transfer: Regex::new(r"(?i)\b(transfer|send|pay|wire|remit)\b").unwrap(),
            statement: Regex::new(r"(?i)\b(statement|transactions?|account history)\b").unwrap(),
            loan: Regex::new(r"(?i)\b(loan|borrow|emi|interest rate)\b").unwrap(),
            greeting: Regex::new(r"(?i)^\s*(hi|hello|hey|help|thanks|thank you)\b").unwrap(),
            amount: Regex::new(r"(?:₹|\$|rs\.?\s*)?([0-9]+(?:\.[0-9]+)?)").unwrap(),
            recipient: Regex::new(r"(?i)\bto\s+([a-z][a-z0-9_]*)").unwrap(),
        }
    }

    /// Synchronous rule evaluation; used directly on fallback.
    pub fn classify_rules(&self, message: &str) -> Classification {
        let entities = self.extract_entities(message);

        let (intent, confidence) = if self.transfer.is_match(message) {
            (Intent::MoneyTransfer, 0.95)
        } else if self.balance.is_match(message) {
            (Intent::BalanceInquiry, 0.92)
        } else if self.statement.is_match(message) {
            (Intent::AccountStatement, 0.90)
        } else if self.loan.is_match(message) {
            (Intent::LoanInquiry, 0.90)
        } else if self.greeting.is_match(message) {
            (Intent::Fallback, 0.85)
        } else if entities.amount.is_some() {
            // A bare figure carries no intent of its own; the graph decides
            // whether it completes an earlier transfer.
            (Intent::Fallback, 0.60)
        } else {
            (Intent::Fallback, 0.40)
        };

        Classification {
            intent,
            confidence,
            entities,
        }
    }

    fn extract_entities(&self, message: &str) -> ExtractedEntities {
        let amount = self
            .amount
            .captures(message)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .filter(|a| *a >= 0.0);
        let recipient = self
            .recipient
            .captures(message)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        ExtractedEntities { amount, recipient }
    }
}

#[async_trait]
impl IntentClassifier for RuleClassifier {
    async fn classify(&self, message: &str) -> Result<Classification, ClassifierError> {
        Ok(self.classify_rules(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_with_amount_and_recipient() {
        let rules = RuleClassifier::new();
        let c = rules.classify_rules("Transfer 1000 to kiran");
        assert_eq!(c.intent, Intent::MoneyTransfer);
        assert!(c.confidence >= 0.9);
        assert_eq!(c.entities.amount, Some(1000.0));
        assert_eq!(c.entities.recipient.as_deref(), Some("kiran"));
    }

    #[test]
    fn balance_question() {
        let rules = RuleClassifier::new();
        let c = rules.classify_rules("What is my balance?");
        assert_eq!(c.intent, Intent::BalanceInquiry);
        assert!(c.confidence >= 0.9);
    }

    #[test]
    fn transfer_without_amount_keeps_recipient() {
        let rules = RuleClassifier::new();
        let c = rules.classify_rules("send money to kiran");
        assert_eq!(c.intent, Intent::MoneyTransfer);
        assert_eq!(c.entities.amount, None);
        assert_eq!(c.entities.recipient.as_deref(), Some("kiran"));
    }

    #[test]
    fn bare_number_is_low_signal() {
        let rules = RuleClassifier::new();
        let c = rules.classify_rules("1000");
        assert_eq!(c.intent, Intent::Fallback);
        assert_eq!(c.entities.amount, Some(1000.0));
        assert!(c.confidence < 0.8);
    }

    #[test]
    fn gibberish_lands_in_fallback_below_threshold() {
        let rules = RuleClassifier::new();
        let c = rules.classify_rules("wanna check something");
        assert_eq!(c.intent, Intent::Fallback);
        assert!(c.confidence < 0.8);
    }

    #[test]
    fn greeting_is_confident_fallback() {
        let rules = RuleClassifier::new();
        let c = rules.classify_rules("hello there");
        assert_eq!(c.intent, Intent::Fallback);
        assert!(c.confidence >= 0.8);
    }

    #[test]
    fn currency_prefixes_parse() {
        let rules = RuleClassifier::new();
        assert_eq!(
            rules.classify_rules("pay ₹2500 to asha").entities.amount,
            Some(2500.0)
        );
        assert_eq!(
            rules.classify_rules("send $99.50 to bob").entities.amount,
            Some(99.50)
        );
    }
}

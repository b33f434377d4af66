//! EBIOS RM metrics payload and the calculator collaborator interface.
//!
//! The cache never inspects [`EbiosMetrics`]; it is defined here so the
//! composition root and tests share one concrete payload type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::identity::EntityKey;
use crate::Timestamp;

/// Workshop 1: study framing and security baseline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workshop1Metrics {
    pub business_values_count: u32,
    pub supporting_assets_count: u32,
    pub dreaded_events_count: u32,
    pub completion_rate: f64,
    pub conformity_score: f64,
}

/// Workshop 2: risk sources.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workshop2Metrics {
    pub risk_sources_count: u32,
    pub threat_actors_identified: u32,
    pub attack_methods_count: u32,
    pub completion_rate: f64,
    pub mitre_attack_coverage: f64,
    pub conformity_score: f64,
}

/// Workshop 3: strategic scenarios.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workshop3Metrics {
    pub strategic_scenarios_count: u32,
    pub operational_scenarios_count: u32,
    /// Scenario count per risk level (`low`, `medium`, `high`, `critical`).
    pub risk_level_distribution: BTreeMap<String, u32>,
    pub completion_rate: f64,
    pub conformity_score: f64,
}

/// Workshop 4: operational scenarios.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workshop4Metrics {
    pub operational_scenarios_count: u32,
    pub attack_paths_count: u32,
    pub vulnerabilities_identified: u32,
    pub completion_rate: f64,
    pub technical_depth: f64,
    pub conformity_score: f64,
}

/// Workshop 5: risk treatment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workshop5Metrics {
    pub security_measures_count: u32,
    pub residual_risk_level: f64,
    pub treatment_coverage: f64,
    pub implementation_cost: f64,
    pub completion_rate: f64,
    pub conformity_score: f64,
}

/// Study-wide aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalMetrics {
    pub overall_completion_rate: f64,
    pub anssi_compliance_score: f64,
    pub risk_maturity_level: u8,
    pub last_calculation: Timestamp,
    pub data_quality_score: f64,
}

/// Full metrics object computed for one mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EbiosMetrics {
    pub workshop1: Workshop1Metrics,
    pub workshop2: Workshop2Metrics,
    pub workshop3: Workshop3Metrics,
    pub workshop4: Workshop4Metrics,
    pub workshop5: Workshop5Metrics,
    pub global: GlobalMetrics,
}

/// External calculator that turns stored records into a metrics object.
///
/// Implementations usually read from the document store and may be slow.
/// The cache only ever calls [`MetricsCalculator::compute`] on a miss.
#[async_trait]
pub trait MetricsCalculator<V, E>: Send + Sync {
    /// Compute the metrics for one entity.
    async fn compute(&self, key: &EntityKey) -> Result<V, E>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EbiosMetrics {
        EbiosMetrics {
            workshop1: Workshop1Metrics {
                business_values_count: 5,
                supporting_assets_count: 8,
                dreaded_events_count: 3,
                completion_rate: 75.0,
                conformity_score: 80.0,
            },
            workshop2: Workshop2Metrics::default(),
            workshop3: Workshop3Metrics::default(),
            workshop4: Workshop4Metrics::default(),
            workshop5: Workshop5Metrics::default(),
            global: GlobalMetrics {
                overall_completion_rate: 61.0,
                anssi_compliance_score: 69.0,
                risk_maturity_level: 3,
                last_calculation: chrono::Utc::now(),
                data_quality_score: 72.0,
            },
        }
    }

    #[test]
    fn test_metrics_json_uses_camel_case_fields() {
        let json = serde_json::to_value(sample()).expect("serialize metrics");
        assert_eq!(json["workshop1"]["businessValuesCount"], 5);
        assert_eq!(json["global"]["riskMaturityLevel"], 3);
    }

    struct Fixed;

    #[async_trait]
    impl MetricsCalculator<u32, String> for Fixed {
        async fn compute(&self, key: &EntityKey) -> Result<u32, String> {
            Ok(key.as_str().len() as u32)
        }
    }

    #[tokio::test]
    async fn test_calculator_trait_object() {
        let calc: Box<dyn MetricsCalculator<u32, String>> = Box::new(Fixed);
        let key = EntityKey::new("abc").expect("valid key");
        assert_eq!(calc.compute(&key).await, Ok(3));
    }
}

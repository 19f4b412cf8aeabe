use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::CacheName;

/// The readiness of a single cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(self) -> bool {
        self == Self::Healthy
    }
}

/// The aggregated readiness of all registered caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub caches: BTreeMap<String, HealthStatus>,
}

impl HealthReport {
    pub fn from_caches(caches: impl IntoIterator<Item = (CacheName, HealthStatus)>) -> Self {
        let caches: BTreeMap<_, _> = caches
            .into_iter()
            .map(|(name, status)| (name.to_string(), status))
            .collect();

        let status = if caches.values().all(|status| status.is_healthy()) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        Self { status, caches }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report() {
        let report = HealthReport::from_caches([]);
        assert_eq!(report.status, HealthStatus::Healthy);

        let report = HealthReport::from_caches([
            (CacheName::Profiles, HealthStatus::Healthy),
            (CacheName::VariantDescriptionList, HealthStatus::Unhealthy),
        ]);
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(
            report.caches.get("variant_description_list"),
            Some(&HealthStatus::Unhealthy)
        );

        let yaml = serde_yaml::to_string(&report.status).unwrap();
        assert_eq!(yaml.trim(), "unhealthy");
    }
}

//! Admit Device Use Case
//!
//! Runs on login and heartbeat: validate the fingerprint, run the VM
//! heuristic, score the risk and apply the auto-flag table. Every negative
//! signal is appended to the record's risk-event trail.

use crate::application::bounded;
use crate::application::config::LoaderConfig;
use crate::application::fingerprint::DeviceFingerprintEngine;
use crate::application::risk_scoring::{RiskContext, RiskScoringEngine};
use crate::domain::repository::{
    DeviceRecordRepository, LoginLogRepository, RiskEventRepository,
};
use crate::domain::services::RiskFactor;
use crate::domain::value_objects::{
    AutoFlagAction, FingerprintComponents, RiskEventType, RiskScore, SimilarityScore,
};
use crate::error::LoaderResult;
use kernel::id::DeviceRecordId;
use serde::Serialize;
use serde_json::json;
use std::net::IpAddr;
use std::sync::Arc;

/// Severity recorded for a VM sighting
const VM_EVENT_SEVERITY: u8 = 40;
const GEO_EVENT_SEVERITY: u8 = 15;

/// Input DTO for admission
#[derive(Debug, Clone)]
pub struct AdmitDeviceInput {
    pub user_id: String,
    pub license_id: String,
    pub components: FingerprintComponents,
    pub source_ip: Option<IpAddr>,
    pub geo_location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdmissionDecision {
    Admit,
    /// Admitted, but the record is flagged and the caller should act on `action`
    Challenge,
    /// Fingerprint outside tolerance
    Deny,
}

/// Output DTO for admission
#[derive(Debug, Clone)]
pub struct AdmitDeviceOutput {
    pub decision: AdmissionDecision,
    pub device_record_id: DeviceRecordId,
    pub similarity: SimilarityScore,
    pub risk_score: RiskScore,
    pub action: AutoFlagAction,
    pub vm_type: Option<&'static str>,
}

pub struct AdmitDeviceUseCase<D, E, L>
where
    D: DeviceRecordRepository,
    E: RiskEventRepository,
    L: LoginLogRepository,
{
    devices: Arc<D>,
    fingerprints: DeviceFingerprintEngine<D>,
    risk: RiskScoringEngine<D, E, L>,
    config: Arc<LoaderConfig>,
}

impl<D, E, L> AdmitDeviceUseCase<D, E, L>
where
    D: DeviceRecordRepository,
    E: RiskEventRepository,
    L: LoginLogRepository,
{
    pub fn new(
        devices: Arc<D>,
        fingerprints: DeviceFingerprintEngine<D>,
        risk: RiskScoringEngine<D, E, L>,
        config: Arc<LoaderConfig>,
    ) -> Self {
        Self {
            devices,
            fingerprints,
            risk,
            config,
        }
    }

    pub fn fingerprints(&self) -> &DeviceFingerprintEngine<D> {
        &self.fingerprints
    }

    pub fn risk(&self) -> &RiskScoringEngine<D, E, L> {
        &self.risk
    }

    pub async fn execute(&self, input: AdmitDeviceInput) -> LoaderResult<AdmitDeviceOutput> {
        let validation = self
            .fingerprints
            .validate_fingerprint(&input.user_id, &input.license_id, input.components.clone())
            .await?;
        let record_id = validation.record.id;

        let vm = self.fingerprints.detect_virtual_machine(&input.components);

        let assessment = self
            .risk
            .assess(&RiskContext {
                user_id: &input.user_id,
                license_id: &input.license_id,
                components: &input.components,
                source_ip: input.source_ip,
                geo_location: input.geo_location.as_deref(),
            })
            .await?;

        // This call's own events are appended after scoring and count from
        // the next admission on
        if !validation.valid {
            let severity = (100.0 - validation.similarity.value()).round() as u8;
            self.risk
                .create_risk_event(
                    record_id,
                    RiskEventType::HwidMismatch,
                    severity,
                    format!(
                        "Fingerprint similarity {}% below threshold",
                        validation.similarity
                    ),
                    Some(json!({
                        "similarity": validation.similarity.value(),
                        "threshold": self.config.similarity_threshold,
                    })),
                )
                .await?;
        }

        if let Some(vm_type) = vm.vm_type {
            self.risk
                .create_risk_event(
                    record_id,
                    RiskEventType::VmDetected,
                    VM_EVENT_SEVERITY,
                    format!("Virtual machine detected: {vm_type}"),
                    Some(json!({ "vmType": vm_type })),
                )
                .await?;
        }

        if assessment
            .factors
            .iter()
            .any(|(factor, _)| *factor == RiskFactor::GeoVelocity)
        {
            self.risk
                .create_risk_event(
                    record_id,
                    RiskEventType::GeoAnomaly,
                    GEO_EVENT_SEVERITY,
                    "Rapid location changes across recent logins",
                    Some(json!({
                        "locations": assessment.signals.distinct_recent_locations,
                        "current": input.geo_location,
                    })),
                )
                .await?;
        }

        bounded(
            self.config.store_timeout,
            "device.record_risk_score",
            self.devices.record_risk_score(record_id, assessment.score),
        )
        .await?;

        let flag = self.risk.check_auto_flag(assessment.score);
        if flag.should_flag {
            self.fingerprints
                .flag_device(record_id, flag.action.as_str())
                .await?;
        }
        // One AUTO_FLAGGED entry per transition into the flagged state
        if flag.should_flag && !validation.record.is_flagged {
            self.risk
                .create_risk_event(
                    record_id,
                    RiskEventType::AutoFlagged,
                    assessment.score.value(),
                    format!("Auto-flagged: {}", flag.action.as_str()),
                    Some(json!({
                        "score": assessment.score.value(),
                        "action": flag.action,
                    })),
                )
                .await?;
        }

        let decision = if !validation.valid {
            AdmissionDecision::Deny
        } else if flag.should_flag {
            AdmissionDecision::Challenge
        } else {
            AdmissionDecision::Admit
        };

        tracing::info!(
            device_record_id = %record_id,
            user_id = %input.user_id,
            decision = ?decision,
            similarity = %validation.similarity,
            score = assessment.score.value(),
            action = flag.action.as_str(),
            "Device admission decided"
        );

        Ok(AdmitDeviceOutput {
            decision,
            device_record_id: record_id,
            similarity: validation.similarity,
            risk_score: assessment.score,
            action: flag.action,
            vm_type: vm.vm_type,
        })
    }
}

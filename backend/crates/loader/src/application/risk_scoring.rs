//! Risk Scoring Engine
//!
//! Gathers the signals for the additive risk model from the stores and logs,
//! then evaluates the ordered rule table.

use crate::application::bounded;
use crate::application::config::LoaderConfig;
use crate::domain::entities::RiskEvent;
use crate::domain::repository::{
    DeviceRecordRepository, LoginLogRepository, RiskEventRepository,
};
use crate::domain::services::{self, RiskFactor, RiskSignals};
use crate::domain::value_objects::{
    AutoFlagDecision, FingerprintComponents, RiskEventType, RiskScore,
};
use crate::error::LoaderResult;
use chrono::Utc;
use kernel::id::DeviceRecordId;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

/// Input DTO for risk computation
#[derive(Debug, Clone)]
pub struct RiskContext<'a> {
    pub user_id: &'a str,
    pub license_id: &'a str,
    pub components: &'a FingerprintComponents,
    pub source_ip: Option<IpAddr>,
    pub geo_location: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub score: RiskScore,
    pub signals: RiskSignals,
    /// Factors that contributed, in table order
    pub factors: Vec<(RiskFactor, u32)>,
}

pub struct RiskScoringEngine<D, E, L>
where
    D: DeviceRecordRepository,
    E: RiskEventRepository,
    L: LoginLogRepository,
{
    devices: Arc<D>,
    events: Arc<E>,
    logins: Arc<L>,
    config: Arc<LoaderConfig>,
}

impl<D, E, L> RiskScoringEngine<D, E, L>
where
    D: DeviceRecordRepository,
    E: RiskEventRepository,
    L: LoginLogRepository,
{
    pub fn new(devices: Arc<D>, events: Arc<E>, logins: Arc<L>, config: Arc<LoaderConfig>) -> Self {
        Self {
            devices,
            events,
            logins,
            config,
        }
    }

    pub async fn compute_risk_score(&self, ctx: &RiskContext<'_>) -> LoaderResult<RiskScore> {
        Ok(self.assess(ctx).await?.score)
    }

    /// Score plus the signals and factors behind it
    pub async fn assess(&self, ctx: &RiskContext<'_>) -> LoaderResult<RiskAssessment> {
        let timeout = self.config.store_timeout;
        let now_ms = Utc::now().timestamp_millis();

        let record = bounded(
            timeout,
            "device.find",
            self.devices.find(ctx.user_id, ctx.license_id),
        )
        .await?;
        let device_count = bounded(
            timeout,
            "device.count",
            self.devices.count(ctx.user_id, ctx.license_id),
        )
        .await?;

        let distinct_recent_locations = match ctx.geo_location {
            Some(_) => {
                let locations = bounded(
                    timeout,
                    "login.recent_locations",
                    self.logins.recent_locations(
                        ctx.user_id,
                        now_ms - self.config.geo_window_ms(),
                        self.config.geo_sample_size,
                    ),
                )
                .await?;
                let distinct: HashSet<&str> = locations
                    .iter()
                    .filter_map(|l| l.as_deref())
                    .filter(|l| !l.is_empty())
                    .collect();
                Some(distinct.len())
            }
            None => None,
        };

        let recent_risk_events = bounded(
            timeout,
            "risk_event.count",
            self.events.count_since(
                ctx.user_id,
                ctx.license_id,
                now_ms - self.config.risk_event_window_ms(),
            ),
        )
        .await?;

        let signals = RiskSignals {
            change_count: record.map(|r| r.change_count).unwrap_or(0),
            is_vm: services::detect_virtual_machine(ctx.components).is_vm,
            device_count,
            distinct_recent_locations,
            recent_risk_events,
        };
        let score = services::score(&signals);
        let factors = services::risk_breakdown(&signals);

        tracing::info!(
            user_id = %ctx.user_id,
            source_ip = ?ctx.source_ip,
            score = score.value(),
            factors = ?factors.iter().map(|(f, _)| f.as_str()).collect::<Vec<_>>(),
            "Risk score computed"
        );

        Ok(RiskAssessment {
            score,
            signals,
            factors,
        })
    }

    pub fn check_auto_flag(&self, score: RiskScore) -> AutoFlagDecision {
        services::check_auto_flag(score)
    }

    /// Append a risk event to the record's audit trail
    pub async fn create_risk_event(
        &self,
        device_record_id: DeviceRecordId,
        event_type: RiskEventType,
        severity: u8,
        description: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> LoaderResult<RiskEvent> {
        let event = RiskEvent::new(device_record_id, event_type, severity, description, metadata);
        bounded(
            self.config.store_timeout,
            "risk_event.append",
            self.events.append(&event),
        )
        .await?;
        tracing::info!(
            device_record_id = %device_record_id,
            event_type = event_type.as_str(),
            severity,
            "Risk event recorded"
        );
        Ok(event)
    }
}

//! Device Fingerprint Engine
//!
//! Composite hashing, tolerant matching against the stored observation and
//! the VM heuristic.

use crate::application::bounded;
use crate::application::config::LoaderConfig;
use crate::domain::entities::DeviceRecord;
use crate::domain::repository::DeviceRecordRepository;
use crate::domain::services;
use crate::domain::value_objects::{FingerprintComponents, SimilarityScore, VmDetection};
use crate::error::LoaderResult;
use kernel::id::DeviceRecordId;
use platform::crypto::CryptoProvider;
use std::sync::Arc;

/// Outcome of validating one observation
#[derive(Debug, Clone)]
pub struct FingerprintValidation {
    pub valid: bool,
    pub similarity: SimilarityScore,
    /// Stored record after the call (unchanged when `valid` is false)
    pub record: DeviceRecord,
    pub first_sighting: bool,
}

pub struct DeviceFingerprintEngine<D>
where
    D: DeviceRecordRepository,
{
    devices: Arc<D>,
    crypto: Arc<CryptoProvider>,
    config: Arc<LoaderConfig>,
}

impl<D> DeviceFingerprintEngine<D>
where
    D: DeviceRecordRepository,
{
    pub fn new(devices: Arc<D>, crypto: Arc<CryptoProvider>, config: Arc<LoaderConfig>) -> Self {
        Self {
            devices,
            crypto,
            config,
        }
    }

    /// SHA-256 hex of the canonical field tuple
    pub fn composite_fingerprint(&self, components: &FingerprintComponents) -> String {
        self.crypto
            .sha256_hex(components.canonical_string().as_bytes())
    }

    pub fn similarity(
        &self,
        a: &FingerprintComponents,
        b: &FingerprintComponents,
    ) -> SimilarityScore {
        services::similarity(a, b)
    }

    pub fn detect_virtual_machine(&self, components: &FingerprintComponents) -> VmDetection {
        services::detect_virtual_machine(components)
    }

    /// Match a new observation against the pair's stored record
    ///
    /// A first sighting creates the record with full trust, exactly once even
    /// when sightings race. Otherwise the observation is accepted iff
    /// similarity reaches the configured threshold; only an accepted
    /// observation touches the record.
    pub async fn validate_fingerprint(
        &self,
        user_id: &str,
        license_id: &str,
        components: FingerprintComponents,
    ) -> LoaderResult<FingerprintValidation> {
        let composite = self.composite_fingerprint(&components);
        let timeout = self.config.store_timeout;

        let candidate = DeviceRecord::first_sighting(
            user_id,
            license_id,
            components.clone(),
            composite.clone(),
        );
        let (mut record, created) = bounded(
            timeout,
            "device.find_or_create",
            self.devices.find_or_create(&candidate),
        )
        .await?;

        if created {
            tracing::info!(
                device_record_id = %record.id,
                user_id = %user_id,
                "First sighting of device"
            );
            return Ok(FingerprintValidation {
                valid: true,
                similarity: SimilarityScore::EXACT,
                record,
                first_sighting: true,
            });
        }

        let similarity = services::similarity(&record.components, &components);
        if similarity.value() < self.config.similarity_threshold {
            tracing::warn!(
                device_record_id = %record.id,
                similarity = %similarity,
                threshold = self.config.similarity_threshold,
                "Fingerprint outside tolerance"
            );
            return Ok(FingerprintValidation {
                valid: false,
                similarity,
                record,
                first_sighting: false,
            });
        }

        record.apply_observation(components, composite, !similarity.is_exact());
        bounded(timeout, "device.update", self.devices.update(&record)).await?;

        tracing::debug!(
            device_record_id = %record.id,
            similarity = %similarity,
            change_count = record.change_count,
            "Fingerprint accepted"
        );

        Ok(FingerprintValidation {
            valid: true,
            similarity,
            record,
            first_sighting: false,
        })
    }

    /// Mark a record for manual review. Returns false for an unknown record.
    pub async fn flag_device(&self, record_id: DeviceRecordId, reason: &str) -> LoaderResult<bool> {
        let flagged = bounded(
            self.config.store_timeout,
            "device.flag",
            self.devices.set_flag(record_id, reason),
        )
        .await?;
        if flagged {
            tracing::info!(device_record_id = %record_id, reason = %reason, "Device flagged");
        }
        Ok(flagged)
    }
}

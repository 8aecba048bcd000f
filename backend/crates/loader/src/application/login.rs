//! Login Use Case
//!
//! Credentials go to the license authority with the device's composite
//! fingerprint as HWID. The attempt is logged either way; an accepted login
//! then passes through device admission.

use crate::application::admit_device::{AdmitDeviceInput, AdmitDeviceOutput, AdmitDeviceUseCase};
use crate::application::bounded;
use crate::application::config::LoaderConfig;
use crate::domain::entities::LoginAttempt;
use crate::domain::repository::{
    AuthorityVerdict, DeviceRecordRepository, LicenseAuthority, LoginLogRepository,
    RiskEventRepository,
};
use crate::domain::value_objects::FingerprintComponents;
use crate::error::{LoaderError, LoaderResult};
use std::net::IpAddr;
use std::sync::Arc;

/// Input DTO for login
#[derive(Debug, Clone)]
pub struct LoginInput {
    pub username: String,
    pub password: String,
    pub components: FingerprintComponents,
    pub source_ip: Option<IpAddr>,
    pub geo_location: Option<String>,
    pub user_agent: Option<String>,
}

/// Output DTO for login
#[derive(Debug, Clone)]
pub struct LoginOutput {
    pub user_id: String,
    pub license_id: String,
    pub admission: AdmitDeviceOutput,
}

pub struct LoginUseCase<A, D, E, L>
where
    A: LicenseAuthority,
    D: DeviceRecordRepository,
    E: RiskEventRepository,
    L: LoginLogRepository,
{
    authority: Arc<A>,
    logins: Arc<L>,
    admit: Arc<AdmitDeviceUseCase<D, E, L>>,
    config: Arc<LoaderConfig>,
}

impl<A, D, E, L> LoginUseCase<A, D, E, L>
where
    A: LicenseAuthority,
    D: DeviceRecordRepository,
    E: RiskEventRepository,
    L: LoginLogRepository,
{
    pub fn new(
        authority: Arc<A>,
        logins: Arc<L>,
        admit: Arc<AdmitDeviceUseCase<D, E, L>>,
        config: Arc<LoaderConfig>,
    ) -> Self {
        Self {
            authority,
            logins,
            admit,
            config,
        }
    }

    pub async fn execute(&self, input: LoginInput) -> LoaderResult<LoginOutput> {
        let hwid = self
            .admit
            .fingerprints()
            .composite_fingerprint(&input.components);

        let verdict = bounded(
            self.config.authority_timeout,
            "authority.verify",
            self.authority.verify(&input.username, &input.password, &hwid),
        )
        .await?;

        let attempt = LoginAttempt::new(
            verdict.user_id.clone(),
            input.username.as_str(),
            verdict.success,
            input.source_ip,
            input.geo_location.clone(),
            input.user_agent.clone(),
        );
        bounded(
            self.config.store_timeout,
            "login.record",
            self.logins.record(&attempt),
        )
        .await?;

        if !verdict.success {
            tracing::info!(username = %input.username, "Login rejected by license authority");
            return Err(LoaderError::CredentialsRejected(verdict.message));
        }

        let user_id = verdict.user_id.unwrap_or_else(|| input.username.clone());
        let license_id = verdict.license_id.unwrap_or_default();

        let admission = self
            .admit
            .execute(AdmitDeviceInput {
                user_id: user_id.clone(),
                license_id: license_id.clone(),
                components: input.components,
                source_ip: input.source_ip,
                geo_location: input.geo_location,
            })
            .await?;

        Ok(LoginOutput {
            user_id,
            license_id,
            admission,
        })
    }

    /// Check a license key bound to this device
    pub async fn activate_license(
        &self,
        license_key: &str,
        components: &FingerprintComponents,
    ) -> LoaderResult<AuthorityVerdict> {
        let hwid = self.admit.fingerprints().composite_fingerprint(components);
        let verdict = bounded(
            self.config.authority_timeout,
            "authority.verify_license",
            self.authority.verify_license(license_key, &hwid),
        )
        .await?;

        if !verdict.success {
            return Err(LoaderError::CredentialsRejected(verdict.message));
        }
        tracing::info!(hwid = %hwid, "License activated");
        Ok(verdict)
    }
}

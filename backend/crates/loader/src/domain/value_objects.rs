//! Domain Value Objects
//!
//! Immutable value types for the device-trust domain.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hardware identifiers reported by the loader client
///
/// Every field is optional; a missing field is treated exactly like an empty
/// string everywhere in the domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintComponents {
    #[serde(default)]
    pub cpu_id: Option<String>,
    #[serde(default)]
    pub disk_serial: Option<String>,
    #[serde(default)]
    pub mac_hash: Option<String>,
    #[serde(default)]
    pub bios_hash: Option<String>,
    #[serde(default)]
    pub os_hash: Option<String>,
}

impl FingerprintComponents {
    /// Separator of the canonical tuple
    pub const SEPARATOR: &'static str = "|";

    /// Fields in canonical order: cpuId, diskSerial, macHash, biosHash, osHash
    pub fn fields(&self) -> [&str; 5] {
        [
            self.cpu_id.as_deref().unwrap_or(""),
            self.disk_serial.as_deref().unwrap_or(""),
            self.mac_hash.as_deref().unwrap_or(""),
            self.bios_hash.as_deref().unwrap_or(""),
            self.os_hash.as_deref().unwrap_or(""),
        ]
    }

    /// Canonical pre-image of the composite fingerprint
    pub fn canonical_string(&self) -> String {
        self.fields().join(Self::SEPARATOR)
    }

    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|f| f.is_empty())
    }
}

/// Fingerprint similarity in percent, always within [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct SimilarityScore(f64);

impl SimilarityScore {
    pub const ZERO: SimilarityScore = SimilarityScore(0.0);
    pub const EXACT: SimilarityScore = SimilarityScore(100.0);

    pub fn new(percent: f64) -> Self {
        if percent.is_nan() {
            return Self::ZERO;
        }
        Self(percent.clamp(0.0, 100.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn is_exact(&self) -> bool {
        self.0 >= 100.0
    }
}

impl fmt::Display for SimilarityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Abuse risk score, always within [0, 100]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RiskScore(u8);

impl RiskScore {
    pub const MAX: u8 = 100;

    /// Clamp a raw factor sum into range
    pub fn from_raw(raw: u32) -> Self {
        Self(raw.min(Self::MAX as u32) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl From<RiskScore> for u8 {
    fn from(score: RiskScore) -> Self {
        score.0
    }
}

/// Result of the virtual-machine heuristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VmDetection {
    #[serde(rename = "isVM")]
    pub is_vm: bool,
    #[serde(rename = "vmType", skip_serializing_if = "Option::is_none")]
    pub vm_type: Option<&'static str>,
}

impl VmDetection {
    pub const NONE: VmDetection = VmDetection {
        is_vm: false,
        vm_type: None,
    };

    pub fn matched(signature: &'static str) -> Self {
        Self {
            is_vm: true,
            vm_type: Some(signature),
        }
    }
}

/// Action recommended by the auto-flag decision table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutoFlagAction {
    None,
    FlagForReview,
    ShadowBan,
}

impl AutoFlagAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoFlagAction::None => "NONE",
            AutoFlagAction::FlagForReview => "FLAG_FOR_REVIEW",
            AutoFlagAction::ShadowBan => "SHADOW_BAN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoFlagDecision {
    pub should_flag: bool,
    pub action: AutoFlagAction,
}

/// Kind of an appended risk event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskEventType {
    HwidMismatch,
    VmDetected,
    GeoAnomaly,
    AutoFlagged,
}

impl RiskEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskEventType::HwidMismatch => "HWID_MISMATCH",
            RiskEventType::VmDetected => "VM_DETECTED",
            RiskEventType::GeoAnomaly => "GEO_ANOMALY",
            RiskEventType::AutoFlagged => "AUTO_FLAGGED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_are_empty() {
        let components = FingerprintComponents {
            disk_serial: Some("WD-123".into()),
            ..Default::default()
        };
        assert_eq!(components.fields(), ["", "WD-123", "", "", ""]);
        assert_eq!(components.canonical_string(), "|WD-123|||");
        assert!(!components.is_empty());
        assert!(FingerprintComponents::default().is_empty());
    }

    #[test]
    fn test_components_deserialize_camel_case() {
        let json = r#"{"cpuId":"BFEBFBFF000906EA","biosHash":"abc"}"#;
        let components: FingerprintComponents = serde_json::from_str(json).unwrap();
        assert_eq!(components.cpu_id.as_deref(), Some("BFEBFBFF000906EA"));
        assert_eq!(components.bios_hash.as_deref(), Some("abc"));
        assert!(components.os_hash.is_none());
    }

    #[test]
    fn test_scores_are_clamped() {
        assert_eq!(RiskScore::from_raw(130).value(), 100);
        assert_eq!(RiskScore::from_raw(55).value(), 55);
        assert_eq!(SimilarityScore::new(140.0), SimilarityScore::EXACT);
        assert_eq!(SimilarityScore::new(-1.0), SimilarityScore::ZERO);
        assert_eq!(SimilarityScore::new(f64::NAN), SimilarityScore::ZERO);
    }

    #[test]
    fn test_vm_detection_serialization() {
        let json = serde_json::to_string(&VmDetection::matched("VMWARE")).unwrap();
        assert_eq!(json, r#"{"isVM":true,"vmType":"VMWARE"}"#);

        let json = serde_json::to_string(&VmDetection::NONE).unwrap();
        assert_eq!(json, r#"{"isVM":false}"#);
    }

    #[test]
    fn test_auto_flag_serialization() {
        let decision = AutoFlagDecision {
            should_flag: true,
            action: AutoFlagAction::FlagForReview,
        };
        let json = serde_json::to_string(&decision).unwrap();
        assert_eq!(json, r#"{"shouldFlag":true,"action":"FLAG_FOR_REVIEW"}"#);
    }
}

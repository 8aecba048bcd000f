//! Domain Services
//!
//! Pure domain logic: fingerprint similarity, the VM heuristic, the additive
//! risk model and the auto-flag decision table.

use crate::domain::value_objects::{
    AutoFlagAction, AutoFlagDecision, FingerprintComponents, RiskScore, SimilarityScore,
    VmDetection,
};

/// Field-wise similarity of two observations, in percent
///
/// A field is comparable when either side carries a value. Nothing comparable
/// means nothing matched, so the result is 0 rather than 100.
pub fn similarity(a: &FingerprintComponents, b: &FingerprintComponents) -> SimilarityScore {
    let mut comparable = 0u32;
    let mut matches = 0u32;

    for (left, right) in a.fields().iter().zip(b.fields().iter()) {
        if left.is_empty() && right.is_empty() {
            continue;
        }
        comparable += 1;
        if left == right {
            matches += 1;
        }
    }

    if comparable == 0 {
        return SimilarityScore::ZERO;
    }
    SimilarityScore::new(f64::from(matches) / f64::from(comparable) * 100.0)
}

/// Hypervisor vendor markers, checked in this order
pub const VM_SIGNATURES: [&str; 8] = [
    "VMWARE",
    "VBOX",
    "VIRTUALBOX",
    "KVM",
    "QEMU",
    "XEN",
    "HYPER-V",
    "PARALLELS",
];

/// Case-insensitive scan of all component values for a hypervisor marker
pub fn detect_virtual_machine(components: &FingerprintComponents) -> VmDetection {
    let haystack = components.canonical_string().to_uppercase();
    VM_SIGNATURES
        .iter()
        .copied()
        .find(|sig| haystack.contains(sig))
        .map(VmDetection::matched)
        .unwrap_or(VmDetection::NONE)
}

/// Observed inputs to the risk model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RiskSignals {
    pub change_count: u32,
    pub is_vm: bool,
    /// Device records held by this user+license pair
    pub device_count: u64,
    /// Distinct non-empty locations among recent logins; `None` when the
    /// caller supplied no geo location
    pub distinct_recent_locations: Option<usize>,
    /// Risk events recorded in the lookback window
    pub recent_risk_events: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskFactor {
    FrequentChanges,
    ModerateChanges,
    VirtualMachine,
    DeviceMultiplicity,
    GeoVelocity,
    PriorRiskEvents,
}

impl RiskFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFactor::FrequentChanges => "frequent_changes",
            RiskFactor::ModerateChanges => "moderate_changes",
            RiskFactor::VirtualMachine => "virtual_machine",
            RiskFactor::DeviceMultiplicity => "device_multiplicity",
            RiskFactor::GeoVelocity => "geo_velocity",
            RiskFactor::PriorRiskEvents => "prior_risk_events",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weight {
    Fixed(u32),
    /// `points` per recent risk event, never more than `cap`
    PerEvent { points: u32, cap: u32 },
}

/// One row of the risk table
#[derive(Debug, Clone, Copy)]
pub struct RiskRule {
    pub factor: RiskFactor,
    pub applies: fn(&RiskSignals) -> bool,
    pub weight: Weight,
}

impl RiskRule {
    /// Points this rule contributes for `signals` (0 when it does not apply)
    pub fn contribution(&self, signals: &RiskSignals) -> u32 {
        if !(self.applies)(signals) {
            return 0;
        }
        match self.weight {
            Weight::Fixed(points) => points,
            Weight::PerEvent { points, cap } => {
                let events = u32::try_from(signals.recent_risk_events).unwrap_or(u32::MAX);
                events.saturating_mul(points).min(cap)
            }
        }
    }
}

pub const FREQUENT_CHANGE_THRESHOLD: u32 = 5;
pub const MODERATE_CHANGE_THRESHOLD: u32 = 2;
pub const DEVICE_COUNT_THRESHOLD: u64 = 3;
pub const DISTINCT_LOCATION_THRESHOLD: usize = 3;

/// The additive risk model, evaluated top to bottom
///
/// The two change-frequency brackets are mutually exclusive.
pub const RISK_RULES: [RiskRule; 6] = [
    RiskRule {
        factor: RiskFactor::FrequentChanges,
        applies: |s| s.change_count > FREQUENT_CHANGE_THRESHOLD,
        weight: Weight::Fixed(30),
    },
    RiskRule {
        factor: RiskFactor::ModerateChanges,
        applies: |s| {
            s.change_count > MODERATE_CHANGE_THRESHOLD
                && s.change_count <= FREQUENT_CHANGE_THRESHOLD
        },
        weight: Weight::Fixed(15),
    },
    RiskRule {
        factor: RiskFactor::VirtualMachine,
        applies: |s| s.is_vm,
        weight: Weight::Fixed(40),
    },
    RiskRule {
        factor: RiskFactor::DeviceMultiplicity,
        applies: |s| s.device_count > DEVICE_COUNT_THRESHOLD,
        weight: Weight::Fixed(20),
    },
    RiskRule {
        factor: RiskFactor::GeoVelocity,
        applies: |s| {
            s.distinct_recent_locations
                .is_some_and(|n| n > DISTINCT_LOCATION_THRESHOLD)
        },
        weight: Weight::Fixed(15),
    },
    RiskRule {
        factor: RiskFactor::PriorRiskEvents,
        applies: |s| s.recent_risk_events > 0,
        weight: Weight::PerEvent { points: 5, cap: 25 },
    },
];

/// Factors that fired, with their points
pub fn risk_breakdown(signals: &RiskSignals) -> Vec<(RiskFactor, u32)> {
    RISK_RULES
        .iter()
        .map(|rule| (rule.factor, rule.contribution(signals)))
        .filter(|(_, points)| *points > 0)
        .collect()
}

/// Sum every applicable factor and clamp into [0, 100]
pub fn score(signals: &RiskSignals) -> RiskScore {
    let raw: u32 = RISK_RULES.iter().map(|r| r.contribution(signals)).sum();
    RiskScore::from_raw(raw)
}

pub const SHADOW_BAN_THRESHOLD: u8 = 80;
pub const REVIEW_THRESHOLD: u8 = 60;

pub fn check_auto_flag(score: RiskScore) -> AutoFlagDecision {
    let action = match score.value() {
        s if s >= SHADOW_BAN_THRESHOLD => AutoFlagAction::ShadowBan,
        s if s >= REVIEW_THRESHOLD => AutoFlagAction::FlagForReview,
        _ => AutoFlagAction::None,
    };
    AutoFlagDecision {
        should_flag: action != AutoFlagAction::None,
        action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn components(cpu: &str, disk: &str, mac: &str, bios: &str, os: &str) -> FingerprintComponents {
        let opt = |v: &str| (!v.is_empty()).then(|| v.to_string());
        FingerprintComponents {
            cpu_id: opt(cpu),
            disk_serial: opt(disk),
            mac_hash: opt(mac),
            bios_hash: opt(bios),
            os_hash: opt(os),
        }
    }

    #[test]
    fn test_similarity_identical() {
        let a = components("cpu", "disk", "mac", "bios", "os");
        assert_eq!(similarity(&a, &a), SimilarityScore::EXACT);

        let sparse = components("cpu", "", "", "", "");
        assert_eq!(similarity(&sparse, &sparse), SimilarityScore::EXACT);
    }

    #[test]
    fn test_similarity_nothing_comparable_is_zero() {
        let empty = FingerprintComponents::default();
        assert_eq!(similarity(&empty, &empty), SimilarityScore::ZERO);
    }

    #[test]
    fn test_similarity_partial() {
        let a = components("cpu", "disk", "mac", "bios", "os");
        let b = components("cpu", "disk", "mac", "other", "other");
        assert_eq!(similarity(&a, &b).value(), 60.0);

        // One-sided field still counts as comparable
        let c = components("cpu", "disk", "mac", "bios", "");
        assert_eq!(similarity(&a, &c).value(), 80.0);
    }

    #[test]
    fn test_detect_vm() {
        let vm = components("", "", "", "VMWARE7,1", "");
        assert_eq!(detect_virtual_machine(&vm), VmDetection::matched("VMWARE"));

        let host = components("GenuineIntel", "", "", "", "");
        assert_eq!(detect_virtual_machine(&host), VmDetection::NONE);
    }

    #[test]
    fn test_detect_vm_case_insensitive_and_ordered() {
        let vm = components("", "VirtualBox Disk", "", "", "");
        // VBOX does not occur, VIRTUALBOX does
        assert_eq!(detect_virtual_machine(&vm).vm_type, Some("VIRTUALBOX"));

        let both = components("qemu", "xen", "", "", "");
        assert_eq!(detect_virtual_machine(&both).vm_type, Some("QEMU"));
    }

    #[test]
    fn test_change_brackets_exclusive() {
        let signals = |change_count| RiskSignals {
            change_count,
            ..Default::default()
        };
        assert_eq!(score(&signals(2)).value(), 0);
        assert_eq!(score(&signals(3)).value(), 15);
        assert_eq!(score(&signals(5)).value(), 15);
        assert_eq!(score(&signals(6)).value(), 30);
    }

    #[test]
    fn test_prior_events_capped() {
        let signals = |recent_risk_events| RiskSignals {
            recent_risk_events,
            ..Default::default()
        };
        assert_eq!(score(&signals(1)).value(), 5);
        assert_eq!(score(&signals(5)).value(), 25);
        assert_eq!(score(&signals(40)).value(), 25);
    }

    #[test]
    fn test_geo_requires_location() {
        let without = RiskSignals {
            distinct_recent_locations: None,
            ..Default::default()
        };
        let few = RiskSignals {
            distinct_recent_locations: Some(3),
            ..Default::default()
        };
        let many = RiskSignals {
            distinct_recent_locations: Some(4),
            ..Default::default()
        };
        assert_eq!(score(&without).value(), 0);
        assert_eq!(score(&few).value(), 0);
        assert_eq!(score(&many).value(), 15);
    }

    #[test]
    fn test_all_factors_clamp_to_max() {
        let signals = RiskSignals {
            change_count: 10,
            is_vm: true,
            device_count: 9,
            distinct_recent_locations: Some(5),
            recent_risk_events: 10,
        };
        let raw: u32 = risk_breakdown(&signals).iter().map(|(_, p)| p).sum();
        assert_eq!(raw, 130);
        assert_eq!(score(&signals).value(), 100);
    }

    #[test]
    fn test_breakdown_lists_fired_factors() {
        let signals = RiskSignals {
            is_vm: true,
            device_count: 4,
            ..Default::default()
        };
        assert_eq!(
            risk_breakdown(&signals),
            vec![
                (RiskFactor::VirtualMachine, 40),
                (RiskFactor::DeviceMultiplicity, 20)
            ]
        );
    }

    #[test]
    fn test_auto_flag_boundaries() {
        let action = |v| check_auto_flag(RiskScore::from_raw(v)).action;
        assert_eq!(action(59), AutoFlagAction::None);
        assert_eq!(action(60), AutoFlagAction::FlagForReview);
        assert_eq!(action(79), AutoFlagAction::FlagForReview);
        assert_eq!(action(80), AutoFlagAction::ShadowBan);
        assert!(!check_auto_flag(RiskScore::from_raw(0)).should_flag);
    }
}

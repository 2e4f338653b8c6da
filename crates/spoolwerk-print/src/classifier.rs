// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Driver classification and strategy ordering.
//
// Receipt printers lie about what they are: a RONGTA or Xprinter unit often
// ships with a "POS-80" driver, and the same USB device may be installed
// under "Generic / Text Only". The classifier reads the driver and port names
// and predicts which transport family will actually reach the device.
//
// Tiers, first match wins (case-insensitive substring):
//   1. thermal / POS driver fragments  -> direct_usb
//   2. generic / OS-builtin fragments  -> windows_spooler
//   3. USB port with unknown driver    -> hybrid
//   4. anything else                   -> windows_spooler

use serde::{Deserialize, Serialize};

use spoolwerk_core::types::{
    DriverClassification, DriverType, RecommendedMethod, StrategyKind,
};

/// Thermal vendor and ESC/POS protocol fragments.
const THERMAL_FRAGMENTS: &[&str] = &[
    "rongta",
    "epson tm",
    "tm-t",
    "xprinter",
    "xp-",
    "star tsp",
    "tsp1",
    "bixolon",
    "srp-",
    "citizen ct",
    "zjiang",
    "zj-",
    "sewoo",
    "gprinter",
    "hprt",
    "sunmi",
    "escpos",
    "esc/pos",
    "thermal",
    "receipt",
    "rp80",
    "rp-80",
];

/// Vendor-neutral 80 mm / 58 mm POS drivers.
const GENERIC_POS_FRAGMENTS: &[&str] = &[
    "pos-80",
    "pos80",
    "80mm series",
    "pos-58",
    "58mm series",
    "generic 80",
];

const TEXT_ONLY_FRAGMENTS: &[&str] = &["generic / text only", "text only"];

/// OS-builtin and virtual drivers.
const GENERIC_FRAGMENTS: &[&str] = &[
    "microsoft",
    "generic",
    "pdf",
    "xps",
    "onenote",
    "fax",
    "send to",
];

fn contains_any(haystack: &str, fragments: &[&str]) -> bool {
    fragments.iter().any(|f| haystack.contains(f))
}

/// Classify a printer from its driver and port names. Pure and total.
pub fn classify(driver_name: &str, port_name: &str) -> DriverClassification {
    let driver = driver_name.to_lowercase();
    let port = port_name.to_lowercase();

    if contains_any(&driver, THERMAL_FRAGMENTS) {
        return direct(DriverType::Thermal);
    }
    if contains_any(&driver, GENERIC_POS_FRAGMENTS) {
        return direct(DriverType::Generic80Normal);
    }
    // Text-only is checked before the broader generic list, which would
    // otherwise swallow "Generic / Text Only".
    if contains_any(&driver, TEXT_ONLY_FRAGMENTS) {
        return spooler(DriverType::TextOnly);
    }
    if contains_any(&driver, GENERIC_FRAGMENTS) {
        return spooler(DriverType::Generic);
    }
    if port.contains("usb") {
        return DriverClassification {
            driver_type: DriverType::Generic,
            supports_direct_usb: false,
            silent_capable: false,
            recommended_method: RecommendedMethod::Hybrid,
        };
    }
    spooler(DriverType::Generic)
}

/// Whether the managed print path prints without a native dialog.
pub fn is_silent_capable(driver_type: DriverType) -> bool {
    matches!(driver_type, DriverType::Thermal | DriverType::Generic80Normal)
}

fn direct(driver_type: DriverType) -> DriverClassification {
    DriverClassification {
        driver_type,
        supports_direct_usb: true,
        silent_capable: is_silent_capable(driver_type),
        recommended_method: RecommendedMethod::DirectUsb,
    }
}

fn spooler(driver_type: DriverType) -> DriverClassification {
    DriverClassification {
        driver_type,
        supports_direct_usb: false,
        silent_capable: is_silent_capable(driver_type),
        recommended_method: RecommendedMethod::WindowsSpooler,
    }
}

/// An ordered list of strategies to try, plus whether the accessibility
/// pre-flight gates the first attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyPlan {
    pub order: Vec<StrategyKind>,
    pub require_accessible: bool,
}

impl StrategyPlan {
    /// Spooler-managed paths first.
    pub fn standard() -> Self {
        Self {
            order: vec![
                StrategyKind::ManagementObject,
                StrategyKind::ManagedQueue,
                StrategyKind::PortCopy,
                StrategyKind::LegacyCommand,
            ],
            require_accessible: true,
        }
    }

    /// Direct paths first; the printer's reported status is not trusted.
    pub fn bypass() -> Self {
        Self {
            order: vec![
                StrategyKind::PortCopy,
                StrategyKind::LegacyCommand,
                StrategyKind::RawScript,
                StrategyKind::ManagedQueue,
                StrategyKind::ManagementObject,
            ],
            require_accessible: false,
        }
    }

    /// Direct and spooler paths interleaved.
    pub fn hybrid() -> Self {
        Self {
            order: vec![
                StrategyKind::PortCopy,
                StrategyKind::ManagementObject,
                StrategyKind::RawScript,
                StrategyKind::ManagedQueue,
                StrategyKind::LegacyCommand,
            ],
            require_accessible: false,
        }
    }

    pub fn recommended(classification: &DriverClassification) -> Self {
        match classification.recommended_method {
            RecommendedMethod::DirectUsb => Self::bypass(),
            RecommendedMethod::WindowsSpooler => Self::standard(),
            RecommendedMethod::Hybrid => Self::hybrid(),
        }
    }

    /// Position of `kind` in the order, if planned.
    pub fn position(&self, kind: StrategyKind) -> Option<usize> {
        self.order.iter().position(|k| *k == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rongta_thermal_goes_direct() {
        let c = classify("RONGTA 80mm Series Printer", "USB001");
        assert_eq!(c.driver_type, DriverType::Thermal);
        assert!(c.supports_direct_usb);
        assert!(c.silent_capable);
        assert_eq!(c.recommended_method, RecommendedMethod::DirectUsb);

        let plan = StrategyPlan::recommended(&c);
        assert!(
            plan.position(StrategyKind::PortCopy) < plan.position(StrategyKind::ManagementObject)
        );
        assert!(!plan.require_accessible);
    }

    #[test]
    fn pdf_printer_uses_spooler_and_is_not_silent() {
        let c = classify("Microsoft Print To PDF", "PORTPROMPT:");
        assert_eq!(c.recommended_method, RecommendedMethod::WindowsSpooler);
        assert!(!c.silent_capable);
        assert!(!c.supports_direct_usb);
        assert_eq!(StrategyPlan::recommended(&c), StrategyPlan::standard());
    }

    #[test]
    fn generic_pos_driver_is_generic_80_normal() {
        for driver in ["POS-80", "POS80 Printer", "Generic 80mm", "POS-58 Series"] {
            let c = classify(driver, "USB001");
            assert_eq!(c.driver_type, DriverType::Generic80Normal, "{driver}");
            assert_eq!(c.recommended_method, RecommendedMethod::DirectUsb);
        }
    }

    #[test]
    fn text_only_wins_over_generic() {
        let c = classify("Generic / Text Only", "USB001");
        assert_eq!(c.driver_type, DriverType::TextOnly);
        assert_eq!(c.recommended_method, RecommendedMethod::WindowsSpooler);
        assert!(!c.silent_capable);
    }

    #[test]
    fn thermal_fragment_beats_usb_port_rule() {
        let c = classify("Xprinter XP-58", "USB003");
        assert_eq!(c.driver_type, DriverType::Thermal);
    }

    #[test]
    fn unknown_driver_on_usb_is_hybrid() {
        let c = classify("Acme LabelMaster 3000", "USB002");
        assert_eq!(c.recommended_method, RecommendedMethod::Hybrid);
        assert!(!c.silent_capable);
        assert_eq!(StrategyPlan::recommended(&c), StrategyPlan::hybrid());
    }

    #[test]
    fn unknown_driver_elsewhere_uses_spooler() {
        let c = classify("Acme LabelMaster 3000", "IP_10.0.0.7");
        assert_eq!(c.driver_type, DriverType::Generic);
        assert_eq!(c.recommended_method, RecommendedMethod::WindowsSpooler);
    }

    #[test]
    fn matching_is_case_insensitive_and_deterministic() {
        let a = classify("epson TM-T88V receipt", "usb001");
        let b = classify("EPSON tm-t88v RECEIPT", "USB001");
        assert_eq!(a, b);
        assert_eq!(a, classify("epson TM-T88V receipt", "usb001"));
    }

    #[test]
    fn empty_names_are_classified() {
        let c = classify("", "");
        assert_eq!(c.recommended_method, RecommendedMethod::WindowsSpooler);
    }

    #[test]
    fn plans_contain_no_duplicates() {
        for plan in [StrategyPlan::standard(), StrategyPlan::bypass(), StrategyPlan::hybrid()] {
            let mut seen = std::collections::HashSet::new();
            assert!(plan.order.iter().all(|k| seen.insert(*k)));
        }
    }
}

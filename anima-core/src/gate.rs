//! Risk Gate — classifies a planned prompt for high-impact changes, and
//! owns the pending/bypass marker files that pause the driver for human
//! approval.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::RegexSet;
use serde::{Deserialize, Serialize};

use crate::domain::models::{GateDecision, RiskLevel};

const PENDING_FILE: &str = "gate_pending.json";
const BYPASS_FILE: &str = "gate_bypass";

struct Indicator {
    label: &'static str,
}

const INDICATORS: &[Indicator] = &[
    Indicator {
        label: "modifies domain types",
    },
    Indicator {
        label: "modifies dispatch wiring",
    },
    Indicator {
        label: "deletes files",
    },
    Indicator {
        label: "major restructuring",
    },
];

fn indicator_patterns() -> [&'static str; 4] {
    [
        r"(?i)domain[/\\]models\.rs|domain[/\\]ports\.rs",
        r"(?i)\bdispatch\.rs\b",
        r"(?i)\b(delet|remov)(e|ing)\b.*\bfile",
        r"(?i)rewrite\b.{0,30}\bmodule|restructur|major refactor",
    ]
}

/// Classifies `haystack` (the rendered prompt, with target file paths
/// appended) against the fixed indicator set. Any match forces
/// `gated = true, risk_level = High`; otherwise the prompt is ungated and
/// `Low` risk.
pub fn classify_risk(haystack: &str) -> GateDecision {
    // The patterns are fixed constants; a compile failure here would be a
    // programmer error, not a runtime condition. Degrade to "never gated"
    // rather than panic.
    let set = RegexSet::new(indicator_patterns()).unwrap_or_else(|_| RegexSet::empty());
    let matches = set.matches(haystack);
    let indicators: Vec<String> = matches
        .into_iter()
        .map(|i| INDICATORS[i].label.to_string())
        .collect();

    if indicators.is_empty() {
        GateDecision {
            gated: false,
            risk_level: RiskLevel::Low,
            indicators,
        }
    } else {
        GateDecision {
            gated: true,
            risk_level: RiskLevel::High,
            indicators,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PendingGate {
    gaps_summary: String,
    risk_indicators: Vec<String>,
    timestamp: DateTime<Utc>,
}

/// Owns the two marker files (`gate_pending.json`, `gate_bypass`) under a
/// project's hidden state directory.
pub struct GateState {
    dir: PathBuf,
}

impl GateState {
    pub fn new(anima_dir: impl Into<PathBuf>) -> Self {
        Self { dir: anima_dir.into() }
    }

    fn pending_path(&self) -> PathBuf {
        self.dir.join(PENDING_FILE)
    }

    fn bypass_path(&self) -> PathBuf {
        self.dir.join(BYPASS_FILE)
    }

    pub fn is_gate_pending(&self) -> bool {
        self.pending_path().exists()
    }

    pub fn is_gate_bypassed(&self) -> bool {
        self.bypass_path().exists()
    }

    /// Creates the pending-gate marker. Overwrites any existing one.
    pub fn write_gate(&self, gaps_summary: &str, indicators: &[String]) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let payload = PendingGate {
            gaps_summary: gaps_summary.to_string(),
            risk_indicators: indicators.to_vec(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&payload)
            .unwrap_or_else(|_| "{}".to_string());
        std::fs::write(self.pending_path(), json)
    }

    pub fn read_gate(&self) -> Option<(String, Vec<String>, DateTime<Utc>)> {
        let content = std::fs::read_to_string(self.pending_path()).ok()?;
        let payload: PendingGate = serde_json::from_str(&content).ok()?;
        Some((payload.gaps_summary, payload.risk_indicators, payload.timestamp))
    }

    /// Deletes the pending marker and writes the bypass marker. Called by
    /// the `approve` command.
    pub fn clear_gate(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let pending = self.pending_path();
        if pending.exists() {
            std::fs::remove_file(pending)?;
        }
        std::fs::write(self.bypass_path(), "")
    }

    /// Removes the bypass marker, returning `true` iff it existed.
    pub fn consume_bypass(&self) -> bool {
        let path = self.bypass_path();
        if path.exists() {
            std::fs::remove_file(&path).is_ok()
        } else {
            false
        }
    }
}

pub fn default_gate_dir(anima_dir: &Path) -> PathBuf {
    anima_dir.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_naming_domain_models_is_gated() {
        let decision = classify_risk("please update domain/models.rs with a new field");
        assert!(decision.gated);
        assert_eq!(decision.risk_level, RiskLevel::High);
        assert_eq!(decision.indicators, vec!["modifies domain types"]);
    }

    #[test]
    fn prompt_naming_dispatch_is_gated() {
        let decision = classify_risk("swap the analyze entry in dispatch.rs");
        assert!(decision.gated);
        assert!(decision.indicators.contains(&"modifies dispatch wiring".to_string()));
    }

    #[test]
    fn delete_file_phrase_is_gated() {
        let decision = classify_risk("delete the obsolete reporter file");
        assert!(decision.gated);
        assert!(decision.indicators.contains(&"deletes files".to_string()));
    }

    #[test]
    fn restructuring_phrase_is_gated() {
        let decision = classify_risk("time to restructure the verifier module");
        assert!(decision.gated);
        assert!(decision.indicators.contains(&"major restructuring".to_string()));
    }

    #[test]
    fn benign_prompt_is_not_gated() {
        let decision = classify_risk("add a missing docstring to the scanner");
        assert!(!decision.gated);
        assert_eq!(decision.risk_level, RiskLevel::Low);
        assert!(decision.indicators.is_empty());
    }

    #[test]
    fn gate_state_round_trips_pending_and_bypass() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gate = GateState::new(dir.path());
        assert!(!gate.is_gate_pending());
        assert!(!gate.is_gate_bypassed());

        gate.write_gate("2 urgent gaps", &["modifies domain types".to_string()])
            .expect("write_gate");
        assert!(gate.is_gate_pending());
        let (summary, indicators, _ts) = gate.read_gate().expect("read_gate");
        assert_eq!(summary, "2 urgent gaps");
        assert_eq!(indicators, vec!["modifies domain types".to_string()]);

        gate.clear_gate().expect("clear_gate");
        assert!(!gate.is_gate_pending());
        assert!(gate.is_gate_bypassed());

        assert!(gate.consume_bypass());
        assert!(!gate.is_gate_bypassed());
        assert!(!gate.consume_bypass());
    }
}

//! Risk flags, scan findings and the verdict they add up to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Dangerous-capability category found in a source unit.
///
/// The set is closed; adding a category means adding a variant here and
/// teaching a scan pass to emit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskFlag {
    ProcessSpawn,
    DynamicEval,
    RawSocket,
    FilesystemEscape,
    Reflection,
    DynamicImport,
    Serialization,
    EnvironmentAccess,
    /// The source did not parse; never clean.
    ParseError,
    /// No usable entry point or descriptor; never clean.
    Malformed,
}

impl RiskFlag {
    pub const ALL: [RiskFlag; 10] = [
        RiskFlag::ProcessSpawn,
        RiskFlag::DynamicEval,
        RiskFlag::RawSocket,
        RiskFlag::FilesystemEscape,
        RiskFlag::Reflection,
        RiskFlag::DynamicImport,
        RiskFlag::Serialization,
        RiskFlag::EnvironmentAccess,
        RiskFlag::ParseError,
        RiskFlag::Malformed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFlag::ProcessSpawn => "process-spawn",
            RiskFlag::DynamicEval => "dynamic-eval",
            RiskFlag::RawSocket => "raw-socket",
            RiskFlag::FilesystemEscape => "filesystem-escape",
            RiskFlag::Reflection => "reflection",
            RiskFlag::DynamicImport => "dynamic-import",
            RiskFlag::Serialization => "serialization",
            RiskFlag::EnvironmentAccess => "environment-access",
            RiskFlag::ParseError => "parse-error",
            RiskFlag::Malformed => "malformed",
        }
    }
}

impl fmt::Display for RiskFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RiskFlag::ALL
            .into_iter()
            .find(|flag| flag.as_str() == s)
            .ok_or_else(|| format!("unknown risk flag: {}", s))
    }
}

/// Which scan technique produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassKind {
    Lexical,
    Structural,
    Descriptor,
}

/// One dangerous construct located in the source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Finding {
    pub line: Option<u32>,
    pub flag: RiskFlag,
    pub pass: PassKind,
    pub detail: String,
}

impl Finding {
    pub fn new(flag: RiskFlag, pass: PassKind, detail: impl Into<String>) -> Self {
        Self {
            line: None,
            flag,
            pass,
            detail: detail.into(),
        }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

/// Union of every pass's findings over one exact content.
///
/// Derived fresh on each scan; findings are sorted and de-duplicated so the
/// same bytes always produce an equal verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskVerdict {
    risk_flags: BTreeSet<RiskFlag>,
    clean: bool,
    findings: Vec<Finding>,
}

impl RiskVerdict {
    pub fn from_findings(findings: impl IntoIterator<Item = Finding>) -> Self {
        let unique: BTreeSet<Finding> = findings.into_iter().collect();
        let risk_flags: BTreeSet<RiskFlag> = unique.iter().map(|f| f.flag).collect();
        Self {
            clean: risk_flags.is_empty(),
            risk_flags,
            findings: unique.into_iter().collect(),
        }
    }

    pub fn clean() -> Self {
        Self::from_findings(Vec::new())
    }

    pub fn is_clean(&self) -> bool {
        self.clean
    }

    pub fn has(&self, flag: RiskFlag) -> bool {
        self.risk_flags.contains(&flag)
    }

    pub fn flags(&self) -> &BTreeSet<RiskFlag> {
        &self.risk_flags
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Union with another verdict.
    pub fn merge(self, other: RiskVerdict) -> Self {
        Self::from_findings(self.findings.into_iter().chain(other.findings))
    }

    /// Comma-separated flag names, for logs and listings.
    pub fn flag_list(&self) -> String {
        self.risk_flags
            .iter()
            .map(RiskFlag::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

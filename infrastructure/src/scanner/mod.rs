//! Risk scanner for Lua tool units.
//!
//! ```text
//! bytes ──▶ size check ──▶ parse (bounded depth)
//!                              │
//!        ┌─────────────────────┼──────────────────────┐
//!        ▼                     ▼                      ▼
//!   LexicalPass         StructuralPass         descriptor::extract
//!   (regex, raw text)   (syntax tree walk)     (literal return table)
//!        └──────────── findings ───────────────────────┘
//!                              ▼
//!                         RiskVerdict
//! ```
//!
//! A syntax error is itself a finding (`parse-error`); the lexical pass still
//! runs, the structural walk and descriptor extraction do not.

pub mod catalogue;
pub mod descriptor;
pub mod lexical;
pub mod structural;
pub mod syntax;

pub use descriptor::DescriptorError;
pub use lexical::LexicalPass;
pub use structural::StructuralPass;

use syntax::ast::Block;
use toolgate_application::{RiskScannerPort, ScanReport};
use toolgate_domain::{Finding, PassKind, RiskFlag, RiskVerdict};
use tracing::debug;

/// Default cap on the size of a unit that will be parsed.
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 256 * 1024;

/// Default cap on syntactic nesting.
pub const DEFAULT_MAX_PARSE_DEPTH: usize = 200;

/// What a pass gets to look at.
pub struct ParsedSource<'a> {
    pub text: &'a str,
    /// `None` when the unit did not parse.
    pub chunk: Option<&'a Block>,
}

/// One independent detection technique.
pub trait ScanPass: Send + Sync {
    fn kind(&self) -> PassKind;
    fn run(&self, source: &ParsedSource<'_>) -> Vec<Finding>;
}

pub struct LuaRiskScanner {
    passes: Vec<Box<dyn ScanPass>>,
    max_source_bytes: usize,
    max_parse_depth: usize,
}

impl LuaRiskScanner {
    /// Scanner with the lexical and structural passes.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            passes: vec![Box::new(LexicalPass::new()?), Box::new(StructuralPass)],
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            max_parse_depth: DEFAULT_MAX_PARSE_DEPTH,
        })
    }

    pub fn with_max_source_bytes(mut self, max: usize) -> Self {
        self.max_source_bytes = max;
        self
    }

    pub fn with_max_parse_depth(mut self, depth: usize) -> Self {
        self.max_parse_depth = depth;
        self
    }

    pub fn with_pass(mut self, pass: Box<dyn ScanPass>) -> Self {
        self.passes.push(pass);
        self
    }
}

impl RiskScannerPort for LuaRiskScanner {
    fn inspect(&self, source: &[u8], unit_key: Option<&str>) -> ScanReport {
        let text = String::from_utf8_lossy(source);
        let mut findings = Vec::new();

        let parsed = if source.len() > self.max_source_bytes {
            findings.push(Finding::new(
                RiskFlag::ParseError,
                PassKind::Structural,
                format!("source exceeds {} bytes", self.max_source_bytes),
            ));
            None
        } else {
            match syntax::parse_chunk(source, self.max_parse_depth) {
                Ok(chunk) => Some(chunk),
                Err(e) => {
                    findings.push(
                        Finding::new(RiskFlag::ParseError, PassKind::Structural, e.message)
                            .at_line(e.line),
                    );
                    None
                }
            }
        };

        let view = ParsedSource {
            text: &text,
            chunk: parsed.as_ref(),
        };
        for pass in &self.passes {
            let found = pass.run(&view);
            debug!(pass = ?pass.kind(), findings = found.len(), "Scan pass finished");
            findings.extend(found);
        }

        let descriptor = match parsed.as_ref() {
            Some(chunk) => match descriptor::extract(chunk, unit_key) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    findings.push(Finding::new(
                        RiskFlag::Malformed,
                        PassKind::Descriptor,
                        e.to_string(),
                    ));
                    None
                }
            },
            None => None,
        };

        ScanReport {
            verdict: RiskVerdict::from_findings(findings),
            descriptor,
        }
    }
}

//! Lexical pass: a regex catalogue matched over the raw text.
//!
//! Comments and string literals are deliberately not stripped. A hit inside
//! a comment is a false positive; the operator clears it by approving.

use super::{ParsedSource, ScanPass};
use regex::Regex;
use toolgate_domain::{Finding, PassKind, RiskFlag};

/// `(flag, label, pattern)`; patterns tolerate whitespace around `.` and `:`.
const RULES: &[(RiskFlag, &str, &str)] = &[
    (RiskFlag::ProcessSpawn, "os.execute", r"\bos\s*\.\s*execute\b"),
    (RiskFlag::ProcessSpawn, "os.exit", r"\bos\s*\.\s*exit\b"),
    (RiskFlag::ProcessSpawn, "io.popen", r"\bio\s*\.\s*popen\b"),
    (
        RiskFlag::DynamicEval,
        "load call",
        r#"\b(?:load|loadstring|loadfile|dofile)\s*[(\["'{]"#,
    ),
    (
        RiskFlag::DynamicEval,
        "load reference",
        r"[=,({]\s*(?:load|loadstring|loadfile|dofile)\b",
    ),
    (RiskFlag::RawSocket, "socket", r"\bsocket\b"),
    (
        RiskFlag::RawSocket,
        "network module",
        r#"require\s*\(?\s*["'](?:luasocket|ssl|http|copas)"#,
    ),
    (
        RiskFlag::FilesystemEscape,
        "io file access",
        r"\bio\s*\.\s*(?:open|lines|input|output|tmpfile)\b",
    ),
    (
        RiskFlag::FilesystemEscape,
        "os file primitive",
        r"\bos\s*\.\s*(?:remove|rename|tmpname)\b",
    ),
    (RiskFlag::Reflection, "debug library", r"\bdebug\s*[.:\[]"),
    (
        RiskFlag::Reflection,
        "metatable access",
        r"\b(?:get|set)metatable\b",
    ),
    (
        RiskFlag::Reflection,
        "raw table access",
        r"\braw(?:get|set|equal|len)\b",
    ),
    (RiskFlag::Reflection, "environment swap", r"\b(?:get|set)fenv\b"),
    (RiskFlag::Reflection, "_G", r"\b_G\b"),
    (RiskFlag::Reflection, "_ENV", r"\b_ENV\b"),
    (RiskFlag::DynamicImport, "require", r"\brequire\b"),
    (RiskFlag::DynamicImport, "package library", r"\bpackage\s*[.\[]"),
    (RiskFlag::Serialization, "string.dump", r"\bstring\s*\.\s*dump\b"),
    (RiskFlag::Serialization, "dump method", r":\s*dump\s*\("),
    (
        RiskFlag::EnvironmentAccess,
        "os environment",
        r"\bos\s*\.\s*(?:getenv|setlocale)\b",
    ),
];

pub struct LexicalPass {
    rules: Vec<(RiskFlag, &'static str, Regex)>,
}

impl LexicalPass {
    pub fn new() -> Result<Self, regex::Error> {
        let rules = RULES
            .iter()
            .map(|(flag, label, pattern)| Ok((*flag, *label, Regex::new(pattern)?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }
}

impl ScanPass for LexicalPass {
    fn kind(&self) -> PassKind {
        PassKind::Lexical
    }

    fn run(&self, source: &ParsedSource<'_>) -> Vec<Finding> {
        let text = source.text;
        let line_starts: Vec<usize> = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        let line_of = |offset: usize| -> u32 {
            let index = line_starts.partition_point(|&start| start <= offset);
            u32::try_from(index).unwrap_or(u32::MAX)
        };

        let mut findings = Vec::new();
        for (flag, label, regex) in &self.rules {
            for hit in regex.find_iter(text) {
                findings.push(
                    Finding::new(*flag, PassKind::Lexical, *label).at_line(line_of(hit.start())),
                );
            }
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn run(text: &str) -> Vec<Finding> {
        LexicalPass::new().unwrap().run(&ParsedSource {
            text,
            chunk: None,
        })
    }

    fn flags(text: &str) -> BTreeSet<RiskFlag> {
        run(text).into_iter().map(|f| f.flag).collect()
    }

    #[test]
    fn test_catalogue_compiles_and_clean_text_passes() {
        let src = "local function run(args)\n  return 'hello ' .. args.who\nend\nreturn { name = 'greet', run = run }\n";
        assert!(run(src).is_empty());
    }

    #[test]
    fn test_whitespace_around_dot_is_tolerated() {
        assert_eq!(
            flags("os . execute('ls')"),
            BTreeSet::from([RiskFlag::ProcessSpawn])
        );
        assert_eq!(
            flags("io\n.popen('ls')"),
            BTreeSet::from([RiskFlag::ProcessSpawn])
        );
    }

    #[test]
    fn test_reports_line_numbers() {
        let findings = run("local x = 1\n\nlocal f = loadstring('return 1')\n");
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.line == Some(3)));
        assert!(findings.iter().all(|f| f.flag == RiskFlag::DynamicEval));
    }

    #[test]
    fn test_comments_are_not_stripped() {
        assert_eq!(
            flags("-- never call os.getenv here\nreturn 1"),
            BTreeSet::from([RiskFlag::EnvironmentAccess])
        );
    }

    #[test]
    fn test_words_containing_keywords_do_not_match() {
        assert!(flags("local required = true\nlocal reload = 1\nlocal osx = 2").is_empty());
    }

    #[test]
    fn test_network_require() {
        let found = flags(r#"local http = require("ssl.https")"#);
        assert!(found.contains(&RiskFlag::RawSocket));
        assert!(found.contains(&RiskFlag::DynamicImport));
    }
}

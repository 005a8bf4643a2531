use crate::finding::{Finding, FindingSet};
use serde_json::{Value as JsonValue, json};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("report I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn finding_json(finding: &Finding) -> JsonValue {
    json!({
        "id": finding.id,
        "kind": finding.kind.to_string(),
        "address": finding.at.to_string(),
        "call-stack": finding
            .stack
            .frames()
            .map(|a| a.to_string())
            .collect::<Vec<_>>(),
    })
}

/// Renders findings as the text block the CLI prints, one line per
/// finding.
pub fn render_text(findings: &FindingSet) -> String {
    let mut out = String::new();
    for finding in findings.iter() {
        out.push_str(&format!(
            "{} at {} [{}] id={}\n",
            finding.kind, finding.at, finding.stack, finding.id
        ));
    }
    out
}

pub fn to_json(findings: &FindingSet) -> JsonValue {
    json!({
        "findings": findings.iter().map(finding_json).collect::<Vec<_>>(),
    })
}

/// Writes the JSON report to `path`, pretty-printed.
pub fn write_json(findings: &FindingSet, path: &Path) -> Result<(), ReportError> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &to_json(findings))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Address;
    use crate::callstack::CallStack;
    use crate::finding::FindingKind;
    use std::fs;
    use tempfile::tempdir;

    fn sample_set() -> FindingSet {
        let mut set = FindingSet::new();
        let mut stack = CallStack::new();
        stack.push(Address(0x1000));
        stack.push(Address(0x1008));
        set.record(FindingKind::TaintedRead, Address(0x2004), &stack);
        set.record(FindingKind::TaintedSyscall, Address(0x2010), &stack);
        set
    }

    #[test]
    fn text_report_lists_hex_addresses_and_stacks() {
        let text = render_text(&sample_set());
        assert!(text.contains("tainted-read at 0x2004 [0x1000 -> 0x1008]"));
        assert!(text.contains("tainted-syscall at 0x2010"));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn json_report_round_trips_through_a_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("findings.json");
        write_json(&sample_set(), &path).unwrap();

        let parsed: JsonValue = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let findings = parsed["findings"].as_array().unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0]["kind"], "tainted-read");
        assert_eq!(findings[0]["address"], "0x2004");
        assert_eq!(
            findings[0]["call-stack"],
            json!(["0x1000", "0x1008"])
        );
        dir.close().unwrap();
    }
}

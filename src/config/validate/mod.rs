//! User-data validation
//!
//! Produces a line-numbered [`Report`] for any input. Validation never fails:
//! a panic inside a rule becomes a single error entry and the remaining rules
//! still run.

pub mod node;
pub mod report;
pub mod rules;

pub use node::{Node, NodeKind};
pub use report::{Entry, EntryKind, Report};

use super::CLOUD_CONFIG_HEADER;
use serde_yaml::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Validate raw user-data
pub fn validate(data: &[u8]) -> Report {
    match panic::catch_unwind(|| validate_document(data)) {
        Ok(report) => report,
        Err(payload) => {
            let mut report = Report::default();
            report.error(1, format!("validator crashed: {}", panic_message(payload)));
            report
        }
    }
}

fn validate_document(data: &[u8]) -> Report {
    let mut report = Report::default();
    let text = String::from_utf8_lossy(data);
    if text.trim().is_empty() {
        return report;
    }

    let header = text.lines().next().unwrap_or_default().trim_end_matches('\r');
    if header.starts_with("#!") {
        debug!("Script user-data, nothing to validate");
        return report;
    }
    if header != CLOUD_CONFIG_HEADER {
        report.error(1, r##"must be "#cloud-config" or "#!""##);
        return report;
    }

    let value: Value = match serde_yaml::from_str(&text) {
        Ok(value) => value,
        Err(e) => {
            let line = e.location().map_or(1, |l| l.line());
            report.error(line, format!("yaml: {e}"));
            return report;
        }
    };
    let root = node::build(&text, &value);

    for (name, rule) in rules::RULES {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| rule(&root, &mut report)));
        if let Err(payload) = outcome {
            report.error(
                1,
                format!("{name} rule crashed: {}", panic_message(payload)),
            );
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert!(validate(b"").is_empty());
    }

    #[test]
    fn test_bad_header() {
        let report = validate(b"hostname: a\n");
        assert_eq!(
            report.to_string(),
            "line 1: error: must be \"#cloud-config\" or \"#!\"\n"
        );
    }

    #[test]
    fn test_script_skipped() {
        assert!(validate(b"#!/bin/bash\nexit 1\n").is_empty());
    }

    #[test]
    fn test_syntax_error_line() {
        let report = validate(b"#cloud-config\nhostname: a\nusers:\n  - name: [b\n");
        assert!(report.has_errors());
        let entry = &report.entries()[0];
        assert!(entry.message.starts_with("yaml: "));
        assert!(entry.line >= 4);
    }

    #[test]
    fn test_clean_document() {
        let doc = b"#cloud-config\nhostname: host1\nmanage_etc_hosts: localhost\ncoreos:\n  update:\n    reboot-strategy: etcd-lock\n";
        assert!(validate(doc).is_empty());
    }

    #[test]
    fn test_rules_accumulate() {
        let doc = b"#cloud-config\nfoo: 1\ncoreos:\n  update:\n    reboot-strategy: nope\n";
        let report = validate(doc);
        let lines: Vec<String> = report.entries().iter().map(|e| e.to_string()).collect();
        assert_eq!(
            lines,
            vec![
                "line 2: warning: unrecognized key \"foo\"",
                "line 5: error: invalid value nope",
            ]
        );
    }

    #[test]
    fn test_arbitrary_bytes() {
        let inputs: [&[u8]; 5] = [
            b"\xff\xfe\x00",
            b"#cloud-config\n\t- : :\n",
            b"#cloud-config\n- a\n- b\n",
            b"#cloud-config\n!!binary aGk=\n",
            b"#cloud-config\n{{{{",
        ];
        for input in inputs {
            let _ = validate(input);
        }
    }
}

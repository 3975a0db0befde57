//! Validation rules run against the line-annotated tree

use super::node::{Node, NodeKind};
use super::report::Report;
use crate::config::decode_content;
use crate::config::schema::{FILE_ENCODINGS, Kind, SCHEMA, Valid};

/// A rule inspects the whole document and appends to the report
pub type Rule = fn(&Node, &mut Report);

/// Rules in the order they run
pub const RULES: &[(&str, Rule)] = &[
    ("structure", check_structure),
    ("validity", check_validity),
    ("encoding", check_encoding),
    ("write_files", check_write_files_under_coreos),
    ("discovery", check_discovery_url),
];

fn compatible(concrete: NodeKind, schema: &Kind) -> bool {
    match (concrete, schema) {
        (NodeKind::Null, _) => true,
        (NodeKind::Bool, Kind::Bool) => true,
        (NodeKind::Int, Kind::Int) => true,
        (NodeKind::Float, Kind::Float) => true,
        (
            NodeKind::String | NodeKind::Int | NodeKind::Float | NodeKind::Bool,
            Kind::String,
        ) => true,
        (NodeKind::Struct, Kind::Struct(_)) => true,
        (NodeKind::Slice, Kind::Slice(_)) => true,
        _ => false,
    }
}

/// Types must match the schema; unknown keys are reported
pub fn check_structure(root: &Node, report: &mut Report) {
    match root.kind {
        NodeKind::Null => {}
        NodeKind::Struct => structure(root, &SCHEMA, report),
        _ => report.warning(
            root.line,
            format!(
                "incorrect type for {:?} (want {})",
                root.name,
                SCHEMA.describe()
            ),
        ),
    }
}

fn structure(node: &Node, kind: &Kind, report: &mut Report) {
    match kind {
        Kind::Struct(_) => {
            for child in &node.children {
                match kind.field(&child.name) {
                    Some(field) => structure_child(child, &field.kind, report),
                    None => {
                        report.warning(child.line, format!("unrecognized key {:?}", child.name))
                    }
                }
            }
        }
        Kind::Slice(elem) => {
            for item in &node.children {
                structure_child(item, elem, report);
            }
        }
        _ => {}
    }
}

fn structure_child(child: &Node, kind: &Kind, report: &mut Report) {
    if compatible(child.kind, kind) {
        structure(child, kind, report);
    } else {
        report.warning(
            child.line,
            format!("incorrect type for {:?} (want {})", child.name, kind.describe()),
        );
    }
}

/// Constrained scalars must hold an accepted value
pub fn check_validity(root: &Node, report: &mut Report) {
    validity(root, &SCHEMA, None, report);
}

fn validity(node: &Node, kind: &Kind, valid: Option<Valid>, report: &mut Report) {
    if !compatible(node.kind, kind) {
        return;
    }
    match kind {
        Kind::Struct(_) => {
            for child in &node.children {
                if let Some(field) = kind.field(&child.name) {
                    validity(child, &field.kind, field.valid, report);
                }
            }
        }
        Kind::Slice(elem) => {
            for item in &node.children {
                validity(item, elem, valid, report);
            }
        }
        _ => {
            if let Some(valid) = valid
                && !node.is_zero()
                && !valid.accepts(&node.value)
            {
                report.error(node.line, format!("invalid value {}", node.value));
            }
        }
    }
}

/// Encoded `write_files` content must decode
pub fn check_encoding(root: &Node, report: &mut Report) {
    let Some(files) = root.child("write_files") else {
        return;
    };
    for file in &files.children {
        let Some(encoding) = file.child("encoding") else {
            continue;
        };
        if encoding.is_zero() || !FILE_ENCODINGS.accepts(&encoding.value) {
            continue;
        }
        let content = file.child("content");
        let text = content.map(|c| c.value.as_str()).unwrap_or_default();
        if decode_content(text, &encoding.value).is_err() {
            let line = content.map_or(file.line, |c| c.line);
            report.error(
                line,
                format!("unable to decode content (encoding: {})", encoding.value),
            );
        }
    }
}

/// `write_files` is a top-level key
pub fn check_write_files_under_coreos(root: &Node, report: &mut Report) {
    if let Some(misplaced) = root.child("coreos").and_then(|c| c.child("write_files")) {
        report.warning(misplaced.line, "write_files doesn't belong under coreos");
    }
}

/// etcd discovery endpoints must be absolute URLs
pub fn check_discovery_url(root: &Node, report: &mut Report) {
    let Some(coreos) = root.child("coreos") else {
        return;
    };
    for section in ["etcd", "etcd2"] {
        let Some(discovery) = coreos.child(section).and_then(|s| s.child("discovery")) else {
            continue;
        };
        if discovery.is_zero() {
            continue;
        }
        if reqwest::Url::parse(&discovery.value).is_err() {
            report.warning(discovery.line, "discovery URL is not valid");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::node::build;
    use super::*;
    use serde_yaml::Value;

    fn run(rule: Rule, doc: &str) -> Report {
        let value: Value = serde_yaml::from_str(doc).unwrap();
        let root = build(doc, &value);
        let mut report = Report::default();
        rule(&root, &mut report);
        report
    }

    fn messages(report: &Report) -> Vec<String> {
        report.entries().iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_structure_unrecognized_key() {
        let report = run(check_structure, "#cloud-config\nhostname: a\nbogus: 1\n");
        assert_eq!(messages(&report), vec![r#"line 3: warning: unrecognized key "bogus""#]);
    }

    #[test]
    fn test_structure_incorrect_types() {
        let report = run(
            check_structure,
            "#cloud-config\ncoreos:\n  units:\n    name: a\nusers:\n  - bob\nhostname: [a]\n",
        );
        assert_eq!(
            messages(&report),
            vec![
                r#"line 3: warning: incorrect type for "units" (want []struct)"#,
                r#"line 6: warning: incorrect type for "users[0]" (want struct)"#,
                r#"line 7: warning: incorrect type for "hostname" (want string)"#,
            ]
        );
    }

    #[test]
    fn test_structure_scalar_leniency() {
        let report = run(
            check_structure,
            "#cloud-config\nhostname: 123\ncoreos:\n  etcd:\n    name: true\n  units:\n    - name: a\n      runtime: true\n",
        );
        assert!(report.is_empty());

        let report = run(check_structure, "#cloud-config\ncoreos:\n  units:\n    - runtime: yes\n");
        assert_eq!(
            messages(&report),
            vec![r#"line 4: warning: incorrect type for "runtime" (want bool)"#]
        );
    }

    #[test]
    fn test_structure_kebab_keys() {
        let report = run(check_structure, "#cloud-config\ncoreos:\n  etcd:\n    peer-bind-addr: x\n");
        assert!(report.is_empty());
    }

    #[test]
    fn test_validity() {
        let report = run(
            check_validity,
            "#cloud-config\ncoreos:\n  update:\n    reboot-strategy: wizzlewazzle\n  units:\n    - name: a\n      command: launch\nmanage_etc_hosts: ''\n",
        );
        assert_eq!(
            messages(&report),
            vec![
                "line 4: error: invalid value wizzlewazzle",
                "line 7: error: invalid value launch",
            ]
        );
    }

    #[test]
    fn test_encoding() {
        let report = run(
            check_encoding,
            "#cloud-config\nwrite_files:\n  - encoding: base64\n    content: '!!!'\n  - encoding: base64\n    content: aGk=\n  - encoding: rot13\n    content: x\n",
        );
        assert_eq!(
            messages(&report),
            vec!["line 4: error: unable to decode content (encoding: base64)"]
        );
    }

    #[test]
    fn test_write_files_under_coreos() {
        let report = run(
            check_write_files_under_coreos,
            "#cloud-config\ncoreos:\n  write_files:\n    - path: /a\n",
        );
        assert_eq!(
            messages(&report),
            vec!["line 3: warning: write_files doesn't belong under coreos"]
        );
    }

    #[test]
    fn test_discovery_url() {
        let report = run(
            check_discovery_url,
            "#cloud-config\ncoreos:\n  etcd:\n    discovery: not a url\n  etcd2:\n    discovery: https://discovery.etcd.io/x\n",
        );
        assert_eq!(messages(&report), vec!["line 4: warning: discovery URL is not valid"]);
    }
}

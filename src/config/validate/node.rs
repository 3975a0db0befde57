//! Generic document tree with source line numbers
//!
//! `serde_yaml` drops positions, so lines are recovered by walking the raw
//! text in the same order the tree is traversed: every key is searched for
//! from the line after the previous hit.

use crate::config::schema::scalar_text;
use serde_yaml::Value;

/// Shape of a concrete document node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Struct,
    Slice,
}

/// A node of the user's document
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Underscore-normalized key; `parent[i]` for sequence items
    pub name: String,
    pub kind: NodeKind,
    /// Textual value for scalars
    pub value: String,
    /// 1-based source line
    pub line: usize,
    pub children: Vec<Node>,
}

impl Node {
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Null, empty string, zero or false
    pub fn is_zero(&self) -> bool {
        match self.kind {
            NodeKind::Null => true,
            NodeKind::String => self.value.is_empty(),
            NodeKind::Bool => self.value == "false",
            NodeKind::Int | NodeKind::Float => self.value.parse::<f64>().is_ok_and(|v| v == 0.0),
            NodeKind::Struct | NodeKind::Slice => self.children.is_empty(),
        }
    }
}

struct LineCursor<'a> {
    lines: Vec<&'a str>,
    next: usize,
}

/// Where a key or item was found and what follows its marker
struct Hit<'a> {
    line: usize,
    rest: &'a str,
}

impl Hit<'_> {
    /// `{...}` and `[...]` values keep all descendants on this line
    fn is_flow(&self) -> bool {
        self.rest.starts_with('{') || self.rest.starts_with('[')
    }
}

fn strip_item_markers(line: &str) -> &str {
    let mut rest = line.trim_start();
    while let Some(stripped) = rest.strip_prefix('-') {
        if !(stripped.is_empty() || stripped.starts_with(' ')) {
            break;
        }
        rest = stripped.trim_start();
    }
    rest
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

impl<'a> LineCursor<'a> {
    fn new(document: &'a str) -> Self {
        Self {
            lines: document.lines().collect(),
            next: 0,
        }
    }

    fn find_key(&mut self, key: &str) -> Option<Hit<'a>> {
        let candidates = [format!("{key}:"), format!("\"{key}\":"), format!("'{key}':")];
        for index in self.next..self.lines.len() {
            let line = self.lines[index];
            if line.trim_start().starts_with('#') {
                continue;
            }
            let body = strip_item_markers(line);
            let Some(rest) = candidates.iter().find_map(|c| body.strip_prefix(c.as_str())) else {
                continue;
            };
            if !(rest.is_empty() || rest.starts_with(' ')) {
                continue;
            }
            let rest = rest.trim();
            self.next = index + 1;
            if rest.starts_with('|') || rest.starts_with('>') {
                self.skip_block(line.len() - body.len());
            }
            return Some(Hit {
                line: index + 1,
                rest,
            });
        }
        None
    }

    /// Skip the body of a block scalar whose key starts at `column`
    fn skip_block(&mut self, column: usize) {
        while self.next < self.lines.len() {
            let line = self.lines[self.next];
            if !line.trim().is_empty() && indentation(line) <= column {
                break;
            }
            self.next += 1;
        }
    }

    fn find_item(&mut self, holds_mapping: bool) -> Option<Hit<'a>> {
        for index in self.next..self.lines.len() {
            let line = self.lines[index];
            let trimmed = line.trim_start();
            if trimmed == "-" || trimmed.starts_with("- ") {
                let rest = trimmed[1..].trim();
                // A mapping item's first key shares the dash line
                self.next = if holds_mapping { index } else { index + 1 };
                if !holds_mapping && (rest.starts_with('|') || rest.starts_with('>')) {
                    self.skip_block(indentation(line));
                }
                return Some(Hit {
                    line: index + 1,
                    rest,
                });
            }
            if !trimmed.is_empty() && !trimmed.starts_with('#') {
                return None;
            }
        }
        None
    }
}

fn kind_of(value: &Value) -> NodeKind {
    match value {
        Value::Null => NodeKind::Null,
        Value::Bool(_) => NodeKind::Bool,
        Value::Number(n) if n.is_f64() => NodeKind::Float,
        Value::Number(_) => NodeKind::Int,
        Value::String(_) => NodeKind::String,
        Value::Sequence(_) => NodeKind::Slice,
        Value::Mapping(_) => NodeKind::Struct,
        Value::Tagged(tagged) => kind_of(&tagged.value),
    }
}

fn build_node(name: String, value: &Value, line: usize, flow: bool, cursor: &mut LineCursor<'_>) -> Node {
    let value = match value {
        Value::Tagged(tagged) => &tagged.value,
        other => other,
    };
    let mut children = Vec::new();

    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                let raw_key = scalar_text(key);
                let (child_line, child_flow) = if flow {
                    (line, true)
                } else {
                    match cursor.find_key(&raw_key) {
                        Some(hit) => (hit.line, hit.is_flow()),
                        None => (line, false),
                    }
                };
                children.push(build_node(
                    raw_key.replace('-', "_"),
                    child,
                    child_line,
                    child_flow,
                    cursor,
                ));
            }
        }
        Value::Sequence(items) => {
            for (index, item) in items.iter().enumerate() {
                let (item_line, item_flow) = if flow {
                    (line, true)
                } else {
                    match cursor.find_item(matches!(item, Value::Mapping(_))) {
                        Some(hit) => (hit.line, hit.is_flow()),
                        None => (line, false),
                    }
                };
                children.push(build_node(
                    format!("{name}[{index}]"),
                    item,
                    item_line,
                    item_flow,
                    cursor,
                ));
            }
        }
        _ => {}
    }

    Node {
        kind: kind_of(value),
        value: scalar_text(value),
        name,
        line,
        children,
    }
}

/// Build the line-annotated tree of a parsed document
pub fn build(document: &str, value: &Value) -> Node {
    let mut cursor = LineCursor::new(document);
    build_node(String::new(), value, 1, false, &mut cursor)
}

//! `{{dot.path}}` substitution in action config.
//!
//! Every string inside the config is rendered; keys are left alone. A
//! placeholder whose path does not resolve, or resolves to null, stays in
//! the output as written.

use serde_json::Value;

pub fn render(config: &Value, doc: &Value) -> Value {
    match config {
        Value::String(s) => Value::String(render_str(s, doc)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render(v, doc)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render(v, doc)))
                .collect(),
        ),
        other => other.clone(),
    }
}

pub fn render_str(template: &str, doc: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        let placeholder = &rest[open..open + 2 + close + 2];
        let path = rest[open + 2..open + 2 + close].trim();
        out.push_str(&rest[..open]);
        match lookup(doc, path).and_then(scalar_text) {
            Some(text) => out.push_str(&text),
            None => out.push_str(placeholder),
        }
        rest = &rest[open + 2 + close + 2..];
    }
    out.push_str(rest);
    out
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(doc, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

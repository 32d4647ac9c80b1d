//! Heuristic repair of almost-JSON model output.
//!
//! Common malformations seen in model output:
//! 1. Markdown code fences or prose around the JSON
//! 2. Doubled quotes: `"key":""value"`
//! 3. Missing closing braces or brackets
//! 4. Trailing commas: `{"a":1,}`
//! 5. Raw control characters inside strings

use serde_json::Value;

/// Extract the JSON-looking part of a model reply.
///
/// Prefers the body of the first fenced code block; otherwise takes the span
/// from the first `{` or `[` to the last matching closer; otherwise the
/// trimmed text.
pub fn extract_json_block(text: &str) -> &str {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        // Skip the info string (`json`, `JSON`, …) up to the end of the line.
        let body_start = after_fence.find('\n').map_or(0, |i| i + 1);
        let body = &after_fence[body_start..];
        let body = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
        return body.trim();
    }

    let open = trimmed.find(['{', '[']);
    let close = trimmed.rfind(['}', ']']);
    match (open, close) {
        (Some(o), Some(c)) if c > o => &trimmed[o..=c],
        (Some(o), _) => &trimmed[o..],
        _ => trimmed,
    }
}

/// Try increasingly aggressive repairs until the text parses as JSON.
///
/// Returns `None` when every repair fails.
pub fn repair_json(raw: &str) -> Option<Value> {
    let candidate = extract_json_block(raw);
    if let Ok(v) = serde_json::from_str::<Value>(candidate) {
        return Some(v);
    }

    let steps: [fn(&str) -> String; 4] = [
        repair_double_quotes,
        repair_unbalanced_delimiters,
        repair_trailing_commas,
        repair_control_characters,
    ];

    let mut repaired = candidate.to_string();
    for step in steps {
        repaired = step(&repaired);
        if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
            tracing::debug!(chars = raw.len(), "repaired malformed JSON output");
            return Some(v);
        }
    }
    None
}

/// Collapse `:""value` into `:"value"`, leaving real empty strings alone.
fn repair_double_quotes(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b':' && bytes.get(i + 1) == Some(&b'"') && bytes.get(i + 2) == Some(&b'"') {
            // `:""` followed by a delimiter is a legitimate empty string
            let next = bytes[i + 3..].iter().find(|b| !b.is_ascii_whitespace());
            if !matches!(next, None | Some(b',' | b'}' | b']')) {
                result.extend_from_slice(b":\"");
                i += 3;
                continue;
            }
        }
        result.push(bytes[i]);
        i += 1;
    }

    String::from_utf8(result).unwrap_or_else(|_| input.to_string())
}

/// Drop commas directly before `}` or `]`.
fn repair_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut result = String::with_capacity(input.len());

    for (i, &c) in chars.iter().enumerate() {
        if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                continue;
            }
        }
        result.push(c);
    }
    result
}

/// Close unterminated strings, arrays and objects in reverse nesting order.
fn repair_unbalanced_delimiters(input: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for ch in input.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut result = input.trim_end().to_string();
    if in_string {
        result.push('"');
    }
    while let Some(closer) = stack.pop() {
        result.push(closer);
    }
    result
}

/// Strip control characters other than `\n`, `\r`, `\t`.
fn repair_control_characters(input: &str) -> String {
    input
        .chars()
        .filter(|&c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

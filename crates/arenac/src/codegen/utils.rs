use crate::graph::ConstructParam;

pub(crate) fn escape_c_string(input: &str) -> String {
    input
        .chars()
        .map(|ch| match ch {
            '\\' => "\\\\".to_string(),
            '"' => "\\\"".to_string(),
            '\n' => "\\n".to_string(),
            '\r' => "\\r".to_string(),
            '\t' => "\\t".to_string(),
            _ => ch.to_string(),
        })
        .collect::<Vec<_>>()
        .join("")
}

/// Turns an arbitrary name into a valid C identifier.
pub fn sanitize_symbol(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (idx, ch) in value.chars().enumerate() {
        let is_valid = ch.is_ascii_alphanumeric() || ch == '_';
        if idx == 0 && ch.is_ascii_digit() {
            out.push('_');
        }
        out.push(if is_valid { ch } else { '_' });
    }
    if out.is_empty() {
        out.push_str("model");
    }
    out
}

pub(crate) fn emit_value_array(values: &[String]) -> String {
    values.join(", ")
}

pub(crate) fn format_f32(value: f32) -> String {
    if value.is_nan() {
        "NAN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_negative() {
            "-INFINITY".to_string()
        } else {
            "INFINITY".to_string()
        }
    } else {
        let base = value.to_string();
        let needs_decimal = !base.contains('.') && !base.contains('e') && !base.contains('E');
        let suffix = if needs_decimal { ".0f" } else { "f" };
        format!("{base}{suffix}")
    }
}

pub(crate) fn format_f64(value: f64) -> String {
    if value.is_nan() {
        "NAN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_negative() {
            "-INFINITY".to_string()
        } else {
            "INFINITY".to_string()
        }
    } else {
        let base = value.to_string();
        if base.contains('.') || base.contains('e') || base.contains('E') {
            base
        } else {
            format!("{base}.0")
        }
    }
}

/// C++ spelling of a construction argument.
pub fn render_param(param: &ConstructParam) -> String {
    match param {
        ConstructParam::Int(value) => value.to_string(),
        ConstructParam::Float(value) => format_f64(*value),
        ConstructParam::Bool(value) => value.to_string(),
        ConstructParam::Str(value) => format!("\"{}\"", escape_c_string(value)),
        ConstructParam::Ident(value) => value.clone(),
        ConstructParam::List(items) => {
            let items: Vec<String> = items.iter().map(render_param).collect();
            format!("{{{}}}", emit_value_array(&items))
        }
    }
}

pub(crate) fn push_line(module: &mut String, indent: usize, line: &str) {
    push_block(module, indent, line);
}

/// Appends `block` re-indented to `indent` levels, stripping its common leading whitespace.
pub(crate) fn push_block(module: &mut String, indent: usize, block: &str) {
    if block.is_empty() {
        return;
    }
    let pad = "  ".repeat(indent);
    let mut lines: Vec<&str> = block.split('\n').collect();
    if matches!(lines.first(), Some(line) if line.trim().is_empty()) {
        lines.remove(0);
    }
    if matches!(lines.last(), Some(line) if line.trim().is_empty()) {
        lines.pop();
    }

    let min_indent = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.chars().take_while(|c| *c == ' ' || *c == '\t').count())
        .min()
        .unwrap_or(0);

    for line in lines {
        // `min_indent` counts ASCII blanks, so it is only a valid cut when the prefix is blank.
        let trimmed = match line.get(..min_indent) {
            Some(prefix) if prefix.bytes().all(|b| b == b' ' || b == b'\t') => {
                &line[min_indent..]
            }
            _ => line.trim_start(),
        };
        if trimmed.is_empty() {
            module.push('\n');
            continue;
        }
        module.push_str(&pad);
        module.push_str(trimmed);
        module.push('\n');
    }
}

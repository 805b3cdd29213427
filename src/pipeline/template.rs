use std::collections::BTreeMap;
use std::path::Path;

/// Variable bindings available while rendering a pipeline document
pub type Vars = BTreeMap<String, String>;

/// Render `{{ name }}` placeholders in a pipeline document
///
/// Supports:
/// - `{{ name }}` - substitute variable (error if not bound)
/// - `{{ name | basename }}` - last path component of the value
/// - `{{ name | dirname }}` - value without its last path component
///
/// # Examples
///
/// ```
/// # use stitches::pipeline::template::{render, Vars};
/// let mut vars = Vars::new();
/// vars.insert("input".into(), "data/points.geojson".into());
/// let out = render("file = '{{ input | basename }}'", &vars).unwrap();
/// assert_eq!(out, "file = 'points.geojson'");
/// ```
pub fn render(source: &str, vars: &Vars) -> Result<String, String> {
    let mut result = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| "unterminated '{{' placeholder".to_string())?;

        result.push_str(&evaluate(after[..end].trim(), vars)?);
        rest = &after[end + 2..];
    }

    result.push_str(rest);
    Ok(result)
}

fn evaluate(expr: &str, vars: &Vars) -> Result<String, String> {
    let mut parts = expr.split('|').map(str::trim);
    let name = parts.next().unwrap_or_default();

    if name.is_empty() {
        return Err("empty placeholder".to_string());
    }

    let mut value = vars
        .get(name)
        .cloned()
        .ok_or_else(|| format!("variable '{}' is not defined", name))?;

    for filter in parts {
        value = match filter {
            "basename" => Path::new(&value)
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            "dirname" => Path::new(&value)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            other => return Err(format!("unknown filter '{}'", other)),
        };
    }

    Ok(value)
}

/// Convert a TOML table of bindings into render variables
pub fn vars_from_toml(table: &toml::Table) -> Vars {
    table
        .iter()
        .map(|(k, v)| {
            let value = match v {
                toml::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

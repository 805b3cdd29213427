use anyhow::Result;
use std::env;

/// Expands environment variables in configuration content
///
/// Supports:
/// - `${VAR}` - Required variable (error if not set)
/// - `${VAR:-default}` - Optional variable with default value
/// - `$$` - Literal dollar sign (escaped)
///
/// # Examples
///
/// ```
/// # std::env::set_var("GISDBASE_ROOT", "/data/grass");
/// let input = r#"
/// database = "${GISDBASE_ROOT}"
/// mapset = "${STITCHES_DOC_MAPSET:-PERMANENT}"
/// note = "$$HOME is not expanded"
/// "#;
/// let result = stitches::config_expansion::expand_env_vars(input).unwrap();
/// assert!(result.contains(r#"database = "/data/grass""#));
/// assert!(result.contains(r#"mapset = "PERMANENT""#));
/// assert!(result.contains(r#"note = "$HOME is not expanded""#));
/// ```
pub fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            result.push('$');
            rest = tail;
        } else if let Some(body) = after.strip_prefix('{') {
            let end = body
                .find('}')
                .ok_or_else(|| anyhow::anyhow!("Unterminated variable reference: ${{{}", body))?;
            result.push_str(&lookup(&body[..end])?);
            rest = &body[end + 1..];
        } else {
            result.push('$');
            rest = after;
        }
    }
    result.push_str(rest);

    Ok(result)
}

/// Resolve `VAR` or `VAR:-default`
fn lookup(expr: &str) -> Result<String> {
    let (name, default) = match expr.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (expr, None),
    };

    match (env::var(name), default) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.to_string()),
        (Err(_), None) => anyhow::bail!(
            "Environment variable '{}' is required but not set. \
             Use ${{{}:-default}} to provide a default value.",
            name,
            name
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_expand_required_var() {
        env::set_var("STITCHES_TEST_DB", "/grassdata");
        let output = expand_env_vars(r#"database = "${STITCHES_TEST_DB}/nz""#).unwrap();
        assert_eq!(output, r#"database = "/grassdata/nz""#);
        env::remove_var("STITCHES_TEST_DB");
    }

    #[test]
    #[serial]
    fn test_default_and_override() {
        env::remove_var("STITCHES_TEST_MISSING");
        let output = expand_env_vars(r#"mapset = "${STITCHES_TEST_MISSING:-work}""#).unwrap();
        assert_eq!(output, r#"mapset = "work""#);

        env::set_var("STITCHES_TEST_PRESENT", "soils");
        let output = expand_env_vars(r#"mapset = "${STITCHES_TEST_PRESENT:-work}""#).unwrap();
        assert_eq!(output, r#"mapset = "soils""#);
        env::remove_var("STITCHES_TEST_PRESENT");
    }

    #[test]
    fn test_literal_dollars() {
        assert_eq!(expand_env_vars(r#"price = "$$100""#).unwrap(), r#"price = "$100""#);
        assert_eq!(expand_env_vars("a $ b").unwrap(), "a $ b");
        assert_eq!(expand_env_vars("trailing $").unwrap(), "trailing $");
    }

    #[test]
    #[serial]
    fn test_missing_required_var() {
        env::remove_var("STITCHES_TEST_REQUIRED");
        let err = expand_env_vars(r#"key = "${STITCHES_TEST_REQUIRED}""#).unwrap_err();
        assert!(err
            .to_string()
            .contains("Environment variable 'STITCHES_TEST_REQUIRED' is required"));
    }

    #[test]
    fn test_unterminated_reference() {
        assert!(expand_env_vars("key = \"${OPEN").is_err());
    }
}

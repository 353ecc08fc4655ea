//! Front-matter: `#| pip: …` and `#| arg: …` lines embedded in a script.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::ParseError;
use crate::literal::Literal;

const MARKER: &str = "#|";

static PARAMETER_SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>\w+)\s*(?::\s*(?P<caster>[\w.]+))?\s*(?:=\s*(?P<default>.+))?$")
        .expect("parameter spec pattern must compile")
});

/// One `#| prefix: payload` line. Both halves are trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directive<'a> {
    pub line: usize,
    pub prefix: &'a str,
    pub payload: &'a str,
}

/// Yield every front-matter directive in `lines`, skipping anything that is
/// not a `#|` line with a colon.
pub fn scan_lines<'a, I>(lines: I) -> impl Iterator<Item = Directive<'a>>
where
    I: IntoIterator<Item = &'a str>,
{
    lines.into_iter().enumerate().filter_map(|(idx, line)| {
        let rest = line.strip_prefix(MARKER)?;
        let (prefix, payload) = rest.split_once(':')?;
        Some(Directive {
            line: idx + 1,
            prefix: prefix.trim(),
            payload: payload.trim(),
        })
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSpec {
    /// Caster name as written; resolved when arguments are bound.
    pub caster: Option<String>,
    pub default: Option<Literal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    pub dependencies: Vec<String>,
    pub parameters: BTreeMap<String, ParameterSpec>,
}

impl Metadata {
    pub fn from_source(source: &str) -> Result<Self, ParseError> {
        Self::from_lines(source.lines())
    }

    pub fn from_lines<'a, I>(lines: I) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut metadata = Metadata::default();
        for directive in scan_lines(lines) {
            match directive.prefix {
                "pip" => metadata.dependencies.push(directive.payload.to_string()),
                "arg" => {
                    let (name, spec) = parse_parameter(directive.payload).map_err(|message| {
                        ParseError::new(
                            directive.line,
                            format!("invalid arg `{}`: {}", directive.payload, message),
                        )
                    })?;
                    metadata.parameters.insert(name, spec);
                }
                other => debug!(line = directive.line, prefix = %other, "ignoring unknown front-matter prefix"),
            }
        }
        Ok(metadata)
    }
}

/// Parse `name[:caster][=default]`.
pub fn parse_parameter(payload: &str) -> Result<(String, ParameterSpec), String> {
    let caps = PARAMETER_SPEC
        .captures(payload)
        .ok_or_else(|| "expected name[:caster][=default]".to_string())?;
    let name = caps["name"].to_string();
    let caster = caps.name("caster").map(|m| m.as_str().to_string());
    let default = caps
        .name("default")
        .map(|m| Literal::parse(m.as_str().trim()))
        .transpose()?;
    Ok((name, ParameterSpec { caster, default }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanner_skips_lines_without_marker_or_colon() {
        let src = "#| pip: requests\n# pip: nope\n#| no colon here\nx = 1\n#|arg:n";
        let found: Vec<(usize, &str, &str)> = scan_lines(src.lines())
            .map(|d| (d.line, d.prefix, d.payload))
            .collect();
        assert_eq!(found, vec![(1, "pip", "requests"), (5, "arg", "n")]);
    }

    #[test]
    fn payload_keeps_later_colons() {
        let found: Vec<Directive> = scan_lines(["#| pip: git+https://example.com/x.git"]).collect();
        assert_eq!(found[0].payload, "git+https://example.com/x.git");
    }

    #[test]
    fn parameter_grammar() {
        let (name, spec) = parse_parameter("count:int=3").unwrap();
        assert_eq!(name, "count");
        assert_eq!(spec.caster.as_deref(), Some("int"));
        assert_eq!(spec.default, Some(Literal::Int(3)));

        let (_, spec) = parse_parameter("base = 'alpine:3.20'").unwrap();
        assert_eq!(spec.caster, None);
        assert_eq!(spec.default, Some(Literal::Str("alpine:3.20".into())));

        let (_, spec) = parse_parameter("flags : json.loads").unwrap();
        assert_eq!(spec.caster.as_deref(), Some("json.loads"));
        assert_eq!(spec.default, None);
    }

    #[test]
    fn malformed_parameters_fail_with_line() {
        assert!(parse_parameter("-bad").is_err());
        assert!(parse_parameter("n:int junk").is_err());
        assert!(parse_parameter("n=undefined_name").is_err());

        let err = Metadata::from_source("x = 1\n#| arg: count:int=\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("count:int="));
    }

    #[test]
    fn dependencies_keep_order_and_last_arg_wins() {
        let src = "#| pip: b\n#| pip: a\n#| pip: b\n#| arg: n:int=1\n#| arg: n=2\n#| future: ignored\n";
        let md = Metadata::from_source(src).unwrap();
        assert_eq!(md.dependencies, vec!["b", "a", "b"]);
        assert_eq!(md.parameters.len(), 1);
        assert_eq!(
            md.parameters["n"],
            ParameterSpec {
                caster: None,
                default: Some(Literal::Int(2))
            }
        );
    }
}

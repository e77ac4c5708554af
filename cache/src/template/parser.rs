//! Hand-rolled scanner for the `{{ ... }}` placeholder language (§4.1, §3 `KeyTemplate`).
//!
//! Grammar, entirely closed: a template is literal text interspersed with `{{ expr }}`
//! blocks, where `expr` is either a dotted field (`.OS`, `.Arch`, `.Workflow`, `.Branch`,
//! `.CommitHash`) or a function call (`getenv "NAME"` / `checksum "glob" "glob" ...`)
//! with double-quoted string arguments. No nesting, no operators, no user-defined
//! functions — matching the design notes' "fixed, closed set of function dispatchers".

use crate::error::{Error, Result};
use crate::template::BuildContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Os,
    Arch,
    Workflow,
    Branch,
    CommitHash,
}

impl Field {
    pub fn resolve<'a>(&self, ctx: &'a BuildContext) -> &'a str {
        match self {
            Field::Os => &ctx.os,
            Field::Arch => &ctx.arch,
            Field::Workflow => &ctx.workflow,
            Field::Branch => &ctx.branch,
            Field::CommitHash => &ctx.commit_hash,
        }
    }

    fn parse(name: &str) -> Result<Self> {
        match name {
            "OS" => Ok(Field::Os),
            "Arch" => Ok(Field::Arch),
            "Workflow" => Ok(Field::Workflow),
            "Branch" => Ok(Field::Branch),
            "CommitHash" => Ok(Field::CommitHash),
            other => Err(Error::configuration(format!("unknown template field '.{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Field(Field),
    Getenv(String),
    Checksum(Vec<String>),
}

/// Parse a whole template into a flat sequence of segments.
pub fn parse(template: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = template;

    loop {
        match rest.find("{{") {
            None => {
                if !rest.is_empty() {
                    segments.push(Segment::Literal(rest.to_string()));
                }
                break;
            }
            Some(start) => {
                if start > 0 {
                    segments.push(Segment::Literal(rest[..start].to_string()));
                }
                let after_open = &rest[start + 2..];
                let end = after_open
                    .find("}}")
                    .ok_or_else(|| Error::configuration("unterminated '{{' in key template"))?;
                let expr = after_open[..end].trim();
                segments.push(parse_expr(expr)?);
                rest = &after_open[end + 2..];
            }
        }
    }

    Ok(segments)
}

fn parse_expr(expr: &str) -> Result<Segment> {
    if let Some(field_name) = expr.strip_prefix('.') {
        return Ok(Segment::Field(Field::parse(field_name)?));
    }

    let (func, args_str) = expr
        .split_once(char::is_whitespace)
        .unwrap_or((expr, ""));
    let args = parse_quoted_args(args_str)?;

    match func {
        "getenv" => {
            if args.len() != 1 {
                return Err(Error::configuration("getenv takes exactly one argument"));
            }
            Ok(Segment::Getenv(args.into_iter().next().unwrap()))
        }
        "checksum" => {
            if args.is_empty() {
                return Err(Error::configuration("checksum takes at least one argument"));
            }
            Ok(Segment::Checksum(args))
        }
        other => Err(Error::configuration(format!("unknown template function '{other}'"))),
    }
}

/// Parse a whitespace-separated sequence of double-quoted strings, e.g.
/// `"**/*.lock" "go.sum"`. No escape sequences are supported; quotes are the only
/// delimiter the language needs.
fn parse_quoted_args(s: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut rest = s.trim();

    while !rest.is_empty() {
        if !rest.starts_with('"') {
            return Err(Error::configuration(format!("expected '\"' in template arguments near {rest:?}")));
        }
        let closing = rest[1..]
            .find('"')
            .ok_or_else(|| Error::configuration("unterminated string in template arguments"))?;
        args.push(rest[1..1 + closing].to_string());
        rest = rest[2 + closing..].trim_start();
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literal_only() {
        assert_eq!(parse("plain").unwrap(), vec![Segment::Literal("plain".into())]);
    }

    #[test]
    fn parses_field_between_literals() {
        let got = parse("k-{{.Branch}}-v").unwrap();
        assert_eq!(
            got,
            vec![
                Segment::Literal("k-".into()),
                Segment::Field(Field::Branch),
                Segment::Literal("-v".into()),
            ]
        );
    }

    #[test]
    fn parses_checksum_with_multiple_globs() {
        let got = parse("{{checksum \"go.sum\" \"**/*.go\"}}").unwrap();
        assert_eq!(got, vec![Segment::Checksum(vec!["go.sum".into(), "**/*.go".into()])]);
    }

    #[test]
    fn rejects_unterminated_block() {
        assert!(parse("k-{{.Branch").is_err());
    }

    #[test]
    fn rejects_unknown_field() {
        assert!(parse("{{.Bogus}}").is_err());
    }
}

//! `${var}` substitution for plan templates such as `pkg_source`.
//!
//! A single `$` not followed by `{` passes through unchanged. Every `${...}`
//! must name a known variable.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
  #[error("unclosed '${{' at position {0}")]
  Unclosed(usize),

  #[error("unknown template variable '{0}'")]
  UnknownVariable(String),
}

/// A segment of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
  Literal(&'a str),
  Variable(&'a str),
}

/// Split a template into literal and variable segments.
pub fn parse(template: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
  let mut segments = Vec::new();
  let mut rest = template;
  let mut offset = 0;

  while let Some(start) = rest.find("${") {
    if start > 0 {
      segments.push(Segment::Literal(&rest[..start]));
    }
    let after = &rest[start + 2..];
    let end = after.find('}').ok_or(TemplateError::Unclosed(offset + start))?;
    segments.push(Segment::Variable(after[..end].trim()));

    let consumed = start + 2 + end + 1;
    offset += consumed;
    rest = &rest[consumed..];
  }

  if !rest.is_empty() {
    segments.push(Segment::Literal(rest));
  }

  Ok(segments)
}

/// Render `template`, looking variables up in `vars`.
pub fn render(template: &str, vars: &[(&str, &str)]) -> Result<String, TemplateError> {
  let mut out = String::with_capacity(template.len());
  for segment in parse(template)? {
    match segment {
      Segment::Literal(text) => out.push_str(text),
      Segment::Variable(name) => {
        let value = vars
          .iter()
          .find(|(key, _)| *key == name)
          .map(|(_, value)| *value)
          .ok_or_else(|| TemplateError::UnknownVariable(name.to_string()))?;
        out.push_str(value);
      }
    }
  }
  Ok(out)
}

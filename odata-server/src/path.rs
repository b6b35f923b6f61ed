// Resource path parsing: `/Set`, `/Set(key)`, `/Set(key)/Prop[/$value]`,
// `/Set(key)/Ns.Function(arg=literal)` and `/Set/$count`.

use odata_core::{ODataError, ODataResult};
use percent_encoding::percent_decode_str;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    /// `None` addresses the service document.
    pub entity_set: Option<String>,
    /// Raw key predicate between the parentheses.
    pub key: Option<String>,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Property(String),
    Value,
    Count,
    Function { name: String, arguments: Vec<(String, String)> },
}

impl ResourcePath {
    pub fn parse(path: &str) -> ODataResult<Self> {
        let decoded = percent_decode_str(path)
            .decode_utf8()
            .map_err(|_| ODataError::bad_request(format!("Path '{}' is not valid UTF-8", path)))?;
        let mut raw_segments = split_top_level(decoded.trim_start_matches('/'), '/')?.into_iter();

        let Some(first) = raw_segments.next().filter(|s| !s.is_empty()) else {
            return Ok(ResourcePath {
                entity_set: None,
                key: None,
                segments: Vec::new(),
            });
        };
        let (entity_set, key) = match split_call(first)? {
            (name, Some(key)) => (name.to_string(), Some(key.to_string())),
            (name, None) => (name.to_string(), None),
        };

        let mut segments = Vec::new();
        for raw in raw_segments {
            let segment = match raw {
                "" => continue,
                "$value" => Segment::Value,
                "$count" => Segment::Count,
                _ if raw.starts_with('$') => {
                    return Err(ODataError::not_implemented(format!("Path segment '{}' is not supported", raw)))
                }
                _ => match split_call(raw)? {
                    (name, Some(args)) => Segment::Function {
                        name: name.to_string(),
                        arguments: parse_arguments(args)?,
                    },
                    (name, None) => Segment::Property(name.to_string()),
                },
            };
            segments.push(segment);
        }

        Ok(ResourcePath {
            entity_set: Some(entity_set),
            key,
            segments,
        })
    }
}

/// `Name(inner)` into its name and the text between the parentheses.
fn split_call(segment: &str) -> ODataResult<(&str, Option<&str>)> {
    let Some(open) = segment.find('(') else {
        return Ok((segment, None));
    };
    let inner = segment[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| ODataError::bad_request(format!("Unbalanced parentheses in '{}'", segment)))?;
    let name = &segment[..open];
    if name.is_empty() {
        return Err(ODataError::bad_request(format!("Missing name before '(' in '{}'", segment)));
    }
    Ok((name, Some(inner)))
}

/// Split on `separator` outside quotes and parentheses.
pub fn split_top_level(text: &str, separator: char) -> ODataResult<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ODataError::bad_request(format!("Unbalanced parentheses in '{}'", text)))?;
            }
            c if c == separator && !in_quote && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if in_quote || depth != 0 {
        return Err(ODataError::bad_request(format!("Unterminated literal in '{}'", text)));
    }
    parts.push(&text[start..]);
    Ok(parts)
}

/// `a=1,b='x'` into name/literal pairs.
fn parse_arguments(text: &str) -> ODataResult<Vec<(String, String)>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    split_top_level(text, ',')?
        .into_iter()
        .map(|pair| {
            let (name, literal) = pair
                .split_once('=')
                .ok_or_else(|| ODataError::bad_request(format!("Expected name=value, found '{}'", pair)))?;
            Ok((name.trim().to_string(), literal.trim().to_string()))
        })
        .collect()
}

//! Parser for the controller's structured `key:value` status replies.
//!
//! Reimplements the original dictionary parser without its Python C-API
//! dependency: a space-separated sequence of `key:value` tokens, values
//! optionally double-quoted with backslash escapes, `TT`/`RT` keys
//! carrying comma-separated reals instead of free text.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplyParseError {
    #[error("unterminated quoted value")]
    UnterminatedQuote,
    #[error("dangling escape character")]
    DanglingEscape,
    #[error("token {0:?} is missing a `:` separator")]
    MissingSeparator(String),
    #[error("key {key} expects a comma-separated real list, got {value:?}")]
    NotReal { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyValue {
    Text(String),
    Reals(Vec<f64>),
}

fn is_real_key(key: &str) -> bool {
    key == "TT" || key == "RT"
}

fn tokenize(input: &str) -> Result<Vec<String>, ReplyParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => return Err(ReplyParseError::DanglingEscape),
            },
            '"' => in_quotes = !in_quotes,
            ' ' if !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            other => current.push(other),
        }
    }
    if in_quotes {
        return Err(ReplyParseError::UnterminatedQuote);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Parse a space-separated `key:value` reply into a mapping.
///
/// `TT`/`RT` keys are stored lowercased (`tt`/`rt`), matching the
/// original parser's `buf[0] = buf[0] == 'R' ? 'r' : 't'` transform
/// before it sets the dict entry; every other key is stored verbatim.
pub fn parse_reply(input: &str) -> Result<HashMap<String, ReplyValue>, ReplyParseError> {
    let mut map = HashMap::new();
    for token in tokenize(input)? {
        let (key, value) = token
            .split_once(':')
            .ok_or_else(|| ReplyParseError::MissingSeparator(token.clone()))?;
        let (stored_key, value) = if is_real_key(key) {
            let reals = value
                .split(',')
                .map(|part| {
                    part.trim().parse::<f64>().map_err(|_| ReplyParseError::NotReal {
                        key: key.to_string(),
                        value: value.to_string(),
                    })
                })
                .collect::<Result<Vec<f64>, _>>()?;
            (key.to_lowercase(), ReplyValue::Reals(reals))
        } else {
            (key.to_string(), ReplyValue::Text(value.to_string()))
        };
        map.insert(stored_key, value);
    }
    Ok(map)
}

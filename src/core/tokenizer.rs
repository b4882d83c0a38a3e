// src/core/tokenizer.rs

//! Quote-aware word splitting for command lines.
//!
//! This is not a shell: there are no pipes, redirections or globs. A line is
//! split on whitespace outside quotes, each word is un-quoted when it is a
//! complete quoted literal, and leading `KEY=VALUE` words become per-invocation
//! environment overrides.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("No binary found in command line '{0}'.")]
    EmptyCommand(String),
}

/// One tokenized statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub binary: String,
    pub args: Vec<String>,
    /// Leading assignment words, in order.
    pub env: Vec<String>,
}

/// Returns `true` for characters in the Unicode `Quotation_Mark` property.
pub fn is_quotation_mark(c: char) -> bool {
    matches!(
        c,
        '"' | '\''
            | '\u{00AB}'
            | '\u{00BB}'
            | '\u{2018}'..='\u{201F}'
            | '\u{2039}'
            | '\u{203A}'
            | '\u{2E42}'
            | '\u{300C}'..='\u{300F}'
            | '\u{301D}'..='\u{301F}'
            | '\u{FE41}'..='\u{FE44}'
            | '\u{FF02}'
            | '\u{FF07}'
            | '\u{FF62}'
            | '\u{FF63}'
    )
}

/// Splits `text` on `separator` (whitespace when `None`) outside quoted spans.
///
/// A quoted span opens on any quotation mark and closes on the same character.
/// Empty fields are dropped.
pub fn split_quoted(text: &str, separator: Option<char>) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut open_quote: Option<char> = None;

    for c in text.chars() {
        match open_quote {
            Some(q) if c == q => {
                open_quote = None;
                current.push(c);
            }
            Some(_) => current.push(c),
            None if is_quotation_mark(c) => {
                open_quote = Some(c);
                current.push(c);
            }
            None => {
                let splits = match separator {
                    Some(sep) => c == sep,
                    None => c.is_whitespace(),
                };
                if splits {
                    if !current.is_empty() {
                        fields.push(std::mem::take(&mut current));
                    }
                } else {
                    current.push(c);
                }
            }
        }
    }
    if !current.is_empty() {
        fields.push(current);
    }
    fields
}

/// Decodes a word that is a complete quoted literal; anything else, including
/// malformed literals, is returned unchanged.
///
/// - `"..."` decodes the escapes `\a \b \f \n \r \t \v \\ \"`, `\xHH`, `\OOO`
///   (octal), `\uHHHH` and `\UHHHHHHHH`.
/// - `` `...` `` is raw: nothing is decoded, carriage returns are dropped.
/// - `'...'` holds exactly one character or escape, so `'ab'` stays as it is.
pub fn unquote(word: &str) -> String {
    decode_literal(word).unwrap_or_else(|| word.to_string())
}

fn decode_literal(word: &str) -> Option<String> {
    let quote = word.chars().next()?;
    let body = word.strip_prefix(quote)?.strip_suffix(quote)?;
    match quote {
        '`' => (!body.contains('`')).then(|| body.replace('\r', "")),
        '"' => decode_escaped(body, quote),
        '\'' => decode_escaped(body, quote).filter(|decoded| decoded.chars().count() == 1),
        _ => None,
    }
}

fn decode_escaped(body: &str, quote: char) -> Option<String> {
    let mut bytes = Vec::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == quote || c == '\n' {
            return None;
        }
        if c != '\\' {
            let mut buf = [0; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let escape = chars.next()?;
        match escape {
            'a' => bytes.push(0x07),
            'b' => bytes.push(0x08),
            'f' => bytes.push(0x0C),
            'n' => bytes.push(b'\n'),
            'r' => bytes.push(b'\r'),
            't' => bytes.push(b'\t'),
            'v' => bytes.push(0x0B),
            '\\' => bytes.push(b'\\'),
            '"' if quote == '"' => bytes.push(b'"'),
            '\'' if quote == '\'' => bytes.push(b'\''),
            'x' => bytes.push(u8::from_str_radix(&take_digits(&mut chars, 2, 16)?, 16).ok()?),
            '0'..='7' => {
                let digits = format!("{escape}{}", take_digits(&mut chars, 2, 8)?);
                bytes.push(u8::from_str_radix(&digits, 8).ok()?);
            }
            'u' | 'U' => {
                let width = if escape == 'u' { 4 } else { 8 };
                let code = u32::from_str_radix(&take_digits(&mut chars, width, 16)?, 16).ok()?;
                let decoded = char::from_u32(code)?;
                let mut buf = [0; 4];
                bytes.extend_from_slice(decoded.encode_utf8(&mut buf).as_bytes());
            }
            _ => return None,
        }
    }
    String::from_utf8(bytes).ok()
}

fn take_digits(chars: &mut std::str::Chars<'_>, count: usize, radix: u32) -> Option<String> {
    let digits: String = chars.take(count).collect();
    (digits.chars().count() == count && digits.chars().all(|c| c.is_digit(radix))).then_some(digits)
}

/// Tokenizes a single statement into binary, arguments and leading assignments.
pub fn parse_command(line: &str) -> Result<CommandLine, TokenizeError> {
    let mut words = split_quoted(line, None)
        .into_iter()
        .map(|word| unquote(&word))
        .peekable();

    let mut env = Vec::new();
    while let Some(word) = words.next_if(|w| w.contains('=')) {
        env.push(word);
    }

    let binary = words
        .next()
        .ok_or_else(|| TokenizeError::EmptyCommand(line.trim().to_string()))?;

    Ok(CommandLine {
        binary,
        args: words.collect(),
        env,
    })
}

/// Non-blank statements of a multi-line command text, trimmed of spaces and tabs.
pub fn statements(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(|line| line.trim_matches([' ', '\t', '\r']))
        .filter(|line| !line.trim().is_empty())
}

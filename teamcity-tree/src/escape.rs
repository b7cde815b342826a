// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Escaping for service message attribute values.
//!
//! Every attribute value in a `##teamcity[...]` line is a single-quoted string. Characters that
//! would terminate the value or the line are written as `|` followed by a substitute character:
//!
//! | Character | Escaped |
//! |-----------|---------|
//! | `\n`      | `\|n`   |
//! | `\r`      | `\|r`   |
//! | `U+0085`  | `\|x`   |
//! | `U+2028`  | `\|l`   |
//! | `U+2029`  | `\|p`   |
//! | `\|`      | `\|\|`  |
//! | `'`       | `\|'`   |
//! | `[`       | `\|[`   |
//! | `]`       | `\|]`   |

use crate::errors::UnescapeError;
use std::borrow::Cow;

const ESCAPE_CHAR: char = '|';

/// Returns the substitute written after `|` for `c`, or `None` if `c` passes through unchanged.
#[inline]
fn substitute(c: char) -> Option<char> {
    let sub = match c {
        '\n' => 'n',
        '\r' => 'r',
        '\u{0085}' => 'x',
        '\u{2028}' => 'l',
        '\u{2029}' => 'p',
        '|' => '|',
        '\'' => '\'',
        '[' => '[',
        ']' => ']',
        _ => return None,
    };
    Some(sub)
}

fn original(sub: char) -> Option<char> {
    let c = match sub {
        'n' => '\n',
        'r' => '\r',
        'x' => '\u{0085}',
        'l' => '\u{2028}',
        'p' => '\u{2029}',
        '|' => '|',
        '\'' => '\'',
        '[' => '[',
        ']' => ']',
        _ => return None,
    };
    Some(c)
}

/// Escapes `text` so that it can be used as a service message attribute value.
///
/// If `text` contains nothing that needs escaping, it is returned as-is (borrowed), without
/// allocating.
pub fn escape(text: &str) -> Cow<'_, str> {
    let Some(first) = text.find(|c: char| substitute(c).is_some()) else {
        return Cow::Borrowed(text);
    };

    // Most values have at most a handful of escapable characters.
    let mut out = String::with_capacity(text.len() + 8);
    out.push_str(&text[..first]);
    for c in text[first..].chars() {
        match substitute(c) {
            Some(sub) => {
                out.push(ESCAPE_CHAR);
                out.push(sub);
            }
            None => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Reverses [`escape`].
///
/// Returns an error for a trailing `|` or a `|` followed by a character that `escape` never
/// produces.
pub fn unescape(text: &str) -> Result<Cow<'_, str>, UnescapeError> {
    let Some(first) = text.find(ESCAPE_CHAR) else {
        return Ok(Cow::Borrowed(text));
    };

    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..first]);

    let mut chars = text[first..].char_indices();
    while let Some((idx, c)) = chars.next() {
        if c != ESCAPE_CHAR {
            out.push(c);
            continue;
        }
        let position = first + idx;
        match chars.next() {
            Some((_, sub)) => match original(sub) {
                Some(c) => out.push(c),
                None => return Err(UnescapeError::UnknownSubstitute { position, sub }),
            },
            None => return Err(UnescapeError::Dangling { position }),
        }
    }

    Ok(Cow::Owned(out))
}

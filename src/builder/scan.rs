//! Placeholder lexer.
//!
//! Splits statement text into plain SQL, quoted/commented regions and
//! placeholders. This is not a SQL parser: it only knows enough to avoid
//! treating `?` or `:name` inside literals, quoted identifiers and comments
//! as placeholders.

/// A lexical piece of statement text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token<'a> {
    /// Plain SQL outside any literal.
    Sql(&'a str),
    /// String literal, quoted identifier or comment, copied verbatim.
    Quoted(&'a str),
    /// `?`
    Positional,
    /// `:name` (the name without the colon)
    Named(&'a str),
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn flush<'a>(tokens: &mut Vec<Token<'a>>, sql: &'a str, from: usize, to: usize) {
    if from < to {
        tokens.push(Token::Sql(&sql[from..to]));
    }
}

/// Tokenize statement text.
///
/// Concatenating the `Sql` and `Quoted` pieces together with the original
/// placeholder spellings reproduces the input exactly.
pub(crate) fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut run_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                flush(&mut tokens, sql, run_start, i);
                let end = bytes[i + 1..]
                    .iter()
                    .position(|&b| b == quote)
                    .map(|p| i + 1 + p + 1)
                    .unwrap_or(bytes.len());
                tokens.push(Token::Quoted(&sql[i..end]));
                i = end;
                run_start = i;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                flush(&mut tokens, sql, run_start, i);
                let end = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map(|p| i + p)
                    .unwrap_or(bytes.len());
                tokens.push(Token::Quoted(&sql[i..end]));
                i = end;
                run_start = i;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                flush(&mut tokens, sql, run_start, i);
                let end = sql[i + 2..]
                    .find("*/")
                    .map(|p| i + 2 + p + 2)
                    .unwrap_or(bytes.len());
                tokens.push(Token::Quoted(&sql[i..end]));
                i = end;
                run_start = i;
            }
            b'?' => {
                flush(&mut tokens, sql, run_start, i);
                tokens.push(Token::Positional);
                i += 1;
                run_start = i;
            }
            b':' if bytes.get(i + 1) == Some(&b':') => {
                // `::type` cast
                i += 2;
            }
            b':' if bytes.get(i + 1).copied().is_some_and(is_name_start) => {
                flush(&mut tokens, sql, run_start, i);
                let name_end = bytes[i + 1..]
                    .iter()
                    .position(|&b| !is_name_char(b))
                    .map(|p| i + 1 + p)
                    .unwrap_or(bytes.len());
                tokens.push(Token::Named(&sql[i + 1..name_end]));
                i = name_end;
                run_start = i;
            }
            _ => i += 1,
        }
    }
    flush(&mut tokens, sql, run_start, bytes.len());
    tokens
}

/// Count `?` placeholders.
pub(crate) fn positional_count(tokens: &[Token<'_>]) -> usize {
    tokens.iter().filter(|t| matches!(t, Token::Positional)).count()
}

/// Count `:name` placeholders (each occurrence).
pub(crate) fn named_count(tokens: &[Token<'_>]) -> usize {
    tokens.iter().filter(|t| matches!(t, Token::Named(_))).count()
}

/// Copy of `sql` with every quoted region and comment blanked out.
///
/// Byte offsets in the mask line up with the original, so keyword and
/// parenthesis searches on the mask can slice the original text.
pub(crate) fn mask(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    for token in tokenize(sql) {
        match token {
            Token::Sql(s) => out.push_str(s),
            Token::Quoted(s) => out.extend(std::iter::repeat_n(' ', s.len())),
            Token::Positional => out.push('?'),
            Token::Named(name) => {
                out.push(':');
                out.push_str(name);
            }
        }
    }
    out
}

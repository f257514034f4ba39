//! Placeholder dialect rewriting.

use super::scan::{Token, tokenize};
use crate::models::{BindStyle, Statement};
use std::fmt::Write as _;

/// Rewrite `?` placeholders into `style`, keeping argument order.
///
/// `Question` returns the statement unchanged. Placeholders inside
/// literals and comments are left alone.
pub fn rebind(stmt: Statement, style: BindStyle) -> Statement {
    if style == BindStyle::Question {
        return stmt;
    }

    let (text, args) = stmt.into_parts();
    let mut out = String::with_capacity(text.len() + args.len() * 2);
    let mut n = 0usize;
    for token in tokenize(&text) {
        match token {
            Token::Sql(s) | Token::Quoted(s) => out.push_str(s),
            Token::Named(name) => {
                out.push(':');
                out.push_str(name);
            }
            Token::Positional => {
                n += 1;
                // Writing to a String cannot fail.
                let _ = match style {
                    BindStyle::Dollar => write!(out, "${n}"),
                    BindStyle::Named => write!(out, ":arg{n}"),
                    BindStyle::At => write!(out, "@p{n}"),
                    BindStyle::Question => write!(out, "?"),
                };
            }
        }
    }
    Statement::from_parts(out, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::bind_positional;
    use crate::models::Value;

    fn stmt() -> Statement {
        bind_positional(
            "select * from t where a = ? and b = '?' and c = ?",
            [Value::Int(1), Value::from("x")],
        )
        .unwrap()
    }

    #[test]
    fn test_question_is_identity() {
        assert_eq!(rebind(stmt(), BindStyle::Question), stmt());
    }

    #[test]
    fn test_dollar() {
        let out = rebind(stmt(), BindStyle::Dollar);
        assert_eq!(out.text(), "select * from t where a = $1 and b = '?' and c = $2");
        assert_eq!(out.args(), stmt().args());
    }

    #[test]
    fn test_named_and_at() {
        assert_eq!(
            rebind(stmt(), BindStyle::Named).text(),
            "select * from t where a = :arg1 and b = '?' and c = :arg2"
        );
        assert_eq!(
            rebind(stmt(), BindStyle::At).text(),
            "select * from t where a = @p1 and b = '?' and c = @p2"
        );
    }

    #[test]
    fn test_many_placeholders() {
        let text = vec!["?"; 12].join(", ");
        let out = rebind(Statement::raw(format!("values ({text})")), BindStyle::Dollar);
        assert!(out.text().ends_with("$11, $12)"));
    }
}

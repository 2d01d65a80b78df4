//! Tokenizer for filter expressions.

use crate::Result;
use crate::error::SiftError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Ident(String),
    Str(String),
    Int(i64),
    True,
    False,
    In,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Minus,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Ident(name) => write!(f, "identifier '{}'", name),
            TokenKind::Str(_) => write!(f, "string literal"),
            TokenKind::Int(value) => write!(f, "integer {}", value),
            TokenKind::True => write!(f, "'true'"),
            TokenKind::False => write!(f, "'false'"),
            TokenKind::In => write!(f, "'in'"),
            TokenKind::And => write!(f, "'&&'"),
            TokenKind::Or => write!(f, "'||'"),
            TokenKind::Not => write!(f, "'!'"),
            TokenKind::Eq => write!(f, "'=='"),
            TokenKind::Ne => write!(f, "'!='"),
            TokenKind::Lt => write!(f, "'<'"),
            TokenKind::Le => write!(f, "'<='"),
            TokenKind::Gt => write!(f, "'>'"),
            TokenKind::Ge => write!(f, "'>='"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::LBracket => write!(f, "'['"),
            TokenKind::RBracket => write!(f, "']'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Dot => write!(f, "'.'"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

/// A token and the byte offset where it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) offset: usize,
}

/// Splits `source` into tokens, always ending with `Eof`.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let kind = match c {
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match ident.as_str() {
                    "true" => TokenKind::True,
                    "false" => TokenKind::False,
                    "in" => TokenKind::In,
                    _ => TokenKind::Ident(ident),
                }
            }
            '0'..='9' => {
                let mut digits = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        digits.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = digits.parse::<i64>().map_err(|_| {
                    SiftError::filter_parse(format!("integer literal {} out of range", digits), offset)
                })?;
                TokenKind::Int(value)
            }
            '"' | '\'' => {
                chars.next();
                TokenKind::Str(read_string(&mut chars, c, offset)?)
            }
            _ => {
                chars.next();
                let next = chars.peek().map(|&(_, c)| c);
                let (kind, two_chars) = match (c, next) {
                    ('=', Some('=')) => (TokenKind::Eq, true),
                    ('!', Some('=')) => (TokenKind::Ne, true),
                    ('<', Some('=')) => (TokenKind::Le, true),
                    ('>', Some('=')) => (TokenKind::Ge, true),
                    ('&', Some('&')) => (TokenKind::And, true),
                    ('|', Some('|')) => (TokenKind::Or, true),
                    ('!', _) => (TokenKind::Not, false),
                    ('<', _) => (TokenKind::Lt, false),
                    ('>', _) => (TokenKind::Gt, false),
                    ('-', _) => (TokenKind::Minus, false),
                    ('(', _) => (TokenKind::LParen, false),
                    (')', _) => (TokenKind::RParen, false),
                    ('[', _) => (TokenKind::LBracket, false),
                    (']', _) => (TokenKind::RBracket, false),
                    (',', _) => (TokenKind::Comma, false),
                    ('.', _) => (TokenKind::Dot, false),
                    _ => {
                        return Err(SiftError::filter_parse(
                            format!("unexpected character '{}'", c),
                            offset,
                        ));
                    }
                };
                if two_chars {
                    chars.next();
                }
                kind
            }
        };

        tokens.push(Token { kind, offset });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        offset: source.len(),
    });
    Ok(tokens)
}

fn read_string(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    quote: char,
    start: usize,
) -> Result<String> {
    let mut value = String::new();

    while let Some((offset, c)) = chars.next() {
        match c {
            c if c == quote => return Ok(value),
            '\\' => {
                let escaped = match chars.next() {
                    Some((_, '\\')) => '\\',
                    Some((_, '"')) => '"',
                    Some((_, '\'')) => '\'',
                    Some((_, 'n')) => '\n',
                    Some((_, 't')) => '\t',
                    Some((_, 'r')) => '\r',
                    Some((_, other)) => {
                        return Err(SiftError::filter_parse(
                            format!("invalid escape sequence '\\{}'", other),
                            offset,
                        ));
                    }
                    None => break,
                };
                value.push(escaped);
            }
            c => value.push(c),
        }
    }

    Err(SiftError::filter_parse("unterminated string literal", start))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn test_tokenize_comparison() {
        assert_eq!(
            kinds(r#"Name == "mail""#),
            vec![
                TokenKind::Ident("Name".to_string()),
                TokenKind::Eq,
                TokenKind::Str("mail".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_operators() {
        assert_eq!(
            kinds("!a && b || c != d <= e >= f < g > h - 1"),
            vec![
                TokenKind::Not,
                TokenKind::Ident("a".to_string()),
                TokenKind::And,
                TokenKind::Ident("b".to_string()),
                TokenKind::Or,
                TokenKind::Ident("c".to_string()),
                TokenKind::Ne,
                TokenKind::Ident("d".to_string()),
                TokenKind::Le,
                TokenKind::Ident("e".to_string()),
                TokenKind::Ge,
                TokenKind::Ident("f".to_string()),
                TokenKind::Lt,
                TokenKind::Ident("g".to_string()),
                TokenKind::Gt,
                TokenKind::Ident("h".to_string()),
                TokenKind::Minus,
                TokenKind::Int(1),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_string_escapes_and_quotes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\"b\\c\n""#),
            vec![
                TokenKind::Str("it's".to_string()),
                TokenKind::Str("a\"b\\c\n".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_keywords() {
        assert_eq!(
            kinds("true false in"),
            vec![TokenKind::True, TokenKind::False, TokenKind::In, TokenKind::Eof]
        );
    }

    #[test]
    fn test_token_offsets() {
        let tokens = tokenize("  Name").unwrap();
        assert_eq!(tokens[0].offset, 2);
        assert_eq!(tokens[1].offset, 6);
    }

    #[test]
    fn test_unterminated_string_fails() {
        let err = tokenize(r#"Name == "mail"#).unwrap_err();
        assert!(matches!(err, SiftError::FilterParse { offset: 8, .. }));
    }

    #[test]
    fn test_single_equals_fails() {
        let err = tokenize("Name = 'x'").unwrap_err();
        assert!(err.to_string().contains("unexpected character '='"));
    }

    #[test]
    fn test_integer_overflow_fails() {
        assert!(tokenize("99999999999999999999").is_err());
    }
}

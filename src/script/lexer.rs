use super::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Let,
    If,
    Else,
    True,
    False,
    Null,
    And,
    Or,
    Not,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Semi,
    Question,
    Colon,
    Coalesce,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

#[derive(Debug, Clone)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>, CompileError> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            i = scan_number(bytes, i);
            let text = &src[start..i];
            let n = text
                .parse::<f64>()
                .map_err(|_| CompileError::new(format!("invalid number '{text}'"), start))?;
            out.push(Spanned {
                token: Token::Num(n),
                offset: start,
            });
            continue;
        }
        if c == b'"' || c == b'\'' {
            let (s, next) = scan_string(src, i)?;
            i = next;
            out.push(Spanned {
                token: Token::Str(s),
                offset: start,
            });
            continue;
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let token = match &src[start..i] {
                "let" => Token::Let,
                "if" => Token::If,
                "else" => Token::Else,
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                word => Token::Ident(word.to_string()),
            };
            out.push(Spanned {
                token,
                offset: start,
            });
            continue;
        }

        let next = bytes.get(i + 1).copied();
        let (token, len) = match (c, next) {
            (b'=', Some(b'=')) => {
                // `===` is accepted as plain equality
                let len = if bytes.get(i + 2) == Some(&b'=') { 3 } else { 2 };
                (Token::Eq, len)
            }
            (b'!', Some(b'=')) => {
                let len = if bytes.get(i + 2) == Some(&b'=') { 3 } else { 2 };
                (Token::Ne, len)
            }
            (b'<', Some(b'=')) => (Token::Le, 2),
            (b'>', Some(b'=')) => (Token::Ge, 2),
            (b'&', Some(b'&')) => (Token::And, 2),
            (b'|', Some(b'|')) => (Token::Or, 2),
            (b'?', Some(b'?')) => (Token::Coalesce, 2),
            (b'*', Some(b'*')) => (Token::Caret, 2),
            (b'=', _) => (Token::Assign, 1),
            (b'!', _) => (Token::Not, 1),
            (b'<', _) => (Token::Lt, 1),
            (b'>', _) => (Token::Gt, 1),
            (b'?', _) => (Token::Question, 1),
            (b':', _) => (Token::Colon, 1),
            (b'+', _) => (Token::Plus, 1),
            (b'-', _) => (Token::Minus, 1),
            (b'*', _) => (Token::Star, 1),
            (b'/', _) => (Token::Slash, 1),
            (b'%', _) => (Token::Percent, 1),
            (b'^', _) => (Token::Caret, 1),
            (b'(', _) => (Token::LParen, 1),
            (b')', _) => (Token::RParen, 1),
            (b'[', _) => (Token::LBracket, 1),
            (b']', _) => (Token::RBracket, 1),
            (b'{', _) => (Token::LBrace, 1),
            (b'}', _) => (Token::RBrace, 1),
            (b',', _) => (Token::Comma, 1),
            (b'.', _) => (Token::Dot, 1),
            (b';', _) => (Token::Semi, 1),
            _ => {
                let ch = src[i..].chars().next().unwrap_or('?');
                return Err(CompileError::new(format!("unexpected character '{ch}'"), i));
            }
        };
        i += len;
        out.push(Spanned {
            token,
            offset: start,
        });
    }

    out.push(Spanned {
        token: Token::Eof,
        offset: src.len(),
    });
    Ok(out)
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    i
}

fn scan_string(src: &str, start: usize) -> Result<(String, usize), CompileError> {
    let mut chars = src[start..].char_indices();
    let (_, quote) = chars.next().unwrap_or((0, '"'));
    let mut out = String::new();
    while let Some((off, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((out, start + off + c.len_utf8())),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c => out.push(c),
        }
    }
    Err(CompileError::new("unterminated string", start))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn operators_and_literals() {
        assert_eq!(
            kinds("r.au >= 0.5 && r['rock type'] === \"OX\""),
            vec![
                Token::Ident("r".into()),
                Token::Dot,
                Token::Ident("au".into()),
                Token::Ge,
                Token::Num(0.5),
                Token::And,
                Token::Ident("r".into()),
                Token::LBracket,
                Token::Str("rock type".into()),
                Token::RBracket,
                Token::Eq,
                Token::Str("OX".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn numbers_comments_and_power() {
        assert_eq!(
            kinds("1.5e3 ** 2 // squared\n?? .5"),
            vec![
                Token::Num(1500.0),
                Token::Caret,
                Token::Num(2.0),
                Token::Coalesce,
                Token::Num(0.5),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn bad_input_reports_offset() {
        let err = tokenize("r.x @ 2").unwrap_err();
        assert_eq!(err.offset, 4);
        assert!(tokenize("'open").is_err());
    }
}

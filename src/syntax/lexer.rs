use super::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(f64),
    Str(String),
    /// `:=`
    Assign,
    LParen,
    RParen,
    Comma,
    Semi,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

/// Split module source into tokens. `#` starts a comment running to end of line.
pub fn tokenize(path: &str, source: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;
    let mut col = 1;

    while i < chars.len() {
        let c = chars[i];
        let (start_line, start_col) = (line, col);
        let error = |message: String| ParseError::new(path, start_line, start_col, message);

        if c == '\n' {
            i += 1;
            line += 1;
            col = 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            col += 1;
            continue;
        }
        if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        let kind = if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            col += i - start;
            TokenKind::Ident(chars[start..i].iter().collect())
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            col += i - start;
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| error(format!("invalid number `{}`", text)))?;
            TokenKind::Number(value)
        } else if c == '"' {
            i += 1;
            col += 1;
            let mut text = String::new();
            loop {
                match chars.get(i) {
                    None | Some('\n') => return Err(error("unterminated string".to_string())),
                    Some('"') => {
                        i += 1;
                        col += 1;
                        break;
                    }
                    Some('\\') => {
                        let escaped = match chars.get(i + 1) {
                            Some('n') => '\n',
                            Some('t') => '\t',
                            Some(&other) => other,
                            None => return Err(error("unterminated string".to_string())),
                        };
                        text.push(escaped);
                        i += 2;
                        col += 2;
                    }
                    Some(&other) => {
                        text.push(other);
                        i += 1;
                        col += 1;
                    }
                }
            }
            TokenKind::Str(text)
        } else {
            let next = chars.get(i + 1).copied();
            let (kind, width) = match (c, next) {
                (':', Some('=')) => (TokenKind::Assign, 2),
                ('!', Some('=')) => (TokenKind::NotEq, 2),
                ('<', Some('>')) => (TokenKind::NotEq, 2),
                ('<', Some('=')) => (TokenKind::LtEq, 2),
                ('>', Some('=')) => (TokenKind::GtEq, 2),
                ('=', Some('=')) => (TokenKind::Eq, 2),
                ('=', _) => (TokenKind::Eq, 1),
                ('<', _) => (TokenKind::Lt, 1),
                ('>', _) => (TokenKind::Gt, 1),
                ('(', _) => (TokenKind::LParen, 1),
                (')', _) => (TokenKind::RParen, 1),
                (',', _) => (TokenKind::Comma, 1),
                (';', _) => (TokenKind::Semi, 1),
                ('+', _) => (TokenKind::Plus, 1),
                ('-', _) => (TokenKind::Minus, 1),
                ('*', _) => (TokenKind::Star, 1),
                ('/', _) => (TokenKind::Slash, 1),
                _ => return Err(error(format!("unexpected character `{}`", c))),
            };
            i += width;
            col += width;
            kind
        };

        tokens.push(Token {
            kind,
            line: start_line,
            col: start_col,
        });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        line,
        col,
    });

    Ok(tokens)
}

//! Byte-by-byte scanner that turns source text into a token stream.
//!
//! The lexer never panics: every failure mode (unterminated string/comment,
//! invalid escape, invalid number, unknown byte) is reported as an
//! `Error`-kind token carrying its source position, so callers can keep
//! scanning and collect every lexical error in one pass (spec.md §4.1).

use crate::token::{Keyword, LexError, Operator, Punctuation, Token, TokenKind};

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src: src.as_bytes(), pos: 0, line: 1, column: 1 }
    }

    /// Scans the entire source into a token stream, terminated by `Eof`.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let done = tok.is_eof();
            tokens.push(tok);
            if done {
                break;
            }
        }
        tokens
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn skip_whitespace_and_comments(&mut self) -> Option<Token> {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.advance();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while self.peek().is_some_and(|b| b != b'\n') {
                        self.advance();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let line = self.line;
                    let column = self.column;
                    self.advance();
                    self.advance();
                    let mut closed = false;
                    while let Some(b) = self.peek() {
                        if b == b'*' && self.peek_at(1) == Some(b'/') {
                            self.advance();
                            self.advance();
                            closed = true;
                            break;
                        }
                        self.advance();
                    }
                    if !closed {
                        return Some(Token::new(
                            TokenKind::Error(LexError::UnterminatedComment),
                            "",
                            line,
                            column,
                        ));
                    }
                }
                _ => return None,
            }
        }
    }

    fn next_token(&mut self) -> Token {
        if let Some(err) = self.skip_whitespace_and_comments() {
            return err;
        }
        let line = self.line;
        let column = self.column;
        let Some(b) = self.peek() else {
            return Token::new(TokenKind::Eof, "", line, column);
        };

        if b.is_ascii_digit() {
            return self.scan_number(line, column);
        }
        if b == b'"' {
            return self.scan_string(line, column);
        }
        if b == b'_' || b.is_ascii_alphabetic() {
            return self.scan_identifier(line, column);
        }
        self.scan_operator(line, column)
    }

    fn scan_number(&mut self, line: u32, column: u32) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mut lookahead = 1;
            if matches!(self.peek_at(1), Some(b'+' | b'-')) {
                lookahead = 2;
            }
            if self.peek_at(lookahead).is_some_and(|b| b.is_ascii_digit()) {
                self.advance();
                if lookahead == 2 {
                    self.advance();
                }
                while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                    self.advance();
                }
            }
        }
        let lexeme = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        match lexeme.parse::<f64>() {
            Ok(n) => Token::new(TokenKind::Number(n), lexeme, line, column),
            Err(_) => Token::new(TokenKind::Error(LexError::InvalidNumber(lexeme.clone())), lexeme, line, column),
        }
    }

    fn scan_string(&mut self, line: u32, column: u32) -> Token {
        self.advance(); // opening quote
        let mut decoded = String::new();
        loop {
            match self.peek() {
                None => {
                    return Token::new(TokenKind::Error(LexError::UnterminatedString), decoded, line, column);
                }
                Some(b'"') => {
                    self.advance();
                    break;
                }
                Some(b'\\') => {
                    self.advance();
                    let Some(escape) = self.peek() else {
                        return Token::new(TokenKind::Error(LexError::UnterminatedString), decoded, line, column);
                    };
                    let decoded_char = match escape {
                        b'"' => '"',
                        b'\\' => '\\',
                        b'/' => '/',
                        b'b' => '\u{8}',
                        b'f' => '\u{c}',
                        b'n' => '\n',
                        b'r' => '\r',
                        b't' => '\t',
                        other => {
                            return Token::new(
                                TokenKind::Error(LexError::InvalidEscape(other as char)),
                                decoded,
                                line,
                                column,
                            );
                        }
                    };
                    self.advance();
                    decoded.push(decoded_char);
                }
                Some(_) => {
                    // Re-decode as UTF-8 a byte at a time is wrong for multi-byte
                    // sequences; step by full char instead.
                    let rest = std::str::from_utf8(&self.src[self.pos..]).unwrap_or("");
                    let Some(ch) = rest.chars().next() else {
                        self.advance();
                        continue;
                    };
                    for _ in 0..ch.len_utf8() {
                        self.advance();
                    }
                    decoded.push(ch);
                }
            }
        }
        Token::new(TokenKind::String(decoded.clone()), decoded, line, column)
    }

    fn scan_identifier(&mut self, line: u32, column: u32) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(|b| b == b'_' || b.is_ascii_alphanumeric()) {
            self.advance();
        }
        let lexeme = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        if let Some(kw) = Keyword::from_str(&lexeme) {
            return Token::new(TokenKind::Keyword(kw), lexeme, line, column);
        }
        Token::new(TokenKind::Identifier(lexeme.clone()), lexeme, line, column)
    }

    fn scan_operator(&mut self, line: u32, column: u32) -> Token {
        // Multi-character operators are matched greedily, longest first.
        const THREE: &[(&[u8], Operator)] = &[(b"..=", Operator::DotDotEq)];
        const TWO: &[(&[u8], Operator)] = &[
            (b"==", Operator::EqEq),
            (b"!=", Operator::NotEq),
            (b"<=", Operator::LtEq),
            (b">=", Operator::GtEq),
            (b"&&", Operator::AndAnd),
            (b"||", Operator::OrOr),
            (b"^^", Operator::XorXor),
            (b"**", Operator::StarStar),
            (b"..", Operator::DotDot),
            (b"<<", Operator::Shl),
            (b">>", Operator::Shr),
            (b"=>", Operator::FatArrow),
        ];
        for (pat, op) in THREE {
            if self.src[self.pos..].starts_with(pat) {
                for _ in 0..3 {
                    self.advance();
                }
                return Token::new(TokenKind::Operator(*op), std::str::from_utf8(pat).unwrap_or(""), line, column);
            }
        }
        for (pat, op) in TWO {
            if self.src[self.pos..].starts_with(pat) {
                for _ in 0..2 {
                    self.advance();
                }
                return Token::new(TokenKind::Operator(*op), std::str::from_utf8(pat).unwrap_or(""), line, column);
            }
        }
        let two_ahead = self.peek_at(1);
        if self.peek() == Some(b'-') && two_ahead == Some(b'>') {
            self.advance();
            self.advance();
            return Token::new(TokenKind::Punctuation(Punctuation::Arrow), "->", line, column);
        }

        let b = self.advance().unwrap_or(b' ');
        let single = match b {
            b'+' => Some(TokenKind::Operator(Operator::Plus)),
            b'-' => Some(TokenKind::Operator(Operator::Minus)),
            b'*' => Some(TokenKind::Operator(Operator::Star)),
            b'/' => Some(TokenKind::Operator(Operator::Slash)),
            b'%' => Some(TokenKind::Operator(Operator::Percent)),
            b'<' => Some(TokenKind::Operator(Operator::Lt)),
            b'>' => Some(TokenKind::Operator(Operator::Gt)),
            b'&' => Some(TokenKind::Operator(Operator::Amp)),
            b'|' => Some(TokenKind::Operator(Operator::Pipe)),
            b'^' => Some(TokenKind::Operator(Operator::Caret)),
            b'!' => Some(TokenKind::Operator(Operator::Not)),
            b'~' => Some(TokenKind::Operator(Operator::Tilde)),
            b'=' => Some(TokenKind::Operator(Operator::Assign)),
            b'.' => Some(TokenKind::Operator(Operator::Dot)),
            b'?' => Some(TokenKind::Operator(Operator::Question)),
            b'(' => Some(TokenKind::Punctuation(Punctuation::LParen)),
            b')' => Some(TokenKind::Punctuation(Punctuation::RParen)),
            b'{' => Some(TokenKind::Punctuation(Punctuation::LBrace)),
            b'}' => Some(TokenKind::Punctuation(Punctuation::RBrace)),
            b'[' => Some(TokenKind::Punctuation(Punctuation::LBracket)),
            b']' => Some(TokenKind::Punctuation(Punctuation::RBracket)),
            b',' => Some(TokenKind::Punctuation(Punctuation::Comma)),
            b':' => Some(TokenKind::Punctuation(Punctuation::Colon)),
            b';' => Some(TokenKind::Punctuation(Punctuation::Semicolon)),
            _ => None,
        };
        match single {
            Some(kind) => Token::new(kind, (b as char).to_string(), line, column),
            None => Token::new(
                TokenKind::Error(LexError::UnknownToken((b as char).to_string())),
                (b as char).to_string(),
                line,
                column,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn numbers_and_arithmetic() {
        let k = kinds("1 + 2 * 3");
        assert_eq!(
            k,
            vec![
                TokenKind::Number(1.0),
                TokenKind::Operator(Operator::Plus),
                TokenKind::Number(2.0),
                TokenKind::Operator(Operator::Star),
                TokenKind::Number(3.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let k = kinds(r#""a\nb""#);
        assert_eq!(k, vec![TokenKind::String("a\nb".into()), TokenKind::Eof]);
    }

    #[test]
    fn unterminated_string_is_an_error_token_not_a_panic() {
        let k = kinds("\"abc");
        assert_eq!(k, vec![TokenKind::Error(LexError::UnterminatedString), TokenKind::Eof]);
    }

    #[test]
    fn keywords_vs_identifiers() {
        let k = kinds("let spore_count");
        assert_eq!(
            k,
            vec![
                TokenKind::Keyword(Keyword::Let),
                TokenKind::Identifier("spore_count".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn range_operators_tokenize_greedily() {
        let k = kinds("0..=10..20");
        assert_eq!(
            k,
            vec![
                TokenKind::Number(0.0),
                TokenKind::Operator(Operator::DotDotEq),
                TokenKind::Number(10.0),
                TokenKind::Operator(Operator::DotDot),
                TokenKind::Number(20.0),
                TokenKind::Eof,
            ]
        );
    }
}

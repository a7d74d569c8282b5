//! Lexical analysis of a single command line.
//!
//! Only the subset of shell syntax the job control engine needs is recognised:
//! words (with quoting and escapes), the background operator and redirections.
//! Pipes are tokenized so the parser can reject them with a clear message.

use thiserror::Error;

/// Represents a token resulting from lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A word with quotes and escapes already removed.
    Word(String),
    /// The background operator, `&`.
    Ampersand,
    /// The pipe operator, `|`.
    Pipe,
    /// Input redirection, `<`.
    RedirectIn,
    /// Output redirection, `>` or `>>`.
    RedirectOut { append: bool },
    /// Error redirection, `2>` or `2>>`.
    RedirectErr { append: bool },
}

/// Errors that can occur during the lexical analysis process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexingError {
    #[error("unterminated quote")]
    UnfinishedQuote,
    #[error("trailing backslash")]
    DanglingEscape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingSingleQuote,
    ReadingDoubleQuote,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
    /// A quoted empty string (`''`) still forms a word.
    has_word: bool,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            buffer: String::new(),
            has_word: false,
        }
    }

    fn make_tokens(&mut self) -> Result<Vec<Token>, LexingError> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start | LexingState::ReadingWord => self.handle_word(ch, &mut out)?,
                LexingState::ReadingSingleQuote => self.handle_single_quote(ch),
                LexingState::ReadingDoubleQuote => self.handle_double_quote(ch)?,
            }
        }

        match self.state {
            LexingState::ReadingSingleQuote | LexingState::ReadingDoubleQuote => {
                return Err(LexingError::UnfinishedQuote);
            }
            _ => {}
        }

        self.finish_word(&mut out);
        Ok(out)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<Token>) -> Result<(), LexingError> {
        match ch {
            ' ' | '\t' => self.finish_word(out),
            '&' => {
                self.finish_word(out);
                out.push(Token::Ampersand);
            }
            '|' => {
                self.finish_word(out);
                out.push(Token::Pipe);
            }
            '<' => {
                self.finish_word(out);
                out.push(Token::RedirectIn);
            }
            '>' => {
                // `2>` only when the 2 stands alone as the start of a word.
                let stderr = self.state == LexingState::ReadingWord && self.buffer == "2" && !self.has_word;
                if stderr {
                    self.buffer.clear();
                    self.state = LexingState::Start;
                } else {
                    self.finish_word(out);
                }
                let append = self.peek_char() == Some('>');
                if append {
                    self.read_char();
                }
                out.push(if stderr {
                    Token::RedirectErr { append }
                } else {
                    Token::RedirectOut { append }
                });
            }
            '\'' => {
                self.has_word = true;
                self.state = LexingState::ReadingSingleQuote;
            }
            '"' => {
                self.has_word = true;
                self.state = LexingState::ReadingDoubleQuote;
            }
            '\\' => {
                let escaped = self.read_char().ok_or(LexingError::DanglingEscape)?;
                self.buffer.push(escaped);
                self.state = LexingState::ReadingWord;
            }
            c => {
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
            }
        }
        Ok(())
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => self.state = LexingState::ReadingWord,
            c => self.buffer.push(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) -> Result<(), LexingError> {
        match ch {
            '"' => self.state = LexingState::ReadingWord,
            '\\' if matches!(self.peek_char(), Some('"' | '\\')) => {
                let escaped = self.read_char().ok_or(LexingError::DanglingEscape)?;
                self.buffer.push(escaped);
            }
            c => self.buffer.push(c),
        }
        Ok(())
    }

    fn finish_word(&mut self, out: &mut Vec<Token>) {
        if !self.buffer.is_empty() || self.has_word {
            out.push(Token::Word(std::mem::take(&mut self.buffer)));
        }
        self.has_word = false;
        self.state = LexingState::Start;
    }
}

/// Split a command line into tokens.
pub fn split_into_tokens(line: &str) -> Result<Vec<Token>, LexingError> {
    LexingFSM::new(line).make_tokens()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(s: &str) -> Token {
        Token::Word(s.to_string())
    }

    #[test]
    fn splits_on_blanks() {
        let tokens = split_into_tokens("  sleep\t10  ").unwrap();
        assert_eq!(tokens, vec![word("sleep"), word("10")]);
    }

    #[test]
    fn quotes_group_words() {
        let tokens = split_into_tokens(r#"echo 'a b' "c \"d\"" e'f'g"#).unwrap();
        assert_eq!(
            tokens,
            vec![word("echo"), word("a b"), word("c \"d\""), word("efg")]
        );
    }

    #[test]
    fn empty_quotes_are_a_word() {
        let tokens = split_into_tokens("printf ''").unwrap();
        assert_eq!(tokens, vec![word("printf"), word("")]);
    }

    #[test]
    fn glued_ampersand() {
        let tokens = split_into_tokens("sleep 5&").unwrap();
        assert_eq!(tokens, vec![word("sleep"), word("5"), Token::Ampersand]);
    }

    #[test]
    fn redirections() {
        let tokens = split_into_tokens("cmd <in >out 2>>err >>log").unwrap();
        assert_eq!(
            tokens,
            vec![
                word("cmd"),
                Token::RedirectIn,
                word("in"),
                Token::RedirectOut { append: false },
                word("out"),
                Token::RedirectErr { append: true },
                word("err"),
                Token::RedirectOut { append: true },
                word("log"),
            ]
        );
    }

    #[test]
    fn two_inside_a_word_is_not_stderr() {
        let tokens = split_into_tokens("echo 12>out").unwrap();
        assert_eq!(
            tokens,
            vec![
                word("echo"),
                word("12"),
                Token::RedirectOut { append: false },
                word("out")
            ]
        );
    }

    #[test]
    fn escaped_operators_are_literal() {
        let tokens = split_into_tokens(r"echo \& \|").unwrap();
        assert_eq!(tokens, vec![word("echo"), word("&"), word("|")]);
    }

    #[test]
    fn unfinished_quote_is_an_error() {
        assert_eq!(
            split_into_tokens("echo 'oops"),
            Err(LexingError::UnfinishedQuote)
        );
        assert_eq!(split_into_tokens("echo \\"), Err(LexingError::DanglingEscape));
    }
}

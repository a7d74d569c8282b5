//! Turns a raw command line into a [`CommandDescriptor`].

use std::path::PathBuf;

use thiserror::Error;

use crate::command::{CommandDescriptor, OutputTarget};
use crate::lexer::{self, LexingError, Token};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error(transparent)]
    Lexing(#[from] LexingError),
    #[error("syntax error near unexpected token `&'")]
    MisplacedAmpersand,
    #[error("pipelines are not supported")]
    PipelineUnsupported,
    #[error("syntax error: redirection without a target")]
    MissingRedirectTarget,
    #[error("syntax error: missing command")]
    MissingCommand,
}

struct DescriptorBuilder {
    tokens: std::vec::IntoIter<Token>,
    words: Vec<String>,
    background: bool,
    stdin: Option<PathBuf>,
    stdout: Option<OutputTarget>,
    stderr: Option<OutputTarget>,
}

impl DescriptorBuilder {
    fn from(tokens: Vec<Token>) -> Self {
        DescriptorBuilder {
            tokens: tokens.into_iter(),
            words: Vec::new(),
            background: false,
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    fn build(mut self, line: &str) -> Result<Option<CommandDescriptor>, ParseError> {
        while let Some(token) = self.tokens.next() {
            if self.background {
                // Something follows the `&`.
                return Err(ParseError::MisplacedAmpersand);
            }
            match token {
                Token::Word(w) => self.words.push(w),
                Token::Ampersand => self.background = true,
                Token::Pipe => return Err(ParseError::PipelineUnsupported),
                Token::RedirectIn => self.stdin = Some(PathBuf::from(self.target()?)),
                Token::RedirectOut { append } => {
                    self.stdout = Some(output_target(self.target()?, append))
                }
                Token::RedirectErr { append } => {
                    self.stderr = Some(output_target(self.target()?, append))
                }
            }
        }

        let mut words = self.words.into_iter();
        let Some(program) = words.next() else {
            if self.background || self.stdin.is_some() || self.stdout.is_some() || self.stderr.is_some() {
                return Err(ParseError::MissingCommand);
            }
            return Ok(None);
        };

        let text = if self.background {
            line.strip_suffix('&').unwrap_or(line).trim_end()
        } else {
            line
        };
        Ok(Some(CommandDescriptor {
            program,
            args: words.collect(),
            background: self.background,
            stdin: self.stdin,
            stdout: self.stdout,
            stderr: self.stderr,
            text: text.to_string(),
        }))
    }

    fn target(&mut self) -> Result<String, ParseError> {
        match self.tokens.next() {
            Some(Token::Word(w)) => Ok(w),
            _ => Err(ParseError::MissingRedirectTarget),
        }
    }
}

fn output_target(path: String, append: bool) -> OutputTarget {
    if append {
        OutputTarget::append(path)
    } else {
        OutputTarget::truncate(path)
    }
}

/// Parse one command line.
///
/// Returns `Ok(None)` for blank input.
pub fn parse_line(line: &str) -> Result<Option<CommandDescriptor>, ParseError> {
    let trimmed = line.trim();
    let tokens = lexer::split_into_tokens(trimmed)?;
    DescriptorBuilder::from(tokens).build(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_is_none() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(parse_line("").unwrap(), None);
    }

    #[test]
    fn simple_command() {
        let desc = parse_line("sleep 10").unwrap().unwrap();
        assert_eq!(desc, CommandDescriptor::new("sleep", ["10"]));
    }

    #[test]
    fn background_strips_ampersand_from_text() {
        let desc = parse_line("sleep 10 &").unwrap().unwrap();
        assert!(desc.background);
        assert_eq!(desc.text, "sleep 10");
        assert_eq!(desc.args, vec!["10".to_string()]);

        let glued = parse_line("sleep 10&").unwrap().unwrap();
        assert!(glued.background);
        assert_eq!(glued.text, "sleep 10");
    }

    #[test]
    fn redirections_fill_descriptor() {
        let desc = parse_line("sort < in.txt > out.txt 2>> err.log").unwrap().unwrap();
        assert_eq!(desc.program, "sort");
        assert!(desc.args.is_empty());
        assert_eq!(desc.stdin, Some(PathBuf::from("in.txt")));
        assert_eq!(desc.stdout, Some(OutputTarget::truncate("out.txt")));
        assert_eq!(desc.stderr, Some(OutputTarget::append("err.log")));
    }

    #[test]
    fn ampersand_must_be_last() {
        assert_eq!(parse_line("sleep 1 & echo"), Err(ParseError::MisplacedAmpersand));
        assert_eq!(parse_line("&"), Err(ParseError::MissingCommand));
    }

    #[test]
    fn rejects_pipes_and_dangling_redirects() {
        assert_eq!(parse_line("ls | wc"), Err(ParseError::PipelineUnsupported));
        assert_eq!(parse_line("ls >"), Err(ParseError::MissingRedirectTarget));
        assert_eq!(parse_line("ls > &"), Err(ParseError::MissingRedirectTarget));
    }

    #[test]
    fn lexing_errors_surface() {
        assert_eq!(
            parse_line("echo \"open"),
            Err(ParseError::Lexing(LexingError::UnfinishedQuote))
        );
    }
}

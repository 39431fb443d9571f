//! Block document parser
//!
//! Tokenizes the source into block delimiters and builds the tree with an
//! explicit stack of open blocks. Text between delimiters becomes markup of
//! the innermost open block, or an untyped block at the top level.
//!
//! The parser is strict: anything that starts like a delimiter
//! (`<!--` + whitespace + `wp:` or `/wp:`) must be well-formed, otherwise the
//! whole parse fails. A partial tree is never returned.

use crate::block::{Block, BlockKind, BlockName, BlockTree, InnerContent, Verbatim};
use crate::error::ParseError;
use crate::hash::ContentHash;
use crate::value::{AttrValue, Attributes};
use once_cell::sync::Lazy;
use regex::Regex;

/// End of an attribute object: `}` + whitespace + optional `/` + `-->`
static ATTRS_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"\}\s+/?-->").expect("valid pattern"));

const COMMENT_OPEN: &str = "<!--";
const COMMENT_CLOSE: &str = "-->";

/// Parse document text into a block tree
///
/// # Errors
/// Returns [`ParseError`] for malformed delimiters, invalid attribute JSON,
/// unbalanced openers/closers.
pub fn parse(source: &str) -> Result<BlockTree, ParseError> {
    Parser::new(source).run()
}

enum Token {
    Opener {
        name: BlockName,
        attributes: Attributes,
        void: bool,
        start: usize,
        end: usize,
    },
    Closer {
        name: BlockName,
        start: usize,
        end: usize,
    },
}

struct Frame {
    block: Block,
    start: usize,
}

struct Parser<'a> {
    source: &'a str,
    /// Scan position for the next delimiter search
    offset: usize,
    /// End of the last consumed delimiter
    last_end: usize,
    stack: Vec<Frame>,
    output: Vec<Block>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            offset: 0,
            last_end: 0,
            stack: Vec::new(),
            output: Vec::new(),
        }
    }

    fn run(mut self) -> Result<BlockTree, ParseError> {
        while let Some(token) = self.next_token()? {
            match token {
                Token::Opener {
                    name,
                    attributes,
                    void,
                    start,
                    end,
                } => {
                    self.push_text(start);
                    let kind = BlockKind::Named(name);
                    let mut block = Block::new(kind.clone());
                    block.set_verbatim(Verbatim {
                        opener: self.source[start..end].to_string(),
                        closer: None,
                        kind,
                        fingerprint: ContentHash::of_attributes(&attributes),
                    });
                    block.attributes = attributes;
                    self.consume(end);
                    if void {
                        self.attach(block);
                    } else {
                        self.stack.push(Frame { block, start });
                    }
                }
                Token::Closer { name, start, end } => {
                    let Some(mut frame) = self.stack.pop() else {
                        return Err(ParseError::UnexpectedCloser {
                            block: name.to_string(),
                            offset: start,
                        });
                    };
                    if frame.block.name() != Some(&name) {
                        return Err(ParseError::MismatchedCloser {
                            expected: frame.block.kind.to_string(),
                            found: name.to_string(),
                            offset: start,
                        });
                    }
                    let text = &self.source[self.last_end..start];
                    if !text.is_empty() {
                        frame.block.inner_content.push(InnerContent::Markup(text.to_string()));
                    }
                    frame.block.set_verbatim_closer(self.source[start..end].to_string());
                    self.consume(end);
                    self.attach(frame.block);
                }
            }
        }

        if let Some(frame) = self.stack.last() {
            return Err(ParseError::UnclosedBlock {
                block: frame.block.kind.to_string(),
                offset: frame.start,
            });
        }
        self.push_text(self.source.len());
        Ok(BlockTree::new(self.output))
    }

    fn consume(&mut self, end: usize) {
        self.last_end = end;
        self.offset = end;
    }

    /// Flush text between the last delimiter and `until`
    fn push_text(&mut self, until: usize) {
        let text = &self.source[self.last_end..until];
        if text.is_empty() {
            return;
        }
        match self.stack.last_mut() {
            Some(frame) => frame.block.inner_content.push(InnerContent::Markup(text.to_string())),
            None => self.output.push(Block::untyped(text)),
        }
    }

    fn attach(&mut self, block: Block) {
        match self.stack.last_mut() {
            Some(frame) => {
                frame.block.inner_content.push(InnerContent::Child);
                frame.block.children.push(block);
            }
            None => self.output.push(block),
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, ParseError> {
        while let Some(rel) = self.source[self.offset..].find(COMMENT_OPEN) {
            let start = self.offset + rel;
            if let Some(token) = self.delimiter_at(start)? {
                return Ok(Some(token));
            }
            self.offset = start + COMMENT_OPEN.len();
        }
        Ok(None)
    }

    /// Try to read a delimiter starting at `start` (which points at `<!--`)
    ///
    /// Plain HTML comments yield `Ok(None)`.
    fn delimiter_at(&self, start: usize) -> Result<Option<Token>, ParseError> {
        let after_open = start + COMMENT_OPEN.len();
        let ws = whitespace_len(&self.source[after_open..]);
        if ws == 0 {
            return Ok(None);
        }
        let head = after_open + ws;
        let rest = &self.source[head..];
        let (is_closer, name_start) = if rest.starts_with("/wp:") {
            (true, head + 4)
        } else if rest.starts_with("wp:") {
            (false, head + 3)
        } else {
            return Ok(None);
        };

        if !self.source[name_start..].contains(COMMENT_CLOSE) {
            return Err(ParseError::UnterminatedDelimiter { offset: start });
        }

        let name_len = self.source[name_start..]
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '/'))
            .unwrap_or(self.source.len() - name_start);
        let name_text = &self.source[name_start..name_start + name_len];
        let name = BlockName::parse(name_text)
            .ok_or_else(|| ParseError::malformed(start, format!("invalid block name '{name_text}'")))?;

        let pos = name_start + name_len;
        let ws = whitespace_len(&self.source[pos..]);
        if ws == 0 {
            return Err(ParseError::malformed(start, "expected whitespace after block name"));
        }
        let body = pos + ws;

        if is_closer {
            return if self.source[body..].starts_with(COMMENT_CLOSE) {
                Ok(Some(Token::Closer {
                    name,
                    start,
                    end: body + COMMENT_CLOSE.len(),
                }))
            } else {
                Err(ParseError::malformed(start, "closing delimiter takes no attributes"))
            };
        }

        if self.source[body..].starts_with('{') {
            let Some(m) = ATTRS_END.find(&self.source[body..]) else {
                return Err(ParseError::InvalidAttributes {
                    block: name.to_string(),
                    offset: start,
                    message: "unterminated attribute object".to_string(),
                });
            };
            let json = &self.source[body..=body + m.start()];
            let attributes = parse_attributes(json).map_err(|message| ParseError::InvalidAttributes {
                block: name.to_string(),
                offset: start,
                message,
            })?;
            return Ok(Some(Token::Opener {
                name,
                attributes,
                void: m.as_str().ends_with("/-->"),
                start,
                end: body + m.end(),
            }));
        }

        let (void, len) = if self.source[body..].starts_with("/-->") {
            (true, 4)
        } else if self.source[body..].starts_with(COMMENT_CLOSE) {
            (false, COMMENT_CLOSE.len())
        } else {
            return Err(ParseError::malformed(start, "expected attributes or end of delimiter"));
        };
        Ok(Some(Token::Opener {
            name,
            attributes: Attributes::new(),
            void,
            start,
            end: body + len,
        }))
    }
}

fn whitespace_len(text: &str) -> usize {
    text.char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map_or(text.len(), |(i, _)| i)
}

fn parse_attributes(json: &str) -> Result<Attributes, String> {
    match AttrValue::from_json_str(json) {
        Ok(AttrValue::Map(map)) => Ok(map),
        Ok(other) => Err(format!("expected an object, found {}", other.type_name())),
        Err(e) => Err(e.to_string()),
    }
}

use std::fmt;

use crate::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    If,
    Else,
    While,
    For,
    Proc,
    Bind,
}

impl BlockKind {
    /// Whether the closing keyword `closing` may end a block of this kind.
    #[must_use]
    pub fn closed_by(self, closing: &str) -> bool {
        match closing {
            "end" => true,
            "else" => self == BlockKind::If,
            _ => false,
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockKind::If => "if",
            BlockKind::Else => "else",
            BlockKind::While => "while",
            BlockKind::For => "for",
            BlockKind::Proc => "proc",
            BlockKind::Bind => "bind",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub start: usize,
    /// Set once, when the block is closed.
    pub end: Option<usize>,
}

impl Block {
    pub fn new(kind: BlockKind, start: usize) -> Self {
        Self {
            kind,
            start,
            end: None,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.end.is_some()
    }
}

/// The stack of currently open blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockStack {
    blocks: Vec<Block>,
}

impl BlockStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, kind: BlockKind, ip: usize) -> Block {
        let block = Block::new(kind, ip);
        log::trace!("open {kind} at {ip}");
        self.blocks.push(block);
        block
    }

    /// Pops the innermost block and sets its end to `ip`.
    pub fn close(&mut self, ip: usize) -> Result<Block, ErrorKind> {
        self.close_with("end", ip)
    }

    /// Like [`BlockStack::close`], but the innermost block must accept the
    /// `closing` keyword. On mismatch the stack is left untouched.
    pub fn close_with(&mut self, closing: &str, ip: usize) -> Result<Block, ErrorKind> {
        let Some(top) = self.blocks.last() else {
            return Err(ErrorKind::UnexpectedClose {
                closing: closing.to_owned(),
            });
        };

        if !top.kind.closed_by(closing) {
            return Err(ErrorKind::BlockMismatch {
                closing: closing.to_owned(),
                found: top.kind,
            });
        }

        let mut block = self.blocks.pop().ok_or(ErrorKind::UnexpectedClose {
            closing: closing.to_owned(),
        })?;
        block.end = Some(ip);
        log::trace!("close {} {}..{ip}", block.kind, block.start);
        Ok(block)
    }

    #[must_use]
    pub fn peek(&self) -> Option<&Block> {
        self.blocks.last()
    }

    #[must_use]
    pub fn peek_kind(&self) -> Option<BlockKind> {
        self.peek().map(|b| b.kind)
    }

    /// Fails with the innermost unclosed block, if any.
    pub fn ensure_empty(&self) -> Result<(), ErrorKind> {
        match self.blocks.last() {
            Some(block) => Err(ErrorKind::UnclosedBlock {
                kind: block.kind,
                start: block.start,
            }),
            None => Ok(()),
        }
    }

    /// Open blocks, outermost first.
    #[must_use]
    pub fn as_slice(&self) -> &[Block] {
        &self.blocks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

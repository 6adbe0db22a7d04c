use std::{cell::RefCell, fmt, rc::Rc};

use crate::Location;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub location: Location,
}

impl Token {
    pub fn new(text: impl Into<String>, location: Location) -> Self {
        Self {
            text: text.into(),
            location,
        }
    }
}

/// A token stream pulled on demand.
///
/// Clones are handles to the same stream: a token pulled through one is
/// gone for all of them. Detours keep a handle to the interrupted source and
/// resume it when they finish.
#[derive(Clone)]
pub struct TokenSource {
    inner: Rc<RefCell<dyn Iterator<Item = Token>>>,
}

impl TokenSource {
    pub fn new(iter: impl Iterator<Item = Token> + 'static) -> Self {
        Self {
            inner: Rc::new(RefCell::new(iter)),
        }
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    pub fn from_tokens(tokens: Vec<Token>) -> Self {
        Self::new(tokens.into_iter())
    }
}

impl Iterator for TokenSource {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.inner.borrow_mut().next()
    }
}

impl Default for TokenSource {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSource").finish_non_exhaustive()
    }
}

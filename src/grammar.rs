//! Grammar fragments.
//!
//! A [`Grammar`] is a byte-level expression tree: literals, byte classes,
//! concatenation, alternation, bounded repetition and named captures. Fragments are
//! what callers append to a [`crate::model::Model`] and what blocks inject at their
//! boundaries. Compiling them into something that can produce token masks is the job
//! of a [`crate::interpreter::GrammarCompiler`].
//!
//! ```ignore
//! use pie_guidance::grammar::{capture, char_range, literal, one_or_more};
//!
//! let g = literal("n=") + capture("n", one_or_more(char_range(b'0', b'9')));
//! ```

use std::fmt;
use std::ops::Add;

use crate::bitmask::{self, get_bit, set_bit};

// ---------------------------------------------------------------------------
// Byte class
// ---------------------------------------------------------------------------

/// A set of bytes, stored as a 256-bit token bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ByteClass {
    bits: [u32; 8],
}

impl ByteClass {
    pub const fn empty() -> Self {
        Self { bits: [0; 8] }
    }

    pub const fn any() -> Self {
        Self { bits: [u32::MAX; 8] }
    }

    /// Inclusive byte range.
    pub fn range(lo: u8, hi: u8) -> Self {
        let mut class = Self::empty();
        for b in lo..=hi {
            class.insert(b);
        }
        class
    }

    pub fn single(b: u8) -> Self {
        let mut class = Self::empty();
        class.insert(b);
        class
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut class = Self::empty();
        for &b in bytes {
            class.insert(b);
        }
        class
    }

    pub fn insert(&mut self, b: u8) {
        set_bit(&mut self.bits, b as usize);
    }

    pub fn contains(&self, b: u8) -> bool {
        get_bit(&self.bits, b as usize)
    }

    pub fn union(mut self, other: ByteClass) -> Self {
        for (word, other) in self.bits.iter_mut().zip(other.bits) {
            *word |= other;
        }
        self
    }

    pub fn negate(mut self) -> Self {
        for word in self.bits.iter_mut() {
            *word = !*word;
        }
        self
    }

    pub fn len(&self) -> usize {
        bitmask::count_allowed(&self.bits)
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }

    /// The only member, if the class has exactly one.
    pub fn as_single(&self) -> Option<u8> {
        if self.len() == 1 {
            self.iter().next()
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        bitmask::iter_allowed(&self.bits).map(|id| id as u8)
    }
}

impl fmt::Debug for ByteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteClass({self})")
    }
}

impl fmt::Display for ByteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        let members: Vec<u8> = self.iter().collect();
        let mut i = 0;
        while i < members.len() {
            let start = members[i];
            let mut end = start;
            while i + 1 < members.len() && members[i + 1] == end.wrapping_add(1) {
                i += 1;
                end = members[i];
            }
            write!(f, "{}", std::ascii::escape_default(start))?;
            if end != start {
                write!(f, "-{}", std::ascii::escape_default(end))?;
            }
            i += 1;
        }
        write!(f, "]")
    }
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

/// A grammar fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grammar {
    /// A fixed byte string. The empty literal matches the empty string.
    Literal(Vec<u8>),

    /// Exactly one byte from the class.
    Class(ByteClass),

    /// Concatenation.
    Join(Vec<Grammar>),

    /// Alternation. Earlier options take priority when captures are ambiguous.
    Select(Vec<Grammar>),

    /// `inner{min, max}`; `max = None` means unbounded.
    Repeat {
        inner: Box<Grammar>,
        min: u32,
        max: Option<u32>,
    },

    /// Records the bytes matched by `inner` under `name`.
    ///
    /// With `list_append` the values accumulate into a list instead of
    /// overwriting each other.
    Capture {
        name: String,
        inner: Box<Grammar>,
        list_append: bool,
    },
}

impl Grammar {
    /// The bytes of this fragment when it can only ever match one fixed string.
    pub fn as_literal(&self) -> Option<Vec<u8>> {
        match self {
            Grammar::Literal(bytes) => Some(bytes.clone()),
            Grammar::Join(items) => {
                let mut out = Vec::new();
                for item in items {
                    out.extend(item.as_literal()?);
                }
                Some(out)
            }
            _ => None,
        }
    }

    /// True for a fragment that matches only the empty string and captures nothing.
    pub fn is_empty(&self) -> bool {
        matches!(self.as_literal(), Some(bytes) if bytes.is_empty())
    }
}

impl From<&str> for Grammar {
    fn from(s: &str) -> Self {
        Grammar::Literal(s.as_bytes().to_vec())
    }
}

impl From<String> for Grammar {
    fn from(s: String) -> Self {
        Grammar::Literal(s.into_bytes())
    }
}

impl From<&[u8]> for Grammar {
    fn from(bytes: &[u8]) -> Self {
        Grammar::Literal(bytes.to_vec())
    }
}

impl From<ByteClass> for Grammar {
    fn from(class: ByteClass) -> Self {
        Grammar::Class(class)
    }
}

impl<T: Into<Grammar>> Add<T> for Grammar {
    type Output = Grammar;

    fn add(self, rhs: T) -> Grammar {
        let rhs = rhs.into();
        match (self, rhs) {
            (Grammar::Join(mut left), Grammar::Join(right)) => {
                left.extend(right);
                Grammar::Join(left)
            }
            (Grammar::Join(mut left), rhs) => {
                left.push(rhs);
                Grammar::Join(left)
            }
            (lhs, Grammar::Join(mut right)) => {
                right.insert(0, lhs);
                Grammar::Join(right)
            }
            (lhs, rhs) => Grammar::Join(vec![lhs, rhs]),
        }
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grammar::Literal(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            Grammar::Class(class) => write!(f, "{class}"),
            Grammar::Join(items) => {
                if items.is_empty() {
                    return write!(f, "\"\"");
                }
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Grammar::Select(options) => {
                write!(f, "(")?;
                for (i, option) in options.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{option}")?;
                }
                write!(f, ")")
            }
            Grammar::Repeat { inner, min, max } => match (min, max) {
                (0, None) => write!(f, "({inner})*"),
                (1, None) => write!(f, "({inner})+"),
                (0, Some(1)) => write!(f, "({inner})?"),
                (min, None) => write!(f, "({inner}){{{min},}}"),
                (min, Some(max)) => write!(f, "({inner}){{{min},{max}}}"),
            },
            Grammar::Capture { name, inner, list_append } => {
                let marker = if *list_append { "+=" } else { "=" };
                write!(f, "{name}{marker}({inner})")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

pub fn literal(text: impl AsRef<[u8]>) -> Grammar {
    Grammar::Literal(text.as_ref().to_vec())
}

pub fn byte_class(class: ByteClass) -> Grammar {
    Grammar::Class(class)
}

/// One byte in the inclusive range `lo..=hi`.
pub fn char_range(lo: u8, hi: u8) -> Grammar {
    Grammar::Class(ByteClass::range(lo, hi))
}

pub fn join(items: impl IntoIterator<Item = Grammar>) -> Grammar {
    Grammar::Join(items.into_iter().collect())
}

pub fn select(options: impl IntoIterator<Item = Grammar>) -> Grammar {
    Grammar::Select(options.into_iter().collect())
}

pub fn repeat(inner: impl Into<Grammar>, min: u32, max: Option<u32>) -> Grammar {
    Grammar::Repeat {
        inner: Box::new(inner.into()),
        min,
        max,
    }
}

pub fn optional(inner: impl Into<Grammar>) -> Grammar {
    repeat(inner, 0, Some(1))
}

pub fn zero_or_more(inner: impl Into<Grammar>) -> Grammar {
    repeat(inner, 0, None)
}

pub fn one_or_more(inner: impl Into<Grammar>) -> Grammar {
    repeat(inner, 1, None)
}

pub fn capture(name: impl Into<String>, inner: impl Into<Grammar>) -> Grammar {
    Grammar::Capture {
        name: name.into(),
        inner: Box::new(inner.into()),
        list_append: false,
    }
}

/// Like [`capture`], but every match is appended to a list under `name`.
pub fn list_append(name: impl Into<String>, inner: impl Into<Grammar>) -> Grammar {
    Grammar::Capture {
        name: name.into(),
        inner: Box::new(inner.into()),
        list_append: true,
    }
}

/// Free generation of up to `max_bytes` bytes from `class`, optionally captured.
pub fn gen(name: Option<&str>, class: ByteClass, max_bytes: Option<u32>) -> Grammar {
    let body = repeat(Grammar::Class(class), 0, max_bytes);
    match name {
        Some(name) => capture(name, body),
        None => body,
    }
}

/// A JSON integer: `-?[0-9]+`.
pub fn json_integer() -> Grammar {
    optional("-") + one_or_more(char_range(b'0', b'9'))
}

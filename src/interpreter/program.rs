//! Flat instruction program for a [`Grammar`].
//!
//! Bounded repeats are unrolled, so the program is a plain NFA over bytes:
//! `Split` prefers its first target, which gives greedy repetition and
//! left-to-right alternation priority.

use anyhow::{bail, ensure, Result};

use crate::grammar::{ByteClass, Grammar};

/// Upper bound on program size; unrolling `repeat(x, 0, Some(huge))` would
/// otherwise allocate without limit.
pub(crate) const MAX_PROGRAM_SIZE: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inst {
    Byte(ByteClass),
    Split(usize, usize),
    Jump(usize),
    Open(usize),
    Close(usize),
    Match,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Slot {
    pub name: String,
    pub list_append: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Program {
    pub insts: Vec<Inst>,
    /// One slot per capture occurrence in the grammar.
    pub slots: Vec<Slot>,
}

impl Program {
    pub fn compile(grammar: &Grammar) -> Result<Self> {
        let mut program = Program {
            insts: Vec::new(),
            slots: Vec::new(),
        };
        program.emit(grammar)?;
        program.push(Inst::Match)?;
        Ok(program)
    }

    fn push(&mut self, inst: Inst) -> Result<usize> {
        ensure!(
            self.insts.len() < MAX_PROGRAM_SIZE,
            "grammar too large: more than {MAX_PROGRAM_SIZE} instructions"
        );
        self.insts.push(inst);
        Ok(self.insts.len() - 1)
    }

    fn patch_split(&mut self, at: usize, first: usize, second: usize) {
        self.insts[at] = Inst::Split(first, second);
    }

    fn emit(&mut self, grammar: &Grammar) -> Result<()> {
        match grammar {
            Grammar::Literal(bytes) => {
                for &b in bytes {
                    self.push(Inst::Byte(ByteClass::single(b)))?;
                }
            }
            Grammar::Class(class) => {
                self.push(Inst::Byte(*class))?;
            }
            Grammar::Join(items) => {
                for item in items {
                    self.emit(item)?;
                }
            }
            Grammar::Select(options) => self.emit_select(options)?,
            Grammar::Repeat { inner, min, max } => self.emit_repeat(inner, *min, *max)?,
            Grammar::Capture {
                name,
                inner,
                list_append,
            } => {
                let slot = self.slots.len();
                self.slots.push(Slot {
                    name: name.clone(),
                    list_append: *list_append,
                });
                self.push(Inst::Open(slot))?;
                self.emit(inner)?;
                self.push(Inst::Close(slot))?;
            }
        }
        Ok(())
    }

    fn emit_select(&mut self, options: &[Grammar]) -> Result<()> {
        let Some((last, rest)) = options.split_last() else {
            // An empty alternation matches nothing.
            self.push(Inst::Byte(ByteClass::empty()))?;
            return Ok(());
        };

        let mut exits = Vec::with_capacity(rest.len());
        for option in rest {
            let split = self.push(Inst::Split(0, 0))?;
            self.emit(option)?;
            exits.push(self.push(Inst::Jump(0))?);
            let next = self.insts.len();
            self.patch_split(split, split + 1, next);
        }
        self.emit(last)?;

        let end = self.insts.len();
        for at in exits {
            self.insts[at] = Inst::Jump(end);
        }
        Ok(())
    }

    /// True when `inner` compiles to no instructions, as `literal("")` does.
    fn emits_nothing(&mut self, inner: &Grammar) -> Result<bool> {
        let (insts, slots) = (self.insts.len(), self.slots.len());
        self.emit(inner)?;
        let empty = self.insts.len() == insts;
        self.insts.truncate(insts);
        self.slots.truncate(slots);
        Ok(empty)
    }

    fn emit_repeat(&mut self, inner: &Grammar, min: u32, max: Option<u32>) -> Result<()> {
        if let Some(max) = max {
            if max < min {
                bail!("repeat bounds out of order: min {min} > max {max}");
            }
        }
        if max == Some(0) || self.emits_nothing(inner)? {
            return Ok(());
        }

        for _ in 0..min {
            self.emit(inner)?;
        }

        match max {
            None => {
                let split = self.push(Inst::Split(0, 0))?;
                self.emit(inner)?;
                self.push(Inst::Jump(split))?;
                let end = self.insts.len();
                self.patch_split(split, split + 1, end);
            }
            Some(max) => {
                let mut splits = Vec::new();
                for _ in min..max {
                    splits.push(self.push(Inst::Split(0, 0))?);
                    self.emit(inner)?;
                }
                let end = self.insts.len();
                for at in splits {
                    self.patch_split(at, at + 1, end);
                }
            }
        }
        Ok(())
    }
}

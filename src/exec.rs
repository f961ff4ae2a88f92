// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::backtrack;
use crate::input::{Input, Utf16Input, Utf32Input, Utf8Input};
use crate::nfa;
use crate::program::Program;
use crate::re::Span;
use crate::Error;

/// The matching engines offered by this regex implementation.
///
/// N.B. This is exported for use in testing.
#[doc(hidden)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchEngine {
    /// Choose an engine based on what the program needs and how big the
    /// job is.
    Automatic,
    /// A bounded depth-first implementation. About twice as fast as the
    /// breadth-first simulation on small jobs, and the only engine that can
    /// resolve back-references.
    Backtrack,
    /// The breadth-first Thompson simulation. Always applicable (except for
    /// back-references) and never super-linear.
    Nfa,
    /// When the whole regex is one set of literals and no captures beyond
    /// the full match are requested, degrade to substring search.
    Literals,
}

/// Executor manages the execution of a regular expression: it owns the
/// compiled program and picks the matching engine per call.
#[derive(Clone, Debug)]
pub struct Executor {
    prog: Program,
    engine: MatchEngine,
}

impl Executor {
    pub fn new(pattern: &str, flags: &str) -> Result<Executor, Error> {
        Ok(Executor {
            prog: Program::new(pattern, flags)?,
            engine: MatchEngine::Automatic,
        })
    }

    /// Forces an engine. For testing; `Automatic` is always right.
    #[doc(hidden)]
    pub fn with_engine(mut self, engine: MatchEngine) -> Executor {
        self.engine = engine;
        self
    }

    pub fn program(&self) -> &Program {
        &self.prog
    }

    /// Runs a search over UTF-8 text starting at byte `start`. On success
    /// the capture spans are written to `out` (`out[0]` is the full match).
    pub fn exec(&self, out: &mut [Span], text: &str, start: usize) -> bool {
        self.exec_input(out, Utf8Input::new(text), start)
    }

    pub fn exec_utf16(&self, out: &mut [Span], text: &[u16], start: usize) -> bool {
        self.exec_input(out, Utf16Input::new(text), start)
    }

    pub fn exec_utf32(&self, out: &mut [Span], text: &[char], start: usize) -> bool {
        self.exec_input(out, Utf32Input::new(text), start)
    }

    fn exec_input<I: Input>(&self, out: &mut [Span], input: I, start: usize) -> bool {
        match self.engine {
            MatchEngine::Nfa => nfa::exec(&self.prog, out, input, start),
            MatchEngine::Backtrack => backtrack::exec(&self.prog, out, input, start),
            MatchEngine::Literals => self.exec_literals(out, input, start),
            MatchEngine::Automatic => {
                // Back-references demand the depth-first engine; everything
                // else is a cost call.
                if self.prog.has_backref {
                    backtrack::exec(&self.prog, out, input, start)
                } else if self.can_exec_literals(out.len()) {
                    self.exec_literals(out, input, start)
                } else if backtrack::should_exec(self.prog.code.len(), input.len()) {
                    backtrack::exec(&self.prog, out, input, start)
                } else {
                    nfa::exec(&self.prog, out, input, start)
                }
            }
        }
    }

    /// The literal machine answers the whole match only when the extracted
    /// literals are complete, respect leftmost-first priority, and nobody
    /// asks for capture spans the machine cannot produce.
    fn can_exec_literals(&self, out_len: usize) -> bool {
        (out_len <= 1 || self.prog.ngroup == 1)
            && self
                .prog
                .kickstart
                .as_ref()
                .and_then(|k| k.literals())
                .map_or(false, |l| l.at_match() && l.preserves_priority())
    }

    fn exec_literals<I: Input>(&self, out: &mut [Span], input: I, start: usize) -> bool {
        let lits = match self.prog.kickstart.as_ref().and_then(|k| k.literals()) {
            Some(lits) => lits,
            // A forced engine choice that does not apply falls back.
            None => return nfa::exec(&self.prog, out, input, start),
        };
        if !lits.at_match() || !lits.preserves_priority() || !input.supports_literal_search() {
            return nfa::exec(&self.prog, out, input, start);
        }
        match input.search_literals(lits, start) {
            Some((s, e)) => {
                if let Some(slot) = out.get_mut(0) {
                    *slot = Span { begin: s, end: e };
                }
                true
            }
            None => false,
        }
    }
}

// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::Arc;

use crate::charset::CodepointSet;
use crate::inst::{index_of_pair, len_of, Insn, Op};
use crate::kickstart::Kickstart;
use crate::parse::{self, skip_markers, Flags, MAX_REPEAT_PRODUCT};
use crate::trie::{cached_trie, CharTrie};
use crate::Error;

/// Program represents a compiled regular expression. Once an expression is
/// compiled, its representation is immutable and will never change; matchers
/// borrow it and own all of their scratch memory.
#[derive(Clone, Debug)]
pub struct Program {
    /// The original pattern string.
    pub original: String,
    /// The post-processed instruction stream.
    pub code: Vec<Insn>,
    /// Capture slots, slot 0 (the whole match) included.
    pub ngroup: usize,
    /// Named groups sorted lexicographically for binary search.
    pub names: Vec<(String, usize)>,
    /// Interval sets referenced by `CodepointSet` and `Trie` words.
    pub charsets: Vec<CodepointSet>,
    /// Membership tries for the sets lowered to `Trie`, by charset id.
    pub tries: Vec<Option<Arc<CharTrie>>>,
    pub flags: Flags,
    /// Total merge-table slots over all hotspots.
    pub hotspot_table_size: usize,
    /// Deepest nesting of counted repetition.
    pub max_counter_depth: usize,
    /// Upper bound on simultaneously live Thompson threads per position.
    pub thread_count: usize,
    /// Anchored at input start; disables search stride and kickstart.
    pub one_shot: bool,
    /// Bytecode contains a back-reference, forcing the backtracking engine.
    pub has_backref: bool,
    pub kickstart: Option<Kickstart>,
}

impl Program {
    /// Compiles a pattern with a flag string drawn from `gixUms`.
    pub fn new(pattern: &str, flag_str: &str) -> Result<Program, Error> {
        let flags = Flags::parse(flag_str)?;
        let parsed = parse::compile(pattern, flags)?;
        let mut tries: Vec<Option<Arc<CharTrie>>> = vec![None; parsed.charsets.len()];
        for &id in &parsed.trie_ids {
            tries[id] = Some(cached_trie(&parsed.charsets[id]));
        }
        let mut prog = Program {
            original: pattern.to_string(),
            code: parsed.code,
            ngroup: parsed.ngroup,
            names: parsed.names,
            charsets: parsed.charsets,
            tries,
            flags,
            hotspot_table_size: 0,
            max_counter_depth: 1,
            thread_count: 0,
            one_shot: false,
            has_backref: parsed.has_backref,
            kickstart: None,
        };
        prog.postprocess(&parsed.backrefed)?;
        debug_assert!(validate(&prog.code), "IR validation failed");
        if !prog.one_shot {
            prog.kickstart = Kickstart::build(&prog);
        }
        Ok(prog)
    }

    /// One linear walk over the bytecode: sizes the merge table, bounds the
    /// worst-case thread count, scales repeat parameters into absolute
    /// counter space, marks back-referenced groups and detects one-shot
    /// anchoring.
    fn postprocess(&mut self, backrefed: &[bool]) -> Result<(), Error> {
        let code = &mut self.code;
        // Running multiplier applied to all enclosing repeats.
        let mut counters: Vec<u64> = vec![1];
        let mut hotspots: usize = 0;
        let mut threads: u64 = 0;
        let mut pc = 0;
        while pc < code.len() {
            let op = code[pc].op();
            let top = *counters.last().expect("counter stack never empty");
            threads = threads.saturating_add(top);
            match op {
                Op::RepeatStart | Op::RepeatQStart => {
                    let e = index_of_pair(code, pc);
                    let max = code[e + 4].raw() as u64;
                    // The runtime counter spans 0..=max in units of the
                    // enclosing scale, so each level multiplies by max + 1.
                    let next = top * (max + 1);
                    if next > MAX_REPEAT_PRODUCT {
                        return Err(Error::LimitExceeded {
                            which: "cumulative repetition product",
                            limit: MAX_REPEAT_PRODUCT as usize,
                        });
                    }
                    counters.push(next);
                    self.max_counter_depth = self.max_counter_depth.max(counters.len());
                }
                Op::RepeatEnd | Op::RepeatQEnd => {
                    let own = counters.pop().expect("unbalanced repeat");
                    let step = *counters.last().expect("counter stack never empty");
                    code[pc + 1] = Insn::from_raw(hotspots as u32);
                    hotspots += own as usize;
                    let min = code[pc + 3].raw();
                    let max = code[pc + 4].raw();
                    code[pc + 2] = Insn::from_raw(step as u32);
                    code[pc + 3] = Insn::from_raw(min * step as u32);
                    code[pc + 4] = Insn::from_raw(max * step as u32);
                }
                Op::OrEnd | Op::InfiniteEnd | Op::InfiniteQEnd => {
                    code[pc + 1] = Insn::from_raw(hotspots as u32);
                    hotspots += top as usize;
                }
                Op::GroupStart | Op::GroupEnd => {
                    let idx = code[pc].data() as usize;
                    if backrefed.get(idx).copied().unwrap_or(false) {
                        code[pc].set_flag();
                    }
                }
                _ => {}
            }
            pc += len_of(op);
        }
        self.hotspot_table_size = hotspots;
        self.thread_count = threads.min(usize::MAX as u64) as usize;
        let first = skip_markers(code, 0);
        self.one_shot = code[first].op() == Op::Bol && !self.flags.multiline;
        Ok(())
    }

    pub fn alloc_groups(&self) -> Vec<crate::re::Span> {
        vec![crate::re::Span::default(); self.ngroup]
    }

    /// Looks up a named group by binary search over the sorted dictionary.
    pub fn group_by_name(&self, name: &str) -> Option<usize> {
        self.names
            .binary_search_by(|(n, _)| n.as_str().cmp(name))
            .ok()
            .map(|i| self.names[i].1)
    }
}

/// Asserts that every Start points at its matching End (and back), and that
/// instruction lengths tile the buffer exactly.
pub fn validate(code: &[Insn]) -> bool {
    let mut pc = 0;
    while pc < code.len() {
        let op = code[pc].op();
        if pc + len_of(op) > code.len() {
            return false;
        }
        if op.is_start() {
            let e = index_of_pair(code, pc);
            if e >= code.len() {
                return false;
            }
            let eop = code[e].op();
            if !eop.is_end() || eop != op.paired() || index_of_pair(code, e) != pc {
                return false;
            }
        }
        if op.is_end() && index_of_pair(code, pc) >= code.len() {
            return false;
        }
        pc += len_of(op);
    }
    pc == code.len()
}

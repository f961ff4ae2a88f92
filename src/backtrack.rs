// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// The depth-first matching engine. It has the full capability set: unlike
// the breadth-first simulation it supports back-references against already
// committed captures. Every open choice (alternation branch, optional loop
// iteration) is pushed as a frame onto a segmented stack of 32-bit words;
// failing a path pops the youngest frame and restores input position, pc,
// counter, infinite nesting, the whole groups array and the live loop
// trackers. A loop re-entered with input unchanged since its last iteration
// exits instead of spinning on a zero-width body.

use crate::input::Input;
use crate::inst::{index_of_pair, Op};
use crate::program::Program;
use crate::re::Span;
use crate::unicode::is_word_char;

/// Segment capacity in words. A frame never straddles segments.
const SEGMENT_WORDS: usize = 4096;
/// Total stack budget; exhausting it is a programming error in the caller
/// (input far beyond what this engine is selected for).
const MAX_STACK_WORDS: usize = 1 << 22;

// The engine beats the breadth-first simulation roughly 2x on small jobs
// because it keeps one copy of the capture groups. Keep it to small
// programs on small inputs.
const MAX_PROG_SIZE: usize = 256;
const MAX_INPUT_SIZE: usize = 256 * (1 << 10);

/// Returns true iff the given program and input sizes can be executed by
/// this engine with reasonable memory usage.
pub fn should_exec(prog_len: usize, input_len: usize) -> bool {
    prog_len <= MAX_PROG_SIZE && input_len <= MAX_INPUT_SIZE
}

/// Executes the backtracking engine over the whole program, searching from
/// `start`. On success the capture spans are written to `out`; when the
/// caller asks for no spans beyond the full match, only back-referenced
/// groups are recorded along the way.
pub fn exec<I: Input>(prog: &Program, out: &mut [Span], input: I, start: usize) -> bool {
    let seed = prog.alloc_groups();
    let mut bt = Backtrack::new(prog, input, 0, seed);
    bt.track_all = out.len() > 1;
    if !bt.search(start) {
        return false;
    }
    for (slot, val) in out.iter_mut().zip(bt.groups.iter()) {
        *slot = *val;
    }
    true
}

struct Backtrack<'r, I> {
    prog: &'r Program,
    input: I,
    start_pc: usize,
    groups: Vec<Span>,
    /// The spans every attempt starts from (a lookaround's outer matches).
    seed: Vec<Span>,
    /// Record every capture, or only the back-referenced ones (flagged on
    /// their GroupStart/GroupEnd) that matching itself depends on.
    track_all: bool,
    /// A lookaround sub-matcher; global back-references then resolve
    /// against the seeded outer matches.
    is_sub: bool,
    /// Input position at the last iteration of each open infinite loop.
    trackers: Vec<usize>,
    inf_nesting: usize,
    stack: SegStack,
}

impl<'r, I: Input> Backtrack<'r, I> {
    fn new(prog: &'r Program, input: I, start_pc: usize, seed: Vec<Span>) -> Self {
        Backtrack {
            prog,
            input,
            start_pc,
            groups: seed.clone(),
            seed,
            track_all: true,
            is_sub: false,
            trackers: vec![],
            inf_nesting: 0,
            stack: SegStack::new(),
        }
    }

    fn search(&mut self, start: usize) -> bool {
        let mut at = start;
        loop {
            if let Some(ks) = &self.prog.kickstart {
                match self.input.search(ks, at) {
                    None => return false,
                    Some(j) => at = j,
                }
            }
            if self.try_at(at) {
                return true;
            }
            if self.prog.one_shot {
                return false;
            }
            match self.input.after(at) {
                Some(c) => at += self.input.width(c),
                None => return false,
            }
        }
    }

    /// One anchored attempt at `at`.
    fn try_at(&mut self, at: usize) -> bool {
        self.stack.clear();
        self.trackers.clear();
        self.inf_nesting = 0;
        self.groups.copy_from_slice(&self.seed);
        self.groups[0].begin = at;
        self.input.reset(at);
        self.run(self.start_pc)
    }

    fn run(&mut self, mut pc: usize) -> bool {
        let mut counter: u32 = 0;
        loop {
            let insn = self.prog.code[pc];
            let at = self.input.pos();
            let failed = match insn.op() {
                Op::End
                | Op::LookaheadEnd
                | Op::NeglookaheadEnd
                | Op::LookbehindEnd
                | Op::NeglookbehindEnd => {
                    self.groups[0].end = at;
                    return true;
                }
                Op::Char => match self.input.next() {
                    Some((ch, _)) if Some(ch) == char::from_u32(insn.data()) => {
                        pc += 1;
                        false
                    }
                    _ => true,
                },
                Op::OrChar => {
                    let seq = insn.sequence() as usize;
                    match self.input.next() {
                        Some((ch, _))
                            if (pc..pc + seq).any(|i| {
                                char::from_u32(self.prog.code[i].data()) == Some(ch)
                            }) =>
                        {
                            pc += seq;
                            false
                        }
                        _ => true,
                    }
                }
                Op::Any => match self.input.next() {
                    Some((ch, _))
                        if self.prog.flags.singleline || (ch != '\n' && ch != '\r') =>
                    {
                        pc += 1;
                        false
                    }
                    _ => true,
                },
                Op::CodepointSet => match self.input.next() {
                    Some((ch, _)) if self.prog.charsets[insn.data() as usize].contains(ch) => {
                        pc += 1;
                        false
                    }
                    _ => true,
                },
                Op::Trie => match self.input.next() {
                    Some((ch, _))
                        if self.prog.tries[insn.data() as usize]
                            .as_ref()
                            .map_or(false, |t| t.contains(ch)) =>
                    {
                        pc += 1;
                        false
                    }
                    _ => true,
                },
                Op::Bol => {
                    if self.at_line_start(at) {
                        pc += 1;
                        false
                    } else {
                        true
                    }
                }
                Op::Eol => {
                    if self.at_line_end(at) {
                        pc += 1;
                        false
                    } else {
                        true
                    }
                }
                Op::Wordboundary => {
                    if is_word_char(self.input.before(at)) != is_word_char(self.input.after(at))
                    {
                        pc += 1;
                        false
                    } else {
                        true
                    }
                }
                Op::Notwordboundary => {
                    if is_word_char(self.input.before(at)) == is_word_char(self.input.after(at))
                    {
                        pc += 1;
                        false
                    } else {
                        true
                    }
                }
                Op::GroupStart => {
                    if self.track_all || insn.flag() {
                        self.groups[insn.data() as usize].begin = at;
                    }
                    pc += 1;
                    false
                }
                Op::GroupEnd => {
                    if self.track_all || insn.flag() {
                        self.groups[insn.data() as usize].end = at;
                    }
                    pc += 1;
                    false
                }
                Op::Nop | Op::OrStart => {
                    pc += 1;
                    false
                }
                Op::Option => {
                    let next = pc + 1 + insn.data() as usize;
                    if self.prog.code[next].op() == Op::Option {
                        self.push_state(next, counter);
                    }
                    pc += 1;
                    false
                }
                Op::GotoEndOr => {
                    pc += 1 + insn.data() as usize;
                    false
                }
                Op::OrEnd => {
                    pc += 2;
                    false
                }
                Op::InfiniteStart | Op::InfiniteQStart => {
                    let level = self.inf_nesting;
                    if self.trackers.len() <= level {
                        self.trackers.push(usize::MAX);
                    } else {
                        self.trackers[level] = usize::MAX;
                    }
                    let end = index_of_pair(&self.prog.code, pc);
                    let exit = end + 2;
                    if insn.op() == Op::InfiniteStart {
                        self.push_state(exit, counter);
                        self.inf_nesting = level + 1;
                        pc += 1;
                    } else {
                        self.push_state_nested(pc + 1, counter, level + 1);
                        pc = exit;
                    }
                    false
                }
                Op::InfiniteEnd | Op::InfiniteQEnd => {
                    let level = self.inf_nesting - 1;
                    let body = pc - insn.data() as usize;
                    let exit = pc + 2;
                    if self.trackers[level] == at {
                        // Zero-width iteration: the loop must terminate.
                        self.inf_nesting = level;
                        pc = exit;
                    } else {
                        self.trackers[level] = at;
                        if insn.op() == Op::InfiniteEnd {
                            self.push_state_nested(exit, counter, level);
                            pc = body;
                        } else {
                            self.push_state(body, counter);
                            self.inf_nesting = level;
                            pc = exit;
                        }
                    }
                    false
                }
                Op::RepeatStart | Op::RepeatQStart => {
                    pc = index_of_pair(&self.prog.code, pc);
                    false
                }
                Op::RepeatEnd | Op::RepeatQEnd => {
                    let step = self.prog.code[pc + 2].raw();
                    let min = self.prog.code[pc + 3].raw();
                    let max = self.prog.code[pc + 4].raw();
                    let body = pc - insn.data() as usize;
                    let exit = pc + 5;
                    if counter < min {
                        counter += step;
                        pc = body;
                    } else if counter < max {
                        if insn.op() == Op::RepeatEnd {
                            self.push_state(exit, counter % step);
                            counter += step;
                            pc = body;
                        } else {
                            self.push_state(body, counter + step);
                            counter %= step;
                            pc = exit;
                        }
                    } else {
                        counter %= step;
                        pc = exit;
                    }
                    false
                }
                Op::Backref => {
                    // A local reference reads the in-flight captures; a
                    // global one inside a sub-matcher reads the outer
                    // matches as they were seeded.
                    let span = if insn.flag() || !self.is_sub {
                        self.groups[insn.data() as usize]
                    } else {
                        self.seed[insn.data() as usize]
                    };
                    if span.begin >= span.end {
                        pc += 1;
                        false
                    } else if self.match_backref(span) {
                        pc += 1;
                        false
                    } else {
                        true
                    }
                }
                Op::LookaheadStart
                | Op::NeglookaheadStart
                | Op::LookbehindStart
                | Op::NeglookbehindStart => match self.lookaround(pc, at) {
                    Some(next_pc) => {
                        pc = next_pc;
                        false
                    }
                    None => true,
                },
            };
            if failed {
                match self.pop_state() {
                    Some((new_pc, new_counter)) => {
                        pc = new_pc;
                        counter = new_counter;
                    }
                    None => return false,
                }
            }
        }
    }

    /// Compares the captured span against the input at the cursor, codepoint
    /// by codepoint; in reverse mode the comparison runs from the end of the
    /// span backwards.
    fn match_backref(&mut self, span: Span) -> bool {
        let len = span.end - span.begin;
        let mut done = 0;
        while done < len {
            let expected = if self.input.is_forward() {
                self.input.after(span.begin + done)
            } else {
                self.input.before(span.end - done)
            };
            let expected = match expected {
                Some(c) => c,
                None => return false,
            };
            match self.input.next() {
                Some((ch, _)) if ch == expected => done += self.input.width(ch),
                _ => return false,
            }
        }
        true
    }

    fn lookaround(&mut self, pc: usize, at: usize) -> Option<usize> {
        let insn = self.prog.code[pc];
        let op = insn.op();
        let body = pc + 3;
        let end_pc = body + insn.data() as usize;
        let ms = self.prog.code[pc + 1].raw() as usize;
        let me = self.prog.code[pc + 2].raw() as usize;
        let negative = matches!(op, Op::NeglookaheadStart | Op::NeglookbehindStart);
        let ahead = matches!(op, Op::LookaheadStart | Op::NeglookaheadStart);

        let seed = self.groups.clone();
        // Sub-matchers own a fresh stack arena; their choice points are
        // independent of ours.
        let result = if ahead == self.input.is_forward() {
            run_sub(self.prog, self.input.fork(at), body, at, seed)
        } else {
            run_sub(self.prog, self.input.loop_back(at), body, at, seed)
        };
        match (result, negative) {
            (Some(groups), false) => {
                self.groups[ms..me].copy_from_slice(&groups[ms..me]);
                Some(end_pc + 1)
            }
            (None, true) => Some(end_pc + 1),
            _ => None,
        }
    }

    fn at_line_start(&self, at: usize) -> bool {
        if at == 0 {
            return true;
        }
        if !self.prog.flags.multiline {
            return false;
        }
        match self.input.before(at) {
            Some(p) if crate::input::is_line_terminator(p) => {
                !(p == '\r' && self.input.after(at) == Some('\n'))
            }
            _ => false,
        }
    }

    fn at_line_end(&self, at: usize) -> bool {
        if at == self.input.len() {
            return true;
        }
        if !self.prog.flags.multiline {
            return false;
        }
        match self.input.after(at) {
            Some(n) if crate::input::is_line_terminator(n) => {
                !(n == '\n' && self.input.before(at) == Some('\r'))
            }
            _ => false,
        }
    }

    // ---- state frames ----

    fn push_state(&mut self, pc: usize, counter: u32) {
        self.push_state_nested(pc, counter, self.inf_nesting)
    }

    /// Frame layout, youngest word last: pc, pos, counter, nesting,
    /// 2*ngroup group offsets, the live trackers, and the frame length so
    /// `pop_state` can find the frame base.
    fn push_state_nested(&mut self, pc: usize, counter: u32, nesting: usize) {
        let len = 4 + 2 * self.groups.len() + nesting + 1;
        let frame = self.stack.alloc(len);
        frame[0] = pc as u32;
        frame[1] = self.input.pos() as u32;
        frame[2] = counter;
        frame[3] = nesting as u32;
        let mut i = 4;
        for g in &self.groups {
            frame[i] = g.begin as u32;
            frame[i + 1] = g.end as u32;
            i += 2;
        }
        for &t in self.trackers.iter().take(nesting) {
            frame[i] = if t == usize::MAX { u32::MAX } else { t as u32 };
            i += 1;
        }
        frame[i] = len as u32;
    }

    fn pop_state(&mut self) -> Option<(usize, u32)> {
        let frame = self.stack.pop()?;
        let pc = frame[0] as usize;
        self.input.reset(frame[1] as usize);
        let counter = frame[2];
        let nesting = frame[3] as usize;
        self.inf_nesting = nesting;
        let mut i = 4;
        for g in self.groups.iter_mut() {
            g.begin = frame[i] as usize;
            g.end = frame[i + 1] as usize;
            i += 2;
        }
        self.trackers.resize(nesting, usize::MAX);
        for t in self.trackers.iter_mut() {
            *t = if frame[i] == u32::MAX {
                usize::MAX
            } else {
                frame[i] as usize
            };
            i += 1;
        }
        Some((pc, counter))
    }
}

/// Runs a lookaround body as an anchored sub-matcher with its own arena.
fn run_sub<I: Input>(
    prog: &Program,
    input: I,
    start_pc: usize,
    at: usize,
    seed: Vec<Span>,
) -> Option<Vec<Span>> {
    let mut sub = Backtrack::new(prog, input, start_pc, seed);
    sub.is_sub = true;
    if sub.try_at(at) {
        Some(sub.groups)
    } else {
        None
    }
}

/// A stack of 32-bit words carved into fixed-size segments. The segment
/// chain grows when a frame does not fit and exhausted segments are freed
/// as unwinding crosses their base.
struct SegStack {
    segments: Vec<Vec<u32>>,
}

impl SegStack {
    fn new() -> SegStack {
        SegStack { segments: vec![] }
    }

    fn clear(&mut self) {
        self.segments.clear();
    }

    /// Reserves `len` contiguous words on top of the stack.
    fn alloc(&mut self, len: usize) -> &mut [u32] {
        debug_assert!(len <= SEGMENT_WORDS);
        let need_new = match self.segments.last() {
            Some(seg) => seg.len() + len > SEGMENT_WORDS,
            None => true,
        };
        if need_new {
            let used: usize = self.segments.iter().map(|s| s.len()).sum();
            if used + SEGMENT_WORDS > MAX_STACK_WORDS {
                panic!("BUG: backtracking stack exhausted");
            }
            self.segments.push(Vec::with_capacity(SEGMENT_WORDS));
        }
        let seg = self.segments.last_mut().expect("segment present");
        let base = seg.len();
        seg.resize(base + len, 0);
        &mut seg[base..]
    }

    /// Pops the youngest frame, whose length is stored in its last word.
    fn pop(&mut self) -> Option<Vec<u32>> {
        loop {
            let seg = self.segments.last_mut()?;
            if seg.is_empty() {
                self.segments.pop();
                continue;
            }
            let len = *seg.last().expect("non-empty segment") as usize;
            let base = seg.len() - len;
            let frame = seg[base..].to_vec();
            seg.truncate(base);
            if seg.is_empty() {
                self.segments.pop();
            }
            return Some(frame);
        }
    }
}

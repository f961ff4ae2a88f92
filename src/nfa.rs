// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// The breadth-first simulation. Threads are register tuples taken from an
// arena and chained through an intrusive free list; clist holds the threads
// still to be evaluated at the current position in priority order, nlist the
// ones that already consumed the current codepoint. Zero-width instructions
// run inline in `eval_one`; forks go through a LIFO side worklist so that a
// later (deeper) fork is evaluated before an earlier sibling, which is
// exactly leftmost-first priority. The merge table kills any thread arriving
// at a hotspot whose (pc, counter) was already seen at this position.

use std::collections::HashMap;

use crate::input::{is_line_terminator, Input};
use crate::inst::{index_of_pair, Op};
use crate::program::Program;
use crate::re::Span;
use crate::unicode::is_word_char;

const NONE: u32 = u32::MAX;

/// Executes the Thompson engine over the whole program, searching from
/// `start`. On success the capture spans are written to `out`; when the
/// caller asks for no spans beyond the full match, only back-referenced
/// groups are recorded along the way.
pub fn exec<I: Input>(prog: &Program, out: &mut [Span], input: I, start: usize) -> bool {
    let seed = prog.alloc_groups();
    let mut nfa = Nfa::new(prog, input, 0, prog.one_shot, seed);
    nfa.track_all = out.len() > 1;
    nfa.search(out, start)
}

#[derive(Clone, Debug)]
struct Thread {
    pc: usize,
    counter: u32,
    uop: u32,
    groups: Vec<Span>,
    next: u32,
}

#[derive(Clone, Copy, Debug)]
struct ThreadList {
    head: u32,
    tail: u32,
}

impl ThreadList {
    fn new() -> ThreadList {
        ThreadList { head: NONE, tail: NONE }
    }

    fn is_empty(&self) -> bool {
        self.head == NONE
    }
}

/// Merge table and generation of one lookaround's sub-matcher, preserved
/// across invocations at the same pc.
struct SubScratch {
    merge: Vec<u32>,
    gen: u32,
}

enum Outcome {
    Dead,
    Consumed,
    Matched,
}

struct Nfa<'r, I> {
    prog: &'r Program,
    input: I,
    /// First instruction of the program slice this matcher runs.
    start_pc: usize,
    anchored: bool,
    /// Record every capture, or only the back-referenced ones (flagged on
    /// their GroupStart/GroupEnd) that matching itself depends on.
    track_all: bool,
    /// A lookaround sub-matcher; global back-references then resolve
    /// against the seeded outer matches.
    is_sub: bool,
    /// Start threads clone these spans (lookarounds seed their windows).
    seed: Vec<Span>,
    arena: Vec<Thread>,
    free: u32,
    clist: ThreadList,
    nlist: ThreadList,
    worklist: Vec<u32>,
    merge: Vec<u32>,
    gen: u32,
    sub_cache: HashMap<usize, SubScratch>,
}

impl<'r, I: Input> Nfa<'r, I> {
    fn new(prog: &'r Program, input: I, start_pc: usize, anchored: bool, seed: Vec<Span>) -> Self {
        Nfa {
            prog,
            input,
            start_pc,
            anchored,
            track_all: true,
            is_sub: false,
            seed,
            arena: vec![],
            free: NONE,
            clist: ThreadList::new(),
            nlist: ThreadList::new(),
            worklist: vec![],
            merge: vec![0; prog.hotspot_table_size],
            gen: 0,
            sub_cache: HashMap::new(),
        }
    }

    fn search(&mut self, out: &mut [Span], start: usize) -> bool {
        self.input.reset(start);
        let mut matched = false;
        loop {
            let at = self.input.pos();
            let c = self.input.next().map(|(ch, _)| ch);
            self.gen += 1;

            if self.clist.is_empty() {
                if matched || (self.anchored && at != start) {
                    break;
                }
                if !self.anchored {
                    if let Some(ks) = &self.prog.kickstart {
                        match self.input.search(ks, at) {
                            None => break,
                            Some(j) if j > at => {
                                self.input.reset(j);
                                continue;
                            }
                            Some(_) => {}
                        }
                    }
                }
            }

            // Simulate an implicit leading `.*?` by seeding a fresh lowest-
            // priority thread at this position, unless a match already won.
            if !matched && (!self.anchored || at == start) {
                let ti = self.alloc_seeded(at);
                self.push_back(Side::Current, ti);
            }

            while let Some(ti) = self.pop_front() {
                match self.eval_one(ti, c, at, out) {
                    Outcome::Matched => {
                        matched = true;
                        self.discard_losers();
                        break;
                    }
                    Outcome::Dead | Outcome::Consumed => {
                        if self.drain_worklist(c, at, out) {
                            matched = true;
                            break;
                        }
                    }
                }
            }
            if c.is_none() {
                break;
            }
            std::mem::swap(&mut self.clist, &mut self.nlist);
        }
        matched
    }

    /// Drains the side worklist; true if a worklist thread committed.
    fn drain_worklist(&mut self, c: Option<char>, at: usize, out: &mut [Span]) -> bool {
        while let Some(ti) = self.worklist.pop() {
            match self.eval_one(ti, c, at, out) {
                Outcome::Matched => {
                    self.discard_losers();
                    return true;
                }
                Outcome::Dead | Outcome::Consumed => {}
            }
        }
        false
    }

    /// A match commits leftmost-first: everything of lower priority still
    /// queued at this position is dead.
    fn discard_losers(&mut self) {
        while let Some(ti) = self.worklist.pop() {
            self.recycle(ti);
        }
        while let Some(ti) = self.pop_front() {
            self.recycle(ti);
        }
    }

    /// One thread, evaluated to its next consumption, death or commit. All
    /// zero-width instructions run inline here.
    fn eval_one(&mut self, ti: u32, c: Option<char>, at: usize, out: &mut [Span]) -> Outcome {
        let mut pc = self.arena[ti as usize].pc;
        let mut counter = self.arena[ti as usize].counter;
        loop {
            let insn = self.prog.code[pc];
            match insn.op() {
                Op::End
                | Op::LookaheadEnd
                | Op::NeglookaheadEnd
                | Op::LookbehindEnd
                | Op::NeglookbehindEnd => {
                    let t = &mut self.arena[ti as usize];
                    t.groups[0].end = at;
                    for (slot, val) in out.iter_mut().zip(t.groups.iter()) {
                        *slot = *val;
                    }
                    self.recycle(ti);
                    return Outcome::Matched;
                }
                Op::Char => {
                    return if c == char::from_u32(insn.data()) {
                        self.consume(ti, pc + 1, counter, 0)
                    } else {
                        self.kill(ti)
                    };
                }
                Op::OrChar => {
                    let seq = insn.sequence() as usize;
                    let hit = c.is_some()
                        && (pc..pc + seq)
                            .any(|i| c == char::from_u32(self.prog.code[i].data()));
                    return if hit {
                        self.consume(ti, pc + seq, counter, 0)
                    } else {
                        self.kill(ti)
                    };
                }
                Op::Any => {
                    let ok = match c {
                        Some(ch) => {
                            self.prog.flags.singleline || (ch != '\n' && ch != '\r')
                        }
                        None => false,
                    };
                    return if ok {
                        self.consume(ti, pc + 1, counter, 0)
                    } else {
                        self.kill(ti)
                    };
                }
                Op::CodepointSet => {
                    let ok = c.map_or(false, |ch| {
                        self.prog.charsets[insn.data() as usize].contains(ch)
                    });
                    return if ok {
                        self.consume(ti, pc + 1, counter, 0)
                    } else {
                        self.kill(ti)
                    };
                }
                Op::Trie => {
                    let ok = c.map_or(false, |ch| {
                        self.prog.tries[insn.data() as usize]
                            .as_ref()
                            .map_or(false, |t| t.contains(ch))
                    });
                    return if ok {
                        self.consume(ti, pc + 1, counter, 0)
                    } else {
                        self.kill(ti)
                    };
                }
                Op::Bol => {
                    if self.at_line_start(at) {
                        pc += 1;
                    } else {
                        return self.kill(ti);
                    }
                }
                Op::Eol => {
                    if self.at_line_end(at) {
                        pc += 1;
                    } else {
                        return self.kill(ti);
                    }
                }
                Op::Wordboundary => {
                    if is_word_char(self.input.before(at)) != is_word_char(self.input.after(at))
                    {
                        pc += 1;
                    } else {
                        return self.kill(ti);
                    }
                }
                Op::Notwordboundary => {
                    if is_word_char(self.input.before(at)) == is_word_char(self.input.after(at))
                    {
                        pc += 1;
                    } else {
                        return self.kill(ti);
                    }
                }
                Op::GroupStart => {
                    if self.track_all || insn.flag() {
                        self.arena[ti as usize].groups[insn.data() as usize].begin = at;
                    }
                    pc += 1;
                }
                Op::GroupEnd => {
                    if self.track_all || insn.flag() {
                        self.arena[ti as usize].groups[insn.data() as usize].end = at;
                    }
                    pc += 1;
                }
                Op::Nop | Op::OrStart => pc += 1,
                Op::Option => {
                    let next = pc + 1 + insn.data() as usize;
                    if self.prog.code[next].op() == Op::Option {
                        self.fork(ti, next, counter);
                    }
                    pc += 1;
                }
                Op::GotoEndOr => pc += 1 + insn.data() as usize,
                Op::OrEnd => {
                    if self.dup(pc + 1, counter) {
                        return self.kill(ti);
                    }
                    pc += 2;
                }
                Op::InfiniteStart
                | Op::InfiniteQStart
                | Op::RepeatStart
                | Op::RepeatQStart => {
                    // The loop decision lives at the matching end.
                    pc = index_of_pair(&self.prog.code, pc);
                }
                Op::InfiniteEnd | Op::InfiniteQEnd => {
                    if self.dup(pc + 1, counter) {
                        return self.kill(ti);
                    }
                    let body = pc - insn.data() as usize;
                    let exit = pc + 2;
                    if insn.op() == Op::InfiniteEnd {
                        self.fork(ti, exit, counter);
                        pc = body;
                    } else {
                        self.fork(ti, body, counter);
                        pc = exit;
                    }
                }
                Op::RepeatEnd | Op::RepeatQEnd => {
                    if self.dup(pc + 1, counter) {
                        return self.kill(ti);
                    }
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
                            self.fork(ti, exit, counter % step);
                            counter += step;
                            pc = body;
                        } else {
                            self.fork(ti, body, counter + step);
                            counter %= step;
                            pc = exit;
                        }
                    } else {
                        counter %= step;
                        pc = exit;
                    }
                }
                Op::Backref => {
                    let g = insn.data() as usize;
                    // A local reference reads the in-flight captures; a
                    // global one inside a sub-matcher reads the outer
                    // matches as they were seeded.
                    let span = if insn.flag() || !self.is_sub {
                        self.arena[ti as usize].groups[g]
                    } else {
                        self.seed[g]
                    };
                    if span.begin >= span.end {
                        pc += 1;
                        continue;
                    }
                    let uop = self.arena[ti as usize].uop as usize;
                    let expected = if self.input.is_forward() {
                        self.input.after(span.begin + uop)
                    } else {
                        self.input.before(span.end - uop)
                    };
                    let ch = match (c, expected) {
                        (Some(a), Some(b)) if a == b => b,
                        _ => return self.kill(ti),
                    };
                    let uop = uop + self.input.width(ch);
                    return if uop >= span.end - span.begin {
                        self.consume(ti, pc + 1, counter, 0)
                    } else {
                        self.consume(ti, pc, counter, uop as u32)
                    };
                }
                Op::LookaheadStart
                | Op::NeglookaheadStart
                | Op::LookbehindStart
                | Op::NeglookbehindStart => {
                    match self.lookaround(ti, pc, at) {
                        Some(next_pc) => pc = next_pc,
                        None => return self.kill(ti),
                    }
                }
            }
        }
    }

    fn lookaround(&mut self, ti: u32, pc: usize, at: usize) -> Option<usize> {
        let insn = self.prog.code[pc];
        let op = insn.op();
        let body = pc + 3;
        let end_pc = body + insn.data() as usize;
        let ms = self.prog.code[pc + 1].raw() as usize;
        let me = self.prog.code[pc + 2].raw() as usize;
        let negative = matches!(op, Op::NeglookaheadStart | Op::NeglookbehindStart);
        let ahead = matches!(op, Op::LookaheadStart | Op::NeglookaheadStart);

        let mut scratch = self.sub_cache.remove(&pc).unwrap_or_else(|| SubScratch {
            merge: vec![0; self.prog.hotspot_table_size],
            gen: 0,
        });
        let seed = self.arena[ti as usize].groups.clone();
        // A lookahead body always evaluates forward from the current
        // boundary, a lookbehind body always backward over its pre-reversed
        // bytecode, whatever this matcher's own direction is.
        let result = if ahead == self.input.is_forward() {
            run_sub(self.prog, self.input.fork(at), body, at, seed, &mut scratch)
        } else {
            run_sub(
                self.prog,
                self.input.loop_back(at),
                body,
                at,
                seed,
                &mut scratch,
            )
        };
        self.sub_cache.insert(pc, scratch);

        match (result, negative) {
            (Some(groups), false) => {
                let t = &mut self.arena[ti as usize];
                for g in ms..me {
                    t.groups[g] = groups[g];
                }
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
            Some(p) if is_line_terminator(p) => {
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
            Some(n) if is_line_terminator(n) => {
                !(n == '\n' && self.input.before(at) == Some('\r'))
            }
            _ => false,
        }
    }

    /// Merge-table gate. True kills the thread: an equal (pc, counter) was
    /// already evaluated at this input position.
    fn dup(&mut self, slot_word: usize, counter: u32) -> bool {
        let slot = (self.prog.code[slot_word].raw() + counter) as usize;
        if self.merge[slot] == self.gen {
            true
        } else {
            self.merge[slot] = self.gen;
            false
        }
    }

    // ---- thread plumbing ----

    fn alloc(&mut self, pc: usize, counter: u32, uop: u32, groups: &[Span]) -> u32 {
        if self.free != NONE {
            let ti = self.free;
            let t = &mut self.arena[ti as usize];
            self.free = t.next;
            t.pc = pc;
            t.counter = counter;
            t.uop = uop;
            t.groups.clone_from_slice(groups);
            t.next = NONE;
            ti
        } else {
            self.arena.push(Thread {
                pc,
                counter,
                uop,
                groups: groups.to_vec(),
                next: NONE,
            });
            (self.arena.len() - 1) as u32
        }
    }

    fn alloc_seeded(&mut self, at: usize) -> u32 {
        let seed = self.seed.clone();
        let ti = self.alloc(self.start_pc, 0, 0, &seed);
        self.arena[ti as usize].groups[0].begin = at;
        ti
    }

    fn recycle(&mut self, ti: u32) {
        self.arena[ti as usize].next = self.free;
        self.free = ti;
    }

    fn kill(&mut self, ti: u32) -> Outcome {
        self.recycle(ti);
        Outcome::Dead
    }

    fn consume(&mut self, ti: u32, pc: usize, counter: u32, uop: u32) -> Outcome {
        {
            let t = &mut self.arena[ti as usize];
            t.pc = pc;
            t.counter = counter;
            t.uop = uop;
        }
        self.push_back(Side::Next, ti);
        Outcome::Consumed
    }

    fn fork(&mut self, ti: u32, pc: usize, counter: u32) {
        let groups = self.arena[ti as usize].groups.clone();
        let w = self.alloc(pc, counter, 0, &groups);
        self.worklist.push(w);
    }

    fn push_back(&mut self, side: Side, ti: u32) {
        self.arena[ti as usize].next = NONE;
        let list = match side {
            Side::Current => &mut self.clist,
            Side::Next => &mut self.nlist,
        };
        if list.head == NONE {
            list.head = ti;
            list.tail = ti;
        } else {
            let tail = list.tail;
            self.arena[tail as usize].next = ti;
            list.tail = ti;
        }
    }

    fn pop_front(&mut self) -> Option<u32> {
        if self.clist.head == NONE {
            return None;
        }
        let ti = self.clist.head;
        self.clist.head = self.arena[ti as usize].next;
        if self.clist.head == NONE {
            self.clist.tail = NONE;
        }
        self.arena[ti as usize].next = NONE;
        Some(ti)
    }
}

#[derive(Clone, Copy)]
enum Side {
    Current,
    Next,
}

/// Runs a lookaround body as an anchored sub-matcher and returns its capture
/// spans on success. The scratch keeps the sub-matcher's merge table and
/// generation alive across invocations at the same pc.
fn run_sub<I: Input>(
    prog: &Program,
    input: I,
    start_pc: usize,
    at: usize,
    seed: Vec<Span>,
    scratch: &mut SubScratch,
) -> Option<Vec<Span>> {
    let mut sub = Nfa::new(prog, input, start_pc, true, seed);
    sub.is_sub = true;
    std::mem::swap(&mut sub.merge, &mut scratch.merge);
    sub.gen = scratch.gen;
    let mut out = prog.alloc_groups();
    let matched = sub.search(&mut out, at);
    std::mem::swap(&mut sub.merge, &mut scratch.merge);
    scratch.gen = sub.gen;
    if matched {
        Some(out)
    } else {
        None
    }
}

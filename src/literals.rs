// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Literal-prefix extraction by partial evaluation of the bytecode. A regex
// prefix is a set of byte strings that must be matched at the beginning of
// the regex in order for the entire regex to match; the matcher picks the
// cheapest machine that can skip to one: memchr for one byte, a sparse map
// for several single bytes, Boyer-Moore-Horspool for one literal and a
// leftmost-first Aho-Corasick automaton for everything else.

use std::fmt;

use aho_corasick::{AhoCorasick, MatchKind};
use memchr::{memchr, memmem};

use crate::inst::{index_of_pair, len_of, Op};
use crate::program::Program;

// Byte budget over all alternate literals; one alternation branch may spend
// at most a tenth of it so a single class cannot starve its siblings.
const LIMIT: usize = 3000;
const CLASS_CHAR_LIMIT: u64 = 64;

pub struct AlternateLiterals {
    pub at_match: bool,
    pub literals: Vec<Vec<u8>>,
}

impl AlternateLiterals {
    fn empty() -> AlternateLiterals {
        AlternateLiterals { at_match: false, literals: vec![] }
    }

    fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    fn num_bytes(&self) -> usize {
        self.literals.iter().map(|l| l.len()).sum()
    }

    pub fn into_matcher(self) -> Literals {
        if self.literals.is_empty() {
            Literals::empty()
        } else {
            Literals {
                at_match: self.at_match,
                matcher: LiteralMatcher::new(self.literals),
            }
        }
    }
}

enum Walk {
    /// The walk consumed the whole range.
    Complete,
    /// The walk reached the end-of-program instruction.
    Match,
    /// The walk hit an instruction it cannot evaluate.
    Stopped,
}

/// Builds the alternate literal prefixes of a compiled program.
pub struct BuildPrefixes<'a> {
    prog: &'a Program,
    limit: usize,
}

impl<'a> BuildPrefixes<'a> {
    pub fn new(prog: &'a Program) -> BuildPrefixes<'a> {
        BuildPrefixes { prog, limit: LIMIT }
    }

    pub fn literals(self) -> AlternateLiterals {
        let code = &self.prog.code;
        let mut alts = AlternateLiterals { at_match: false, literals: vec![vec![]] };
        let walk = self.walk(0, code.len(), &mut alts);
        // An empty alternate means some path needs no particular prefix, so
        // there is nothing to skip with.
        if alts.literals.iter().any(|l| l.is_empty()) {
            return AlternateLiterals::empty();
        }
        alts.at_match = matches!(walk, Walk::Match);
        alts
    }

    /// Appends the literal bytes of `code[pc..end]` to every alternate in
    /// `alts`, multiplying alternates at alternations and small classes.
    fn walk(&self, mut pc: usize, end: usize, alts: &mut AlternateLiterals) -> Walk {
        let code = &self.prog.code;
        while pc < end {
            let insn = code[pc];
            match insn.op() {
                Op::End => return Walk::Match,
                Op::Nop | Op::GroupStart | Op::GroupEnd => pc += 1,
                Op::Char => {
                    let c = match char::from_u32(insn.data()) {
                        Some(c) => c,
                        None => return Walk::Stopped,
                    };
                    if !self.add_char(alts, c) {
                        return Walk::Stopped;
                    }
                    pc += 1;
                }
                Op::OrChar => {
                    let seq = insn.sequence() as usize;
                    let chars: Vec<char> = (pc..pc + seq)
                        .filter_map(|i| char::from_u32(code[i].data()))
                        .collect();
                    if !self.add_alternate_chars(alts, &chars) {
                        return Walk::Stopped;
                    }
                    pc += seq;
                }
                Op::CodepointSet => {
                    let set = &self.prog.charsets[insn.data() as usize];
                    if set.len() > CLASS_CHAR_LIMIT {
                        return Walk::Stopped;
                    }
                    let chars: Vec<char> = set.chars().collect();
                    if !self.add_alternate_chars(alts, &chars) {
                        return Walk::Stopped;
                    }
                    pc += 1;
                }
                Op::OrStart => {
                    let or_end = index_of_pair(code, pc);
                    let mut combined: Vec<Vec<u8>> = vec![];
                    let mut all_complete = true;
                    let mut opt = pc + 1;
                    loop {
                        debug_assert_eq!(code[opt].op(), Op::Option);
                        let next = opt + 1 + code[opt].data() as usize;
                        let body_end = if next < or_end { next - 1 } else { next };
                        let mut branch = AlternateLiterals {
                            at_match: false,
                            literals: alts.literals.clone(),
                        };
                        match (BuildPrefixes { prog: self.prog, limit: self.limit / 10 })
                            .walk(opt + 1, body_end, &mut branch)
                        {
                            Walk::Complete => {}
                            Walk::Match => all_complete = false,
                            Walk::Stopped => all_complete = false,
                        }
                        if branch.is_empty() {
                            return Walk::Stopped;
                        }
                        combined.extend(branch.literals);
                        if combined.iter().map(|l| l.len()).sum::<usize>() > self.limit {
                            return Walk::Stopped;
                        }
                        if next >= or_end {
                            break;
                        }
                        opt = next;
                    }
                    alts.literals = combined;
                    if !all_complete {
                        return Walk::Stopped;
                    }
                    pc = or_end + len_of(Op::OrEnd);
                }
                // Anything else (loops, assertions, tries, lookarounds,
                // back-references) ends the literal prefix.
                _ => return Walk::Stopped,
            }
        }
        Walk::Complete
    }

    fn add_char(&self, alts: &mut AlternateLiterals, c: char) -> bool {
        let mut buf = [0u8; 4];
        let bytes = c.encode_utf8(&mut buf).as_bytes();
        if alts.num_bytes() + bytes.len() * alts.literals.len() > self.limit {
            return false;
        }
        for alt in &mut alts.literals {
            alt.extend_from_slice(bytes);
        }
        true
    }

    /// Treats a small set of characters as its own alternation: every
    /// existing alternate is copied once per member.
    fn add_alternate_chars(&self, alts: &mut AlternateLiterals, chars: &[char]) -> bool {
        if chars.is_empty() {
            return false;
        }
        let projected = (alts.num_bytes() + alts.literals.len() * 4) * chars.len();
        if projected > self.limit {
            return false;
        }
        let orig = std::mem::take(&mut alts.literals);
        let mut buf = [0u8; 4];
        for &c in chars {
            let bytes = c.encode_utf8(&mut buf).as_bytes();
            for alt in &orig {
                let mut alt = alt.clone();
                alt.extend_from_slice(bytes);
                alts.literals.push(alt);
            }
        }
        true
    }
}

/// A prefix machine extracted from a compiled regular expression.
#[derive(Clone)]
pub struct Literals {
    at_match: bool,
    matcher: LiteralMatcher,
}

#[derive(Clone)]
enum LiteralMatcher {
    /// No prefixes. (Never advances through the input.)
    Empty,
    /// A single byte prefix: plain memchr.
    Byte(u8),
    /// A set of two or more single byte prefixes behind a sparse map.
    Bytes { chars: Vec<u8>, sparse: Vec<bool> },
    /// One multi-byte literal: memmem's precomputed substring searcher.
    Single {
        pat: Vec<u8>,
        finder: memmem::Finder<'static>,
    },
    /// Several literals: a leftmost-first Aho-Corasick automaton.
    Automaton { ac: AhoCorasick, lits: Vec<Vec<u8>> },
}

impl Literals {
    fn empty() -> Literals {
        Literals { at_match: false, matcher: LiteralMatcher::Empty }
    }

    /// True iff a literal match corresponds to a match of the whole regex.
    pub fn at_match(&self) -> bool {
        self.at_match
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.matcher, LiteralMatcher::Empty)
    }

    /// Finds the span of the next prefix occurrence in `haystack`. The
    /// matching engines only need the start to skip ahead, but the end is
    /// reported too for the case where the prefix is the entire regex.
    pub fn find(&self, haystack: &[u8]) -> Option<(usize, usize)> {
        use self::LiteralMatcher::*;
        match self.matcher {
            Empty => Some((0, 0)),
            Byte(b) => memchr(b, haystack).map(|i| (i, i + 1)),
            Bytes { ref sparse, .. } => {
                haystack.iter().position(|&b| sparse[b as usize]).map(|i| (i, i + 1))
            }
            Single { ref pat, ref finder } => {
                finder.find(haystack).map(|i| (i, i + pat.len()))
            }
            Automaton { ref ac, .. } => {
                ac.find(haystack).map(|m| (m.start(), m.end()))
            }
        }
    }

    /// True iff a prefix hit is guaranteed to be the leftmost-first choice
    /// of the regex; only then may the exact-literal engine answer a match
    /// without running a full matcher.
    pub fn preserves_priority(&self) -> bool {
        use self::LiteralMatcher::*;
        match self.matcher {
            Empty | Byte(_) | Bytes { .. } | Single { .. } => true,
            // Same-length alternates cannot shadow one another.
            Automaton { ref lits, .. } => lits.iter().all(|l| l.len() == lits[0].len()),
        }
    }

    /// All prefixes participating in this machine, for tests.
    #[allow(dead_code)]
    pub fn prefixes(&self) -> Vec<String> {
        use self::LiteralMatcher::*;
        match self.matcher {
            Empty => vec![],
            Byte(b) => vec![(b as char).to_string()],
            Bytes { ref chars, .. } => {
                chars.iter().map(|&b| (b as char).to_string()).collect()
            }
            Single { ref pat, .. } => {
                vec![String::from_utf8_lossy(pat).into_owned()]
            }
            Automaton { ref lits, .. } => lits
                .iter()
                .map(|l| String::from_utf8_lossy(l).into_owned())
                .collect(),
        }
    }
}

impl LiteralMatcher {
    fn new(mut literals: Vec<Vec<u8>>) -> LiteralMatcher {
        use self::LiteralMatcher::*;
        if literals.len() == 1 && literals[0].len() == 1 {
            Byte(literals[0][0])
        } else if !literals.is_empty() && literals.iter().all(|l| l.len() == 1) {
            let mut sparse = vec![false; 256];
            let mut chars = vec![];
            for lit in &literals {
                chars.push(lit[0]);
                sparse[lit[0] as usize] = true;
            }
            Bytes { chars, sparse }
        } else if literals.len() == 1 {
            let pat = literals.pop().expect("one literal");
            let finder = memmem::Finder::new(&pat).into_owned();
            Single { pat, finder }
        } else {
            let ac = AhoCorasick::builder()
                .match_kind(MatchKind::LeftmostFirst)
                .build(&literals)
                .expect("BUG: literal set rejected by aho-corasick");
            Automaton { ac, lits: literals }
        }
    }
}

impl fmt::Debug for Literals {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::LiteralMatcher::*;
        write!(f, "complete? {}, matcher: ", self.at_match)?;
        match self.matcher {
            Empty => write!(f, "Empty"),
            Byte(b) => write!(f, "{:?}", b as char),
            Bytes { ref chars, .. } => write!(f, "{:?}", chars),
            Single { ref pat, .. } => write!(f, "{:?}", String::from_utf8_lossy(pat)),
            Automaton { ref lits, .. } => write!(f, "Automaton({} literals)", lits.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;

    fn prefixes(pattern: &str) -> (bool, Vec<Vec<u8>>) {
        let prog = Program::new(pattern, "").unwrap();
        let alts = BuildPrefixes::new(&prog).literals();
        (alts.at_match, alts.literals)
    }

    #[test]
    fn single() {
        let (complete, lits) = prefixes("a");
        assert!(complete);
        assert_eq!(lits, vec![b"a".to_vec()]);

        let (complete, lits) = prefixes("a+");
        assert!(!complete);
        assert_eq!(lits, vec![b"a".to_vec()]);
    }

    #[test]
    fn many() {
        let (complete, lits) = prefixes("abcdef");
        assert!(complete);
        assert_eq!(lits, vec![b"abcdef".to_vec()]);

        let (complete, lits) = prefixes("abc+");
        assert!(!complete);
        assert_eq!(lits, vec![b"abc".to_vec()]);
    }

    #[test]
    fn alternates() {
        let (complete, mut lits) = prefixes("abc|def");
        assert!(complete);
        lits.sort();
        assert_eq!(lits, vec![b"abc".to_vec(), b"def".to_vec()]);

        let (complete, _) = prefixes("abc+|def");
        assert!(!complete);
    }

    #[test]
    fn classes_multiply() {
        let (_, mut lits) = prefixes("[0-3]x");
        lits.sort();
        assert_eq!(
            lits,
            vec![b"0x".to_vec(), b"1x".to_vec(), b"2x".to_vec(), b"3x".to_vec()]
        );
    }

    #[test]
    fn groups_are_transparent() {
        let (complete, lits) = prefixes("(ab)(c)");
        assert!(complete);
        assert_eq!(lits, vec![b"abc".to_vec()]);
    }

    #[test]
    fn no_prefix_for_leading_loop() {
        let (_, lits) = prefixes("a*b");
        assert!(lits.is_empty());
    }

    #[test]
    fn matcher_selection() {
        let lits = AlternateLiterals { at_match: true, literals: vec![b"a".to_vec()] }
            .into_matcher();
        assert_eq!(lits.find(b"xxaz"), Some((2, 3)));

        let lits = AlternateLiterals {
            at_match: true,
            literals: vec![b"a".to_vec(), b"q".to_vec()],
        }
        .into_matcher();
        assert_eq!(lits.find(b"zzq"), Some((2, 3)));
        assert!(lits.preserves_priority());

        let lits = AlternateLiterals { at_match: true, literals: vec![b"needle".to_vec()] }
            .into_matcher();
        assert_eq!(lits.find(b"hay needle hay"), Some((4, 10)));

        let lits = AlternateLiterals {
            at_match: true,
            literals: vec![b"foo".to_vec(), b"barx".to_vec()],
        }
        .into_matcher();
        assert_eq!(lits.find(b"zz barx foo"), Some((3, 7)));
        assert!(!lits.preserves_priority());
    }

    #[test]
    fn prefixes_report_content() {
        let prog = Program::new("abc|defg", "").unwrap();
        let lits = BuildPrefixes::new(&prog).literals().into_matcher();
        assert!(!lits.preserves_priority());
        let mut p = lits.prefixes();
        p.sort();
        assert_eq!(p, vec!["abc".to_string(), "defg".to_string()]);

        let prog = Program::new("needle", "").unwrap();
        let lits = BuildPrefixes::new(&prog).literals().into_matcher();
        assert_eq!(lits.prefixes(), vec!["needle".to_string()]);
    }

    #[test]
    fn casefold_prefixes() {
        let prog = Program::new("ab", "i").unwrap();
        let alts = BuildPrefixes::new(&prog).literals();
        let mut lits = alts.literals;
        lits.sort();
        assert!(lits.contains(&b"ab".to_vec()));
        assert!(lits.contains(&b"AB".to_vec()));
        assert!(lits.contains(&b"Ab".to_vec()));
        assert!(lits.contains(&b"aB".to_vec()));
    }
}

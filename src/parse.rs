// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::charset::CodepointSet;
use crate::inst::{index_of_pair, len_of, Insn, InstIdx, Op};
use crate::unicode;
use crate::Error;

/// Capturing groups per pattern, the zeroth included.
pub const MAX_GROUPS: usize = 1 << 19;
/// Open lookarounds at any point of the pattern.
pub const MAX_LOOKAROUND_DEPTH: usize = 16;
/// Compiled program length in words.
pub const MAX_COMPILED_LEN: usize = 1 << 18;
/// Product of repetition ranges over any nesting of `{n,m}`.
pub const MAX_REPEAT_PRODUCT: u64 = 1 << 20;

// Charset lowering thresholds: a set this small becomes an OrChar run, and a
// set with more than this many interval words goes through a trie.
const MAX_ORCHAR: u64 = 6;
const TRIE_INTERVAL_WORDS: usize = 6;

const ESCAPABLE: &str = "()[]{}|*+?.^$\\/,;:#&%<>~`\"-";

/// Pattern flags: `g` global, `i` casefold, `x` freeform, `U` nonunicode,
/// `m` multiline, `s` singleline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    pub global: bool,
    pub casefold: bool,
    pub freeform: bool,
    pub nonunicode: bool,
    pub multiline: bool,
    pub singleline: bool,
}

impl Flags {
    pub fn parse(s: &str) -> Result<Flags, Error> {
        let mut flags = Flags::default();
        for (i, c) in s.char_indices() {
            let slot = match c {
                'g' => &mut flags.global,
                'i' => &mut flags.casefold,
                'x' => &mut flags.freeform,
                'U' => &mut flags.nonunicode,
                'm' => &mut flags.multiline,
                's' => &mut flags.singleline,
                _ => {
                    return Err(Error::Syntax {
                        msg: format!("unknown flag `{}`", c),
                        pos: i,
                    })
                }
            };
            if *slot {
                return Err(Error::Syntax {
                    msg: format!("duplicate flag `{}`", c),
                    pos: i,
                });
            }
            *slot = true;
        }
        Ok(flags)
    }
}

/// The raw output of the compiler, before post-processing.
#[derive(Clone, Debug)]
pub struct Parsed {
    pub code: Vec<Insn>,
    /// Number of capture slots, slot 0 (the whole match) included.
    pub ngroup: usize,
    /// Named groups, sorted lexicographically by name.
    pub names: Vec<(String, usize)>,
    pub charsets: Vec<CodepointSet>,
    /// Charset ids that were lowered to `Trie` instructions.
    pub trie_ids: Vec<usize>,
    /// Group indexes referenced by a `Backref`.
    pub backrefed: Vec<bool>,
    pub has_backref: bool,
    pub flags: Flags,
}

/// Compiles a pattern into raw bytecode.
pub fn compile(pattern: &str, flags: Flags) -> Result<Parsed, Error> {
    let mut p = Parser::new(pattern, flags);
    let mut code = p.parse_alternation()?;
    if let Some(c) = p.peek() {
        debug_assert_eq!(c, ')');
        return Err(p.err("unmatched `)`"));
    }
    code.push(Insn::new(Op::End, 0));
    p.check_len(code.len())?;
    let mut names = p.names;
    names.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(Parsed {
        code,
        ngroup: p.ngroup,
        names,
        charsets: p.charsets,
        trie_ids: p.trie_ids,
        backrefed: p.backrefed,
        has_backref: p.has_backref,
        flags,
    })
}

struct Parser {
    // (byte offset, codepoint) for every pattern character.
    chars: Vec<(usize, char)>,
    pattern_len: usize,
    pos: usize,
    flags: Flags,
    ngroup: usize,
    closed: Vec<bool>,
    names: Vec<(String, usize)>,
    charsets: Vec<CodepointSet>,
    trie_ids: Vec<usize>,
    backrefed: Vec<bool>,
    has_backref: bool,
    look_depth: usize,
    // First group index allocated inside each open lookaround.
    look_entry: Vec<usize>,
}

enum Token {
    Lit(char),
    Set(CodepointSet),
    WordB,
    NotWordB,
    Backref(u32),
}

impl Parser {
    fn new(pattern: &str, flags: Flags) -> Parser {
        Parser {
            chars: pattern.char_indices().collect(),
            pattern_len: pattern.len(),
            pos: 0,
            flags,
            ngroup: 1,
            closed: vec![true],
            names: vec![],
            charsets: vec![],
            trie_ids: vec![],
            backrefed: vec![false],
            has_backref: false,
            look_depth: 0,
            look_entry: vec![],
        }
    }

    // ---- cursor helpers ----

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).map(|&(_, c)| c)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn eat(&mut self, want: char) -> bool {
        if self.peek() == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: char) -> Result<(), Error> {
        if self.eat(want) {
            Ok(())
        } else {
            Err(self.err(&format!("expected `{}`", want)))
        }
    }

    fn byte_pos(&self) -> usize {
        self.chars
            .get(self.pos)
            .map_or(self.pattern_len, |&(off, _)| off)
    }

    fn err(&self, msg: &str) -> Error {
        Error::Syntax {
            msg: msg.to_string(),
            pos: self.byte_pos(),
        }
    }

    fn check_len(&self, len: usize) -> Result<(), Error> {
        if len > MAX_COMPILED_LEN {
            Err(Error::LimitExceeded {
                which: "compiled length",
                limit: MAX_COMPILED_LEN,
            })
        } else {
            Ok(())
        }
    }

    /// Freeform mode: unescaped whitespace is insignificant and `#` comments
    /// run to end of line. Never applied inside a character class.
    fn skip_freeform(&mut self) {
        if !self.flags.freeform {
            return;
        }
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.pos += 1;
                }
                Some('#') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    // ---- expression structure ----

    fn parse_alternation(&mut self) -> Result<Vec<Insn>, Error> {
        let mut alts = vec![self.parse_concat()?];
        while self.eat('|') {
            alts.push(self.parse_concat()?);
        }
        if alts.len() == 1 {
            return Ok(alts.pop().expect("one alternative"));
        }
        let total: usize = alts.iter().map(|a| a.len() + 2).sum();
        self.check_len(total)?;
        let code = assemble_or(alts);
        self.check_len(code.len())?;
        Ok(code)
    }

    fn parse_concat(&mut self) -> Result<Vec<Insn>, Error> {
        let mut buf: Vec<Insn> = vec![];
        // Start of the last quantifiable unit emitted into `buf`.
        let mut last: Option<usize> = None;
        loop {
            self.skip_freeform();
            let c = match self.peek() {
                None => break,
                Some(c) => c,
            };
            match c {
                '|' | ')' => break,
                '(' => {
                    self.pos += 1;
                    let start = buf.len();
                    self.parse_group(&mut buf)?;
                    last = Some(start);
                }
                '[' => {
                    self.pos += 1;
                    let set = self.parse_class()?;
                    let start = buf.len();
                    self.emit_set(&mut buf, set);
                    last = Some(start);
                }
                '.' => {
                    self.pos += 1;
                    last = Some(buf.len());
                    buf.push(Insn::new(Op::Any, 0));
                }
                '^' => {
                    self.pos += 1;
                    last = Some(buf.len());
                    buf.push(Insn::new(Op::Bol, 0));
                }
                '$' => {
                    self.pos += 1;
                    last = Some(buf.len());
                    buf.push(Insn::new(Op::Eol, 0));
                }
                '*' => {
                    self.pos += 1;
                    let greedy = !self.eat('?');
                    self.apply_quantifier(&mut buf, &mut last, 0, u32::MAX, greedy)?;
                }
                '+' => {
                    self.pos += 1;
                    let greedy = !self.eat('?');
                    self.apply_quantifier(&mut buf, &mut last, 1, u32::MAX, greedy)?;
                }
                '?' => {
                    self.pos += 1;
                    let greedy = !self.eat('?');
                    self.apply_quantifier(&mut buf, &mut last, 0, 1, greedy)?;
                }
                '{' => {
                    self.pos += 1;
                    let (min, max) = self.parse_counted()?;
                    let greedy = !self.eat('?');
                    self.apply_quantifier(&mut buf, &mut last, min, max, greedy)?;
                }
                '\\' => {
                    self.pos += 1;
                    match self.parse_escape(false)? {
                        Token::Lit(c) => {
                            last = Some(buf.len());
                            self.emit_literal(&mut buf, c);
                        }
                        Token::Set(set) => {
                            let start = buf.len();
                            self.emit_set(&mut buf, set);
                            last = Some(start);
                        }
                        Token::WordB => {
                            last = Some(buf.len());
                            buf.push(Insn::new(Op::Wordboundary, 0));
                        }
                        Token::NotWordB => {
                            last = Some(buf.len());
                            buf.push(Insn::new(Op::Notwordboundary, 0));
                        }
                        Token::Backref(n) => {
                            let insn = self.backref(n)?;
                            last = Some(buf.len());
                            buf.push(insn);
                        }
                    }
                }
                _ => {
                    self.pos += 1;
                    last = Some(buf.len());
                    self.emit_literal(&mut buf, c);
                }
            }
            self.check_len(buf.len())?;
        }
        Ok(buf)
    }

    fn parse_group(&mut self, buf: &mut Vec<Insn>) -> Result<(), Error> {
        if !self.eat('?') {
            return self.capture(buf, None);
        }
        match self.peek() {
            Some(':') => {
                self.pos += 1;
                // The Nop gives a following quantifier one instruction to
                // anchor the wrap on.
                buf.push(Insn::new(Op::Nop, 0));
                let body = self.parse_alternation()?;
                self.expect(')')?;
                buf.extend(body);
                Ok(())
            }
            Some('P') => {
                self.pos += 1;
                self.expect('<')?;
                let name = self.parse_group_name()?;
                self.expect('>')?;
                self.capture(buf, Some(name))
            }
            Some('=') => {
                self.pos += 1;
                self.lookaround(buf, Op::LookaheadStart)
            }
            Some('!') => {
                self.pos += 1;
                self.lookaround(buf, Op::NeglookaheadStart)
            }
            Some('<') => {
                self.pos += 1;
                match self.bump() {
                    Some('=') => self.lookaround(buf, Op::LookbehindStart),
                    Some('!') => self.lookaround(buf, Op::NeglookbehindStart),
                    _ => Err(self.err("expected `=` or `!` after `(?<`")),
                }
            }
            _ => Err(self.err("unrecognized group syntax")),
        }
    }

    fn capture(&mut self, buf: &mut Vec<Insn>, name: Option<String>) -> Result<(), Error> {
        if self.ngroup >= MAX_GROUPS {
            return Err(Error::LimitExceeded {
                which: "group count",
                limit: MAX_GROUPS,
            });
        }
        let idx = self.ngroup;
        self.ngroup += 1;
        self.closed.push(false);
        self.backrefed.push(false);
        if let Some(name) = name {
            if self.names.iter().any(|(n, _)| *n == name) {
                return Err(self.err(&format!("duplicate group name `{}`", name)));
            }
            self.names.push((name, idx));
        }
        buf.push(Insn::new(Op::GroupStart, idx as u32));
        let body = self.parse_alternation()?;
        self.expect(')')?;
        buf.extend(body);
        buf.push(Insn::new(Op::GroupEnd, idx as u32));
        self.closed[idx] = true;
        Ok(())
    }

    fn parse_group_name(&mut self) -> Result<String, Error> {
        let mut name = String::new();
        match self.peek() {
            Some(c) if c.is_alphabetic() || c == '_' => {
                name.push(c);
                self.pos += 1;
            }
            _ => return Err(self.err("group name must start with a letter or `_`")),
        }
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(name)
    }

    fn lookaround(&mut self, buf: &mut Vec<Insn>, op: Op) -> Result<(), Error> {
        if self.look_depth == MAX_LOOKAROUND_DEPTH {
            return Err(Error::LimitExceeded {
                which: "lookaround depth",
                limit: MAX_LOOKAROUND_DEPTH,
            });
        }
        self.look_depth += 1;
        let ms = self.ngroup;
        self.look_entry.push(ms);
        let body = self.parse_alternation()?;
        self.expect(')')?;
        self.look_entry.pop();
        self.look_depth -= 1;
        let me = self.ngroup;
        let body = if matches!(op, Op::LookbehindStart | Op::NeglookbehindStart) {
            reverse_code(&body)
        } else {
            body
        };
        buf.push(Insn::new(op, body.len() as u32));
        buf.push(Insn::from_raw(ms as u32));
        buf.push(Insn::from_raw(me as u32));
        let len = body.len() as u32;
        buf.extend(body);
        buf.push(Insn::new(op.paired(), len));
        Ok(())
    }

    fn backref(&mut self, n: u32) -> Result<Insn, Error> {
        let n = n as usize;
        if n == 0 || n >= self.ngroup {
            return Err(self.err(&format!("back-reference to unknown group {}", n)));
        }
        if !self.closed[n] {
            return Err(self.err(&format!("back-reference to unclosed group {}", n)));
        }
        self.backrefed[n] = true;
        self.has_backref = true;
        let mut insn = Insn::new(Op::Backref, n as u32);
        // A reference whose target is captured by the enclosing lookaround
        // resolves locally; everything else goes to the outer matches.
        if let Some(&entry) = self.look_entry.last() {
            if n >= entry {
                insn.set_flag();
            }
        }
        Ok(insn)
    }

    // ---- quantifiers ----

    fn parse_counted(&mut self) -> Result<(u32, u32), Error> {
        let min = self.parse_number()?;
        let max = if self.eat(',') {
            if self.peek() == Some('}') {
                u32::MAX
            } else {
                self.parse_number()?
            }
        } else {
            min
        };
        self.expect('}')?;
        if max != u32::MAX && min > max {
            return Err(self.err("inverted repetition range"));
        }
        Ok((min, max))
    }

    fn parse_number(&mut self) -> Result<u32, Error> {
        let mut seen = false;
        let mut n: u64 = 0;
        while let Some(c) = self.peek() {
            match c.to_digit(10) {
                Some(d) => {
                    seen = true;
                    self.pos += 1;
                    n = n * 10 + d as u64;
                    if n > MAX_REPEAT_PRODUCT {
                        return Err(self.err("repetition count overflow"));
                    }
                }
                None => break,
            }
        }
        if !seen {
            return Err(self.err("expected a repetition count"));
        }
        Ok(n as u32)
    }

    fn apply_quantifier(
        &mut self,
        buf: &mut Vec<Insn>,
        last: &mut Option<usize>,
        min: u32,
        max: u32,
        greedy: bool,
    ) -> Result<(), Error> {
        let start = match last.take() {
            Some(start) => start,
            None => return Err(self.err("quantifier must follow an atom or group")),
        };
        if min == 1 && max == 1 {
            *last = Some(start);
            return Ok(());
        }
        if max == 0 {
            buf.truncate(start);
            return Ok(());
        }
        match (min, max) {
            (0, u32::MAX) => wrap_infinite(buf, start, greedy),
            (_, u32::MAX) => {
                // Mandatory prefix, then an open tail over a copy.
                let body = buf[start..].to_vec();
                if min > 1 {
                    wrap_repeat(buf, start, min, min, greedy);
                }
                let tail = buf.len();
                buf.extend(body);
                wrap_infinite(buf, tail, greedy);
            }
            (0, _) => {
                // `x?` and `x{0,m}` go through the alternation scheme so that
                // a thread reaching RepeatStart always owes one iteration.
                let mut body = buf.split_off(start);
                if max > 1 {
                    wrap_repeat(&mut body, 0, 1, max, greedy);
                }
                let alts = if greedy {
                    vec![body, vec![]]
                } else {
                    vec![vec![], body]
                };
                buf.extend(assemble_or(alts));
            }
            _ => wrap_repeat(buf, start, min, max, greedy),
        }
        self.check_len(buf.len())
    }

    // ---- atoms ----

    fn emit_literal(&mut self, buf: &mut Vec<Insn>, c: char) {
        if !self.flags.casefold {
            buf.push(Insn::new(Op::Char, c as u32));
            return;
        }
        let mut orbit = unicode::case_orbit(c);
        orbit.sort();
        orbit.dedup();
        if orbit.len() == 1 {
            buf.push(Insn::new(Op::Char, orbit[0] as u32));
        } else {
            let seq = orbit.len() as u32;
            for c in orbit {
                buf.push(Insn::with_sequence(Op::OrChar, c as u32, seq));
            }
        }
    }

    fn emit_set(&mut self, buf: &mut Vec<Insn>, set: CodepointSet) {
        let size = set.len();
        if size == 1 {
            let c = set.chars().next().expect("singleton set");
            buf.push(Insn::new(Op::Char, c as u32));
            return;
        }
        if size <= MAX_ORCHAR && size >= 2 {
            let chars: Vec<char> = set.chars().collect();
            if chars.len() == size as usize {
                let seq = chars.len() as u32;
                for c in chars {
                    buf.push(Insn::with_sequence(Op::OrChar, c as u32, seq));
                }
                return;
            }
        }
        let id = self.intern_set(set);
        if self.charsets[id].intervals().len() * 2 > TRIE_INTERVAL_WORDS {
            if !self.trie_ids.contains(&id) {
                self.trie_ids.push(id);
            }
            buf.push(Insn::new(Op::Trie, id as u32));
        } else {
            buf.push(Insn::new(Op::CodepointSet, id as u32));
        }
    }

    fn intern_set(&mut self, set: CodepointSet) -> usize {
        match self.charsets.iter().position(|s| *s == set) {
            Some(id) => id,
            None => {
                self.charsets.push(set);
                self.charsets.len() - 1
            }
        }
    }

    // ---- escapes ----

    fn parse_escape(&mut self, in_class: bool) -> Result<Token, Error> {
        let c = match self.bump() {
            Some(c) => c,
            None => return Err(self.err("incomplete escape")),
        };
        let unicode_mode = !self.flags.nonunicode;
        Ok(match c {
            'f' => Token::Lit('\x0C'),
            'n' => Token::Lit('\n'),
            'r' => Token::Lit('\r'),
            't' => Token::Lit('\t'),
            'v' => Token::Lit('\x0B'),
            '0' => Token::Lit('\0'),
            'd' => Token::Set(unicode::perl_class('d', unicode_mode)),
            'D' => Token::Set(unicode::perl_class('d', unicode_mode).negate()),
            's' => Token::Set(unicode::perl_class('s', unicode_mode)),
            'S' => Token::Set(unicode::perl_class('s', unicode_mode).negate()),
            'w' => Token::Set(unicode::perl_class('w', unicode_mode)),
            'W' => Token::Set(unicode::perl_class('w', unicode_mode).negate()),
            'b' if in_class => Token::Lit('\x08'),
            'b' => Token::WordB,
            'B' if in_class => return Err(self.err("`\\B` is not valid in a class")),
            'B' => Token::NotWordB,
            'x' => Token::Lit(self.parse_hex(2)?),
            'u' => Token::Lit(self.parse_hex(4)?),
            'U' => Token::Lit(self.parse_hex(8)?),
            'c' => match self.bump() {
                Some(x) if x.is_ascii_alphabetic() => {
                    Token::Lit((x.to_ascii_uppercase() as u8 - b'A' + 1) as char)
                }
                _ => return Err(self.err("`\\c` must be followed by a letter")),
            },
            'p' | 'P' => {
                let name = self.parse_property_name()?;
                let set = match unicode::property(&name) {
                    Some(set) => set,
                    None => return Err(self.err(&format!("unknown property `{}`", name))),
                };
                Token::Set(if c == 'P' { set.negate() } else { set })
            }
            '1'..='9' if !in_class => {
                let mut n = c.to_digit(10).expect("digit") as u64;
                while let Some(d) = self.peek().and_then(|c| c.to_digit(10)) {
                    self.pos += 1;
                    n = n * 10 + d as u64;
                    if n >= MAX_GROUPS as u64 {
                        return Err(self.err("back-reference index overflow"));
                    }
                }
                Token::Backref(n as u32)
            }
            c if ESCAPABLE.contains(c) => Token::Lit(c),
            c if c.is_whitespace() => Token::Lit(c),
            _ => return Err(self.err(&format!("unknown escape `\\{}`", c))),
        })
    }

    fn parse_hex(&mut self, digits: usize) -> Result<char, Error> {
        let mut n: u32 = 0;
        for _ in 0..digits {
            let d = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.err("invalid hexadecimal escape"))?;
            n = n * 16 + d;
        }
        char::from_u32(n).ok_or_else(|| self.err("escape is not a valid codepoint"))
    }

    fn parse_property_name(&mut self) -> Result<String, Error> {
        if self.eat('{') {
            let mut name = String::new();
            loop {
                match self.bump() {
                    Some('}') => return Ok(name),
                    Some(c) => name.push(c),
                    None => return Err(self.err("unmatched `{` in property")),
                }
            }
        }
        match self.bump() {
            Some(c) if c.is_ascii_alphabetic() => Ok(c.to_string()),
            _ => Err(self.err("expected a property name")),
        }
    }

    // ---- character classes ----

    fn parse_class(&mut self) -> Result<CodepointSet, Error> {
        let negated = self.eat('^');
        if self.peek() == Some(']') {
            return Err(self.err("empty character class"));
        }
        let set = self.parse_class_expr(0)?;
        self.expect(']')?;
        Ok(if negated { set.negate() } else { set })
    }

    /// Precedence climbing over the class operators. Union (implicit) binds
    /// tightest, then `&&`, `~~` and `--` in decreasing order; prefix `^`
    /// belongs to the class or nested class it opens.
    fn parse_class_expr(&mut self, min_prec: u8) -> Result<CodepointSet, Error> {
        const PREC_DIFF: u8 = 1;
        const PREC_SYM: u8 = 2;
        const PREC_INT: u8 = 3;
        const PREC_UNION: u8 = 4;

        let mut lhs = self.parse_class_term()?;
        loop {
            let (prec, width) = match (self.peek(), self.peek_at(1)) {
                (None, _) | (Some(']'), _) => break,
                (Some('&'), Some('&')) => (PREC_INT, 2),
                (Some('~'), Some('~')) => (PREC_SYM, 2),
                (Some('-'), Some('-')) => (PREC_DIFF, 2),
                _ => (PREC_UNION, 0),
            };
            if prec < min_prec {
                break;
            }
            self.pos += width;
            let rhs = self.parse_class_expr(prec + 1)?;
            lhs = match prec {
                PREC_UNION => lhs.union(&rhs),
                PREC_INT => lhs.intersect(&rhs),
                PREC_SYM => lhs.symmetric_difference(&rhs),
                _ => lhs.difference(&rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_class_term(&mut self) -> Result<CodepointSet, Error> {
        let c = match self.peek() {
            None => return Err(self.err("unmatched `[`")),
            Some(c) => c,
        };
        match c {
            ']' => Err(self.err("missing class operand")),
            '[' => {
                self.pos += 1;
                let negated = self.eat('^');
                if self.peek() == Some(']') {
                    return Err(self.err("empty character class"));
                }
                let set = self.parse_class_expr(0)?;
                self.expect(']')?;
                Ok(if negated { set.negate() } else { set })
            }
            '\\' => {
                self.pos += 1;
                match self.parse_escape(true)? {
                    Token::Set(set) => Ok(set),
                    Token::Lit(c) => self.class_char_term(c),
                    _ => Err(self.err("escape not valid in a class")),
                }
            }
            _ => {
                self.pos += 1;
                self.class_char_term(c)
            }
        }
    }

    /// A literal class member, possibly the left end of a range.
    fn class_char_term(&mut self, lo: char) -> Result<CodepointSet, Error> {
        let is_range = self.peek() == Some('-')
            && self.peek_at(1) != Some('-')
            && self.peek_at(1) != Some(']')
            && self.peek_at(1).is_some();
        let set = if is_range {
            self.pos += 1;
            let hi = match self.peek() {
                Some('\\') => {
                    self.pos += 1;
                    match self.parse_escape(true)? {
                        Token::Lit(c) => c,
                        _ => return Err(self.err("class range must end with a character")),
                    }
                }
                Some(c) => {
                    self.pos += 1;
                    c
                }
                None => return Err(self.err("unmatched `[`")),
            };
            if hi < lo {
                return Err(self.err("inverted character range"));
            }
            CodepointSet::range(lo, hi)
        } else {
            CodepointSet::single(lo)
        };
        Ok(if self.flags.casefold {
            unicode::case_fold_set(&set)
        } else {
            set
        })
    }
}

// ---- assembly helpers ----

/// Lays out an alternation. Every alternative but the last is prefixed with
/// an `Option` and suffixed with a `GotoEndOr` that lands on the `OrEnd`, so
/// the merge table sees every branch converge there.
fn assemble_or(alts: Vec<Vec<Insn>>) -> Vec<Insn> {
    let n = alts.len();
    debug_assert!(n >= 2);
    let interior: usize = alts
        .iter()
        .enumerate()
        .map(|(i, alt)| 1 + alt.len() + usize::from(i + 1 < n))
        .sum();
    let mut out = Vec::with_capacity(interior + 3);
    out.push(Insn::new(Op::OrStart, interior as u32));
    let or_end = 1 + interior;
    for (i, alt) in alts.into_iter().enumerate() {
        let has_goto = i + 1 < n;
        out.push(Insn::new(Op::Option, (alt.len() + usize::from(has_goto)) as u32));
        out.extend(alt);
        if has_goto {
            let at = out.len();
            out.push(Insn::new(Op::GotoEndOr, (or_end - at - 1) as u32));
        }
    }
    debug_assert_eq!(out.len(), or_end);
    out.push(Insn::new(Op::OrEnd, interior as u32));
    // Merge slot, stamped by post-processing.
    out.push(Insn::from_raw(0));
    out
}

fn wrap_infinite(buf: &mut Vec<Insn>, start: usize, greedy: bool) {
    let len = (buf.len() - start) as u32;
    let (s, e) = if greedy {
        (Op::InfiniteStart, Op::InfiniteEnd)
    } else {
        (Op::InfiniteQStart, Op::InfiniteQEnd)
    };
    buf.insert(start, Insn::new(s, len));
    buf.push(Insn::new(e, len));
    buf.push(Insn::from_raw(0));
}

fn wrap_repeat(buf: &mut Vec<Insn>, start: usize, min: u32, max: u32, greedy: bool) {
    let len = (buf.len() - start) as u32;
    let (s, e) = if greedy {
        (Op::RepeatStart, Op::RepeatEnd)
    } else {
        (Op::RepeatQStart, Op::RepeatQEnd)
    };
    buf.insert(start, Insn::new(s, len));
    buf.push(Insn::new(e, len));
    buf.push(Insn::from_raw(0)); // merge slot
    buf.push(Insn::from_raw(1)); // step, scaled by post-processing
    buf.push(Insn::from_raw(min));
    buf.push(Insn::from_raw(max));
}

/// Reverses a compiled fragment for right-to-left evaluation.
///
/// Units (atoms with their parameter words, `OrChar` runs, whole start/end
/// blocks) are emitted in reverse order; loop blocks reverse their interior,
/// alternations reverse each alternative's body but keep the option order,
/// and lookaround blocks travel opaquely since their bodies carry their own
/// evaluation direction. Every unit keeps its word count, so all distance
/// fields stay valid verbatim, and reversing twice restores the original.
pub fn reverse_code(code: &[Insn]) -> Vec<Insn> {
    let mut out = Vec::with_capacity(code.len());
    rev_items(code, &mut out);
    debug_assert_eq!(out.len(), code.len());
    out
}

fn rev_items(code: &[Insn], out: &mut Vec<Insn>) {
    let mut units: Vec<(usize, usize)> = vec![];
    let mut pc = 0;
    while pc < code.len() {
        let insn = code[pc];
        let op = insn.op();
        let end = if op.is_start() {
            let e = index_of_pair(code, pc);
            e + len_of(code[e].op())
        } else if op == Op::OrChar {
            pc + insn.sequence() as usize
        } else {
            pc + len_of(op)
        };
        units.push((pc, end));
        pc = end;
    }
    for &(start, end) in units.iter().rev() {
        let op = code[start].op();
        if op == Op::OrStart {
            out.push(code[start]);
            rev_or_interior(&code[start + 1..end - 2], out);
            out.extend_from_slice(&code[end - 2..end]);
        } else if op.is_start() && !op.is_lookaround_start() {
            let sl = len_of(op);
            let e_pc = end - len_of(op.paired());
            out.extend_from_slice(&code[start..start + sl]);
            rev_items(&code[start + sl..e_pc], out);
            out.extend_from_slice(&code[e_pc..end]);
        } else {
            out.extend_from_slice(&code[start..end]);
        }
    }
}

fn rev_or_interior(code: &[Insn], out: &mut Vec<Insn>) {
    let mut pc = 0;
    while pc < code.len() {
        debug_assert_eq!(code[pc].op(), Op::Option);
        let next = pc + 1 + code[pc].data() as usize;
        let has_goto = next < code.len();
        let body_end = if has_goto { next - 1 } else { next };
        out.push(code[pc]);
        rev_items(&code[pc + 1..body_end], out);
        if has_goto {
            debug_assert_eq!(code[body_end].op(), Op::GotoEndOr);
            out.push(code[body_end]);
        }
        pc = next;
    }
}

/// Finds the first instruction index that is not a `Nop` or `GroupStart`.
pub fn skip_markers(code: &[Insn], mut pc: InstIdx) -> InstIdx {
    while pc < code.len() {
        match code[pc].op() {
            Op::Nop | Op::GroupStart => pc += 1,
            _ => break,
        }
    }
    pc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(code: &[Insn]) -> Vec<Op> {
        let mut out = vec![];
        let mut pc = 0;
        while pc < code.len() {
            let op = code[pc].op();
            out.push(op);
            pc += len_of(op);
        }
        out
    }

    fn compile_ok(pattern: &str) -> Parsed {
        compile(pattern, Flags::default()).unwrap()
    }

    macro_rules! noparse {
        ($name:ident, $re:expr) => {
            #[test]
            fn $name() {
                assert!(compile($re, Flags::default()).is_err(), "parsed: {}", $re);
            }
        };
    }

    noparse!(fail_unmatched_paren_open, "ab(");
    noparse!(fail_unmatched_paren_close, "ab)c");
    noparse!(fail_unmatched_bracket, "[a-z");
    noparse!(fail_empty_class, "[]");
    noparse!(fail_inverted_range, "[z-a]");
    noparse!(fail_bare_star, "*a");
    noparse!(fail_double_star, "a**");
    noparse!(fail_bad_brace, "a{2,1}");
    noparse!(fail_brace_overflow, "a{9999999}");
    noparse!(fail_unknown_escape, r"\q");
    noparse!(fail_unknown_property, r"\p{Bogus}");
    noparse!(fail_backref_forward, r"\1(a)");
    noparse!(fail_backref_self, r"(a\1)");
    noparse!(fail_bad_group_name, "(?P<1x>a)");

    #[test]
    fn literal_stream() {
        let p = compile_ok("abc");
        assert_eq!(ops(&p.code), vec![Op::Char, Op::Char, Op::Char, Op::End]);
    }

    #[test]
    fn empty_pattern() {
        let p = compile_ok("");
        assert_eq!(ops(&p.code), vec![Op::End]);
    }

    #[test]
    fn alternation_layout() {
        let p = compile_ok("a|b|c");
        assert_eq!(
            ops(&p.code),
            vec![
                Op::OrStart,
                Op::Option,
                Op::Char,
                Op::GotoEndOr,
                Op::Option,
                Op::Char,
                Op::GotoEndOr,
                Op::Option,
                Op::Char,
                Op::OrEnd,
                Op::End,
            ]
        );
        // GotoEndOr words land exactly on the OrEnd.
        let or_end = p
            .code
            .iter()
            .position(|i| i.op() == Op::OrEnd)
            .unwrap();
        for (pc, insn) in p.code.iter().enumerate() {
            if insn.op() == Op::GotoEndOr {
                assert_eq!(pc + 1 + insn.data() as usize, or_end);
            }
        }
    }

    #[test]
    fn star_wraps_infinite() {
        let p = compile_ok("ab*c");
        assert_eq!(
            ops(&p.code),
            vec![
                Op::Char,
                Op::InfiniteStart,
                Op::Char,
                Op::InfiniteEnd,
                Op::Char,
                Op::End,
            ]
        );
        assert_eq!(index_of_pair(&p.code, 1), 3);
    }

    #[test]
    fn plus_copies_body_once() {
        let p = compile_ok("a+");
        assert_eq!(
            ops(&p.code),
            vec![Op::Char, Op::InfiniteStart, Op::Char, Op::InfiniteEnd, Op::End]
        );
    }

    #[test]
    fn nongreedy_uses_q_ops() {
        let p = compile_ok("a*?");
        assert_eq!(
            ops(&p.code),
            vec![Op::InfiniteQStart, Op::Char, Op::InfiniteQEnd, Op::End]
        );
    }

    #[test]
    fn counted_repeat_params() {
        let p = compile_ok("a{2,5}");
        assert_eq!(
            ops(&p.code),
            vec![Op::RepeatStart, Op::Char, Op::RepeatEnd, Op::End]
        );
        let e = 2;
        assert_eq!(p.code[e].op(), Op::RepeatEnd);
        assert_eq!(p.code[e + 2].raw(), 1); // step
        assert_eq!(p.code[e + 3].raw(), 2); // min
        assert_eq!(p.code[e + 4].raw(), 5); // max
    }

    #[test]
    fn zero_repeat_is_empty() {
        let p = compile_ok("a{0,0}b");
        assert_eq!(ops(&p.code), vec![Op::Char, Op::End]);
        assert_eq!(p.code[0].data(), 'b' as u32);
    }

    #[test]
    fn question_is_alternation() {
        let p = compile_ok("a?");
        assert_eq!(
            ops(&p.code),
            vec![Op::OrStart, Op::Option, Op::Char, Op::GotoEndOr, Op::Option, Op::OrEnd, Op::End]
        );
        // Non-greedy puts the empty branch first.
        let q = compile_ok("a??");
        assert_eq!(
            ops(&q.code),
            vec![Op::OrStart, Op::Option, Op::GotoEndOr, Op::Option, Op::Char, Op::OrEnd, Op::End]
        );
    }

    #[test]
    fn groups_and_names() {
        let p = compile_ok("(?P<y>a)(b)(?:c)");
        assert_eq!(p.ngroup, 3);
        assert_eq!(p.names, vec![("y".to_string(), 1)]);
        assert_eq!(
            ops(&p.code),
            vec![
                Op::GroupStart,
                Op::Char,
                Op::GroupEnd,
                Op::GroupStart,
                Op::Char,
                Op::GroupEnd,
                Op::Nop,
                Op::Char,
                Op::End,
            ]
        );
    }

    #[test]
    fn named_groups_sorted() {
        let p = compile_ok("(?P<z>a)(?P<a>b)");
        assert_eq!(
            p.names,
            vec![("a".to_string(), 2), ("z".to_string(), 1)]
        );
    }

    #[test]
    fn class_emission_thresholds() {
        // Two codepoints: OrChar run.
        let p = compile_ok("[ab]");
        assert_eq!(ops(&p.code), vec![Op::OrChar, Op::OrChar, Op::End]);
        assert_eq!(p.code[0].sequence(), 2);
        // A big multi-interval class: trie.
        let p = compile_ok("[a-cf-hk-mp-rv-x]");
        assert_eq!(ops(&p.code), vec![Op::Trie, Op::End]);
        assert_eq!(p.trie_ids, vec![0]);
        // Few intervals, many codepoints: interval set.
        let p = compile_ok("[a-z]");
        assert_eq!(ops(&p.code), vec![Op::CodepointSet, Op::End]);
    }

    #[test]
    fn class_algebra() {
        let p = compile_ok("[a-z&&[^aeiou]]");
        let set = &p.charsets[0];
        assert!(set.contains('h'));
        assert!(!set.contains('e'));
        assert!(!set.contains('0'));

        let p = compile_ok("[a-f--c-d]");
        let set = &p.charsets[0];
        assert!(set.contains('a'));
        assert!(!set.contains('c'));

        let p = compile_ok("[a-c~~b-d]");
        // {a} and {d} only.
        assert_eq!(ops(&p.code), vec![Op::OrChar, Op::OrChar, Op::End]);
    }

    #[test]
    fn identical_sets_dedup() {
        let p = compile_ok("[a-z][a-z]");
        assert_eq!(p.charsets.len(), 1);
        assert_eq!(p.code[0].data(), p.code[1].data());
    }

    #[test]
    fn casefold_literal() {
        let p = compile(r"a", Flags::parse("i").unwrap()).unwrap();
        assert_eq!(ops(&p.code), vec![Op::OrChar, Op::OrChar, Op::End]);
        let chars: Vec<u32> = p.code[..2].iter().map(|i| i.data()).collect();
        assert!(chars.contains(&('a' as u32)));
        assert!(chars.contains(&('A' as u32)));
    }

    #[test]
    fn backref_flags() {
        let p = compile_ok(r"(a)\1");
        assert!(p.has_backref);
        assert!(p.backrefed[1]);
        let br = p.code.iter().find(|i| i.op() == Op::Backref).unwrap();
        assert!(!br.flag());

        // Local: the target group is captured inside the same lookaround.
        let p = compile_ok(r"(?=(a)\1)");
        let br = p.code.iter().find(|i| i.op() == Op::Backref).unwrap();
        assert!(br.flag());

        // Global: the target is outside the lookaround.
        let p = compile_ok(r"(a)(?=\1)");
        let br = p.code.iter().find(|i| i.op() == Op::Backref).unwrap();
        assert!(!br.flag());
    }

    #[test]
    fn lookaround_layout() {
        let p = compile_ok("foo(?=bar)");
        let start = 3;
        assert_eq!(p.code[start].op(), Op::LookaheadStart);
        assert_eq!(p.code[start].data(), 3);
        assert_eq!(p.code[start + 1].raw(), 1); // window start
        assert_eq!(p.code[start + 2].raw(), 1); // window end
        assert_eq!(index_of_pair(&p.code, start), start + 6);
        assert_eq!(p.code[start + 6].op(), Op::LookaheadEnd);
    }

    #[test]
    fn lookbehind_body_reversed() {
        let p = compile_ok("(?<=ab)c");
        // Body `ab` comes out as `ba`.
        assert_eq!(p.code[0].op(), Op::LookbehindStart);
        assert_eq!(p.code[3].data(), 'b' as u32);
        assert_eq!(p.code[4].data(), 'a' as u32);
    }

    #[test]
    fn lookaround_depth_limit() {
        let deep = |n: usize| {
            let mut s = String::new();
            for _ in 0..n {
                s.push_str("(?=a");
            }
            s.push('b');
            for _ in 0..n {
                s.push(')');
            }
            s
        };
        assert!(compile(&deep(16), Flags::default()).is_ok());
        match compile(&deep(17), Flags::default()) {
            Err(Error::LimitExceeded { which, .. }) => {
                assert_eq!(which, "lookaround depth")
            }
            other => panic!("expected limit error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn freeform_mode() {
        let flags = Flags::parse("x").unwrap();
        let p = compile("a b  # trailing comment\n c", flags).unwrap();
        assert_eq!(ops(&p.code), vec![Op::Char, Op::Char, Op::Char, Op::End]);
        // Whitespace stays significant inside classes.
        let p = compile("[a ]", flags).unwrap();
        assert_eq!(ops(&p.code), vec![Op::OrChar, Op::OrChar, Op::End]);
    }

    #[test]
    fn reversal_is_involution() {
        for pattern in [
            "abc",
            "a|bc|def",
            "a(b|c)*d",
            "(a)(?P<x>b{2,4})c+?",
            "[a-z]+(?=q)x",
            "a(?<=ba)c??",
        ] {
            let p = compile_ok(pattern);
            let rev = reverse_code(&p.code[..p.code.len() - 1]);
            let back = reverse_code(&rev);
            assert_eq!(
                back,
                p.code[..p.code.len() - 1].to_vec(),
                "pattern {}",
                pattern
            );
        }
    }

    #[test]
    fn reversal_preserves_option_order() {
        let p = compile_ok("ab|cd");
        let body = &p.code[..p.code.len() - 1];
        let rev = reverse_code(body);
        assert_eq!(rev[0].op(), Op::OrStart);
        assert_eq!(rev[1].op(), Op::Option);
        // First alternative is still `ab`, with its content reversed.
        assert_eq!(rev[2].data(), 'b' as u32);
        assert_eq!(rev[3].data(), 'a' as u32);
    }
}

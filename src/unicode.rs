// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// The engine consumes Unicode data through exactly two capabilities: the
// simple case-fold orbit of a codepoint and the codepoint set of a named
// property. Both are answered from regex-syntax's tables so that this crate
// carries no Unicode data of its own.

use regex_syntax::hir::{Class, ClassUnicode, ClassUnicodeRange, HirKind};

use crate::charset::CodepointSet;

/// All codepoints equivalent to `c` under simple case folding, `c` included.
/// The orbit of any codepoint has at most a handful of members.
pub fn case_orbit(c: char) -> Vec<char> {
    let mut class = ClassUnicode::new([ClassUnicodeRange::new(c, c)]);
    class.case_fold_simple();
    class
        .ranges()
        .iter()
        .flat_map(|r| (r.start()..=r.end()))
        .collect()
}

/// Expands every codepoint of `set` to its full case orbit.
pub fn case_fold_set(set: &CodepointSet) -> CodepointSet {
    // ClassUnicodeRange endpoints are chars, so split every interval around
    // the surrogate gap before converting.
    const GAP: (u32, u32) = (0xD800, 0xE000);
    let ranges: Vec<ClassUnicodeRange> = set
        .intervals()
        .iter()
        .flat_map(|&(a, b)| [(a, b.min(GAP.0)), (a.max(GAP.1), b)])
        .filter(|&(a, b)| a < b)
        .filter_map(|(a, b)| {
            Some(ClassUnicodeRange::new(
                char::from_u32(a)?,
                char::from_u32(b - 1)?,
            ))
        })
        .collect();
    let mut class = ClassUnicode::new(ranges);
    class.case_fold_simple();
    class_to_set(&class)
}

/// The codepoint set of the Unicode property `name`, as written between the
/// braces of `\p{...}`. Returns `None` for unknown names.
pub fn property(name: &str) -> Option<CodepointSet> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '-' | '=' | '.' | '&'))
    {
        return None;
    }
    let pattern = format!(r"\p{{{}}}", name);
    let hir = regex_syntax::Parser::new().parse(&pattern).ok()?;
    match hir.kind() {
        HirKind::Class(Class::Unicode(class)) => Some(class_to_set(class)),
        _ => None,
    }
}

/// `\d`, `\s` and `\w`. Unicode mode reads regex-syntax's Perl classes; the
/// non-unicode (`U` flag) renditions are their ASCII subsets.
pub fn perl_class(kind: char, unicode: bool) -> CodepointSet {
    if !unicode {
        return match kind {
            'd' => CodepointSet::range('0', '9'),
            's' => CodepointSet::from_intervals([
                (0x09, 0x0E), // \t \n \v \f \r
                (0x20, 0x21),
            ]),
            'w' => CodepointSet::from_intervals([
                (b'0' as u32, b'9' as u32 + 1),
                (b'A' as u32, b'Z' as u32 + 1),
                (b'_' as u32, b'_' as u32 + 1),
                (b'a' as u32, b'z' as u32 + 1),
            ]),
            _ => panic!("BUG: not a perl class: \\{}", kind),
        };
    }
    let pattern = format!(r"\{}", kind);
    match regex_syntax::Parser::new().parse(&pattern) {
        Ok(hir) => match hir.kind() {
            HirKind::Class(Class::Unicode(class)) => class_to_set(class),
            _ => panic!("BUG: \\{} did not parse to a class", kind),
        },
        // Unicode tables unavailable; degrade to ASCII.
        Err(_) => perl_class(kind, false),
    }
}

/// Word-character test for `\b` and `\B`. An absent character (before the
/// start or past the end of input) is never a word character.
#[inline]
pub fn is_word_char(c: Option<char>) -> bool {
    c.map_or(false, regex_syntax::is_word_character)
}

fn class_to_set(class: &ClassUnicode) -> CodepointSet {
    CodepointSet::from_intervals(
        class
            .ranges()
            .iter()
            .map(|r| (r.start() as u32, r.end() as u32 + 1)),
    )
}

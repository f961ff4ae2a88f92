// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use quickcheck::{quickcheck, Arbitrary, Gen};
use regex_core::{Error, Executor, MatchEngine, Regex, Span};

/// Successive non-overlapping matches, the way a `g`-flagged search reports
/// them: resume after each match, stepping one character past an empty one.
fn all_matches(re: &Regex, text: &str) -> Vec<(usize, usize)> {
    let mut out = vec![];
    let mut at = 0;
    while at <= text.len() {
        let span = match re.find_at(text, at) {
            Some(span) => span,
            None => break,
        };
        out.push((span.begin, span.end));
        at = if span.is_empty() {
            match text[span.end..].chars().next() {
                Some(c) => span.end + c.len_utf8(),
                None => break,
            }
        } else {
            span.end
        };
    }
    out
}

macro_rules! mat {
    ($name:ident, $re:expr, $flags:expr, $text:expr, $($span:expr),+) => {
        #[test]
        fn $name() {
            let re = Regex::with_flags($re, $flags).unwrap();
            let caps = re.captures($text).unwrap_or_else(|| {
                panic!("`{}` did not match `{}`", $re, $text)
            });
            let expected: Vec<Option<(usize, usize)>> = vec![$($span),+];
            for (i, want) in expected.iter().enumerate() {
                let got = (caps[i].begin, caps[i].end);
                match want {
                    Some(span) => assert_eq!(
                        got, *span,
                        "`{}` on `{}`: group {}", $re, $text, i
                    ),
                    None => assert_eq!(
                        got, (0, 0),
                        "`{}` on `{}`: group {} should be unset", $re, $text, i
                    ),
                }
            }
        }
    };
}

macro_rules! nomat {
    ($name:ident, $re:expr, $flags:expr, $text:expr) => {
        #[test]
        fn $name() {
            let re = Regex::with_flags($re, $flags).unwrap();
            assert!(
                re.find($text).is_none(),
                "`{}` unexpectedly matched `{}`",
                $re,
                $text
            );
        }
    };
}

macro_rules! noparse {
    ($name:ident, $re:expr) => {
        #[test]
        fn $name() {
            assert!(Regex::new($re).is_err(), "`{}` unexpectedly parsed", $re);
        }
    };
}

// ---- the end-to-end scenarios ----

mat!(scenario_star, "ab*c", "g", "abbbc", Some((0, 5)));

#[test]
fn scenario_date_named_groups() {
    let re = Regex::with_flags(r"(?P<y>\d{4})-(?P<m>\d{2})-(?P<d>\d{2})", "g").unwrap();
    let text = "2024-11-28";
    let caps = re.captures(text).unwrap();
    assert_eq!(caps[0], Span { begin: 0, end: 10 });
    assert_eq!(&text[caps[re.group_index("y").unwrap()].begin..caps[1].end], "2024");
    assert_eq!(&text[caps[re.group_index("m").unwrap()].begin..caps[2].end], "11");
    assert_eq!(&text[caps[re.group_index("d").unwrap()].begin..caps[3].end], "28");
    assert_eq!(
        re.named_groups(),
        &[
            ("d".to_string(), 3),
            ("m".to_string(), 2),
            ("y".to_string(), 1)
        ]
    );
}

#[test]
fn scenario_leftmost_first_priority() {
    let re = Regex::with_flags("(a|aa)", "g").unwrap();
    assert_eq!(all_matches(&re, "aaa"), vec![(0, 1), (1, 2), (2, 3)]);
}

mat!(
    scenario_backref,
    r"(.+?)\1",
    "g",
    "abab",
    Some((0, 4)),
    Some((0, 2))
);

#[test]
fn scenario_lookahead_does_not_consume() {
    let re = Regex::with_flags("foo(?=bar)", "g").unwrap();
    assert_eq!(all_matches(&re, "foobar foobaz"), vec![(0, 3)]);
}

#[test]
fn scenario_class_intersection() {
    let re = Regex::with_flags("[a-z&&[^aeiou]]+", "g").unwrap();
    assert_eq!(all_matches(&re, "hello"), vec![(0, 1), (2, 4)]);
}

// ---- boundary behaviors ----

#[test]
fn empty_pattern_matches_empty_once() {
    let re = Regex::new("").unwrap();
    assert_eq!(all_matches(&re, ""), vec![(0, 0)]);
}

#[test]
fn multiline_caret_after_every_terminator() {
    let re = Regex::with_flags("^.", "m").unwrap();
    let text = "a\nb\rc\u{85}d\u{2028}e\u{2029}f";
    let starts: Vec<usize> = all_matches(&re, text).iter().map(|&(s, _)| s).collect();
    assert_eq!(starts.len(), 6);
    assert_eq!(starts[0], 0);
}

#[test]
fn dollar_refuses_to_split_crlf() {
    let re = Regex::with_flags(".$", "m").unwrap();
    let text = "ab\r\ncd";
    assert_eq!(all_matches(&re, text), vec![(1, 2), (5, 6)]);
}

#[test]
fn zero_repetition_matches_empty() {
    let re = Regex::new("a{0,0}").unwrap();
    assert_eq!(re.find("bbb"), Some(Span { begin: 0, end: 0 }));
}

#[test]
fn lookaround_depth_boundary() {
    let nested = |n: usize| {
        let mut s = String::new();
        for _ in 0..n {
            s.push_str("(?=a");
        }
        s.push('a');
        for _ in 0..n {
            s.push(')');
        }
        s
    };
    assert!(Regex::new(&nested(16)).is_ok());
    match Regex::new(&nested(17)) {
        Err(Error::LimitExceeded { which, limit }) => {
            assert_eq!(which, "lookaround depth");
            assert_eq!(limit, 16);
        }
        other => panic!("expected a limit error, got {:?}", other.map(|_| ())),
    }
}

// ---- general matching ----

mat!(match_literal, "abc", "", "xxabcxx", Some((2, 5)));
mat!(match_dot, "a.c", "", "abc", Some((0, 3)));
nomat!(nomat_dot_newline, "a.c", "", "a\nc");
mat!(match_dot_newline_s, "a.c", "s", "a\nc", Some((0, 3)));
mat!(match_plus_greedy, "a+", "", "aaa", Some((0, 3)));
mat!(match_plus_lazy, "a+?", "", "aaa", Some((0, 1)));
mat!(match_alt_nested, "((a|b)|(c|d))x", "", "zdx", Some((1, 3)), Some((1, 2)), None, Some((1, 2)));
mat!(match_counted_exact, "a{3}", "", "aaaa", Some((0, 3)));
nomat!(nomat_counted_short, "a{3}", "", "aa");
mat!(match_counted_open, "(ab){2,}", "", "ababab", Some((0, 6)), Some((4, 6)));
mat!(match_class_negated, "[^a-c]+", "", "abcdef", Some((3, 6)));
mat!(match_escape_class, r"\d+\s\w+", "", "42 owls", Some((0, 7)));
mat!(match_named_backref, r"(?P<q>ab)\1", "", "abab", Some((0, 4)), Some((0, 2)));
mat!(match_hex_escape, r"\x41B", "", "AB", Some((0, 2)));
mat!(match_property, r"\p{Greek}+", "", "abγδε!", Some((2, 8)));
mat!(match_casefold, "groß", "i", "GROß", Some((0, 5)));
mat!(match_word_boundary, r"\bfox\b", "", "the fox.", Some((4, 7)));
mat!(match_lookbehind, "(?<=us)e", "", "use", Some((2, 3)));
mat!(match_neg_lookbehind, "(?<!a)b", "", "cb", Some((1, 2)));
nomat!(nomat_neg_lookbehind, "(?<!a)b", "", "ab");
mat!(
    match_lookbehind_captures,
    r"(?<=(\d{2}))cm",
    "",
    "25cm",
    Some((2, 4)),
    Some((0, 2))
);
mat!(match_nongreedy_question, "ab??", "", "ab", Some((0, 1)));
mat!(match_freeform, "a b c  # comment", "x", "abc", Some((0, 3)));
mat!(match_nonunicode_digit, r"\d+", "U", "x42", Some((1, 3)));

nomat!(nomat_anchored_midway, "^bc", "", "abc");
nomat!(nomat_wordboundary, r"\bbc", "", "abc");

// ---- parse failures ----

noparse!(fail_open_paren, "(ab");
noparse!(fail_close_paren, "ab)");
noparse!(fail_open_bracket, "[ab");
noparse!(fail_empty_class, "ab[]cd");
noparse!(fail_range, "[c-a]");
noparse!(fail_repeat_range, "a{3,1}");
noparse!(fail_leading_star, "*a");
noparse!(fail_double_plus, "a++");
noparse!(fail_bad_escape, r"\y");
noparse!(fail_bad_property, r"\p{NotAThing}");
noparse!(fail_forward_backref, r"\1(a)");

#[test]
fn duplicate_flags_rejected() {
    assert!(Regex::with_flags("a", "ii").is_err());
    assert!(Regex::with_flags("a", "q").is_err());
}

#[test]
fn is_match_tracks_referenced_groups() {
    // `is_match` requests no spans, so the engines skip capture recording
    // except for back-referenced groups, which matching still needs.
    let re = Regex::new(r"(a+)-(b)\1").unwrap();
    assert!(re.is_match("x aa-baa y"));
    assert!(!re.is_match("x aa-ba y"));
    let re = Regex::new(r"(cat|dog)s?").unwrap();
    assert!(re.is_match("hot dogs"));
    assert!(!re.is_match("hot logs"));
}

#[test]
fn global_backref_inside_lookaround() {
    let re = Regex::new(r"(ab)(?=\1)").unwrap();
    assert_eq!(re.find("abab"), Some(Span { begin: 0, end: 2 }));
    assert!(re.find("abxy").is_none());
}

#[test]
fn casefold_is_confluent() {
    // Matching with `i` agrees with matching the case-folded input without
    // it, modulo the simple-fold table.
    let samples = ["The Quick BROWN fox", "ABBA", "no match here 42"];
    for pattern in ["quick", "a?b+a", r"\bfox\b", "[a-f]+"] {
        let folded = Regex::with_flags(pattern, "i").unwrap();
        let plain = Regex::new(pattern).unwrap();
        for text in samples {
            let lowered: String = text.to_lowercase();
            assert_eq!(
                folded.is_match(text),
                plain.is_match(&lowered),
                "pattern `{}` text `{}`",
                pattern,
                text
            );
        }
    }
}

// ---- engine agreement ----

#[test]
fn engines_agree_on_scenarios() {
    let cases: &[(&str, &str, &str)] = &[
        ("ab*c", "", "xxabbbcxx"),
        ("(a|aa)+b", "", "aaab"),
        ("a{2,5}?x", "", "aaaaax"),
        (r"(\w+) (\w+)", "", "first second"),
        ("foo(?=bar)", "", "xfoobar"),
        ("(?<=a)bc", "", "zabc"),
        ("[0-9a-f]+", "", "zz beef zz"),
        ("^$", "", ""),
    ];
    for &(pat, flags, text) in cases {
        let auto = Executor::new(pat, flags).unwrap();
        let nfa = Executor::new(pat, flags)
            .unwrap()
            .with_engine(MatchEngine::Nfa);
        let bt = Executor::new(pat, flags)
            .unwrap()
            .with_engine(MatchEngine::Backtrack);
        let run = |e: &Executor| {
            let mut out = e.program().alloc_groups();
            if e.exec(&mut out, text, 0) {
                Some(out)
            } else {
                None
            }
        };
        let (a, n, b) = (run(&auto), run(&nfa), run(&bt));
        assert_eq!(a, n, "auto vs nfa: `{}` on `{}`", pat, text);
        assert_eq!(a, b, "auto vs backtrack: `{}` on `{}`", pat, text);
    }
}

// ---- random patterns never panic ----

#[derive(Clone, Debug)]
struct PatternString(String);

impl Arbitrary for PatternString {
    fn arbitrary(g: &mut Gen) -> PatternString {
        const ALPHABET: &[char] = &[
            'a', 'b', 'c', '0', '(', ')', '[', ']', '{', '}', '|', '*', '+', '?', '.', '^',
            '$', '\\', '-', ',', 'd', 'w',
        ];
        let len = usize::arbitrary(g) % 24;
        let s = (0..len)
            .map(|_| *g.choose(ALPHABET).expect("non-empty alphabet"))
            .collect();
        PatternString(s)
    }
}

quickcheck! {
    fn no_crashing(p: PatternString) -> bool {
        let _ = Regex::new(&p.0);
        true
    }

    fn compiled_patterns_match_safely(p: PatternString) -> bool {
        if let Ok(re) = Regex::new(&p.0) {
            let _ = re.find("abc0 abc0");
        }
        true
    }
}

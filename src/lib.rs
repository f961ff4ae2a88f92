// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A bytecode regular-expression engine core.
//!
//! Patterns compile to a flat stream of packed 32-bit instruction words; a
//! single post-processing pass sizes the merge table that keeps the
//! breadth-first simulation linear, bounds its worst-case thread count and
//! scales repetition counters into absolute space. Three execution
//! strategies share the bytecode:
//!
//! * a Thompson-style breadth-first simulation (`nfa`), the workhorse;
//! * a depth-first backtracker (`backtrack`) for small jobs and for
//!   back-references, which the simulation cannot resolve;
//! * kickstart prefilters (`kickstart`): exact literal prefixes, a
//!   word-packed Bit-NFA and a Shift-Or skip scanner, used to jump over
//!   positions where no match can begin.
//!
//! Lookaround evaluates through recursive sub-matchers over a slice of the
//! bytecode; look-behind bodies are reversed at compile time so the same
//! forward-stepping interpreter can run them against a reverse input
//! cursor. Input is an abstraction with forward and reverse implementations
//! over UTF-8, UTF-16 and UTF-32 text.
//!
//! ```
//! use regex_core::Regex;
//!
//! let re = Regex::new(r"(?P<y>\d{4})-(?P<m>\d{2})-(?P<d>\d{2})").unwrap();
//! let caps = re.captures("moon landing: 1969-07-20").unwrap();
//! assert_eq!(&"moon landing: 1969-07-20"[caps[1].begin..caps[1].end], "1969");
//! ```

pub use crate::parse::Flags;
pub use crate::re::{Error, Regex, Span};

// Exported (but hidden) for testing.
#[doc(hidden)]
pub use crate::exec::{Executor, MatchEngine};
#[doc(hidden)]
pub use crate::program::Program;

mod backtrack;
mod charset;
mod exec;
mod input;
mod inst;
mod kickstart;
mod literals;
mod nfa;
mod parse;
mod program;
mod re;
mod trie;
mod unicode;

//! Multi-pattern matcher deciding whether a byte range resembles compiled
//! machine code, without disassembling it.
//!
//! The pattern sets are short compiler-emitted function-prologue idioms,
//! loaded once into an Aho-Corasick automaton per bitness class (plus a
//! combined instance). The automatons are built exactly once and never
//! mutated, so they are safe to share across scanning threads.

use aho_corasick::{AhoCorasick, MatchKind};
use once_cell::sync::Lazy;

use crate::pe::utils::is_padding;

/// Pattern bitness class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitness {
    Bits32,
    Bits64,
}

/// A named function-entry idiom.
#[derive(Debug, Clone, Copy)]
pub struct SignaturePattern {
    pub name: &'static str,
    pub bytes: &'static [u8],
    pub bitness: Bitness,
}

/// One occurrence of a pattern inside a scanned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternMatch {
    pub offset: usize,
    pub name: &'static str,
    pub bitness: Bitness,
}

/// Common 32-bit function prologues.
pub const PROLOG_32_PATTERNS: &[SignaturePattern] = &[
    SignaturePattern {
        name: "prolog32_1",
        // push ebp; mov ebp, esp
        bytes: &[0x55, 0x8B, 0xEC],
        bitness: Bitness::Bits32,
    },
    SignaturePattern {
        name: "prolog32_2",
        // push ebp; mov ebp, esp (alternate encoding)
        bytes: &[0x55, 0x89, 0xE5],
        bitness: Bitness::Bits32,
    },
    SignaturePattern {
        name: "prolog32_3",
        // pushad; mov ebp, esp
        bytes: &[0x60, 0x89, 0xE5],
        bitness: Bitness::Bits32,
    },
];

/// Common 64-bit function prologues.
pub const PROLOG_64_PATTERNS: &[SignaturePattern] = &[
    SignaturePattern {
        name: "prolog64_1",
        // push rbx; sub rsp, <byte>
        bytes: &[0x40, 0x53, 0x48, 0x83, 0xEC],
        bitness: Bitness::Bits64,
    },
    SignaturePattern {
        name: "prolog64_2",
        // push rbp; mov rbp, rsp
        bytes: &[0x55, 0x48, 0x8B, 0xEC],
        bitness: Bitness::Bits64,
    },
    SignaturePattern {
        name: "prolog64_3",
        // push rbp; sub rsp, <byte>
        bytes: &[0x40, 0x55, 0x48, 0x83, 0xEC],
        bitness: Bitness::Bits64,
    },
    SignaturePattern {
        name: "prolog64_4",
        // push rbx; sub rsp, <dword>
        bytes: &[0x53, 0x48, 0x81, 0xEC],
        bitness: Bitness::Bits64,
    },
    SignaturePattern {
        name: "prolog64_5",
        // and rsp, -16
        bytes: &[0x48, 0x83, 0xE4, 0xF0],
        bitness: Bitness::Bits64,
    },
    SignaturePattern {
        name: "prolog64_6",
        // push rdi; mov rdi, rsp
        bytes: &[0x57, 0x48, 0x89, 0xE7],
        bitness: Bitness::Bits64,
    },
    SignaturePattern {
        name: "prolog64_7",
        // home-space spill: mov rax, rsp; mov [rax+8], rbx; ... push r12..r15
        bytes: &[
            0x48, 0x8B, 0xC4, 0x48, 0x89, 0x58, 0x08, 0x4C, 0x89, 0x48, 0x20, 0x4C, 0x89, 0x40,
            0x18, 0x48, 0x89, 0x50, 0x10, 0x55, 0x56, 0x57, 0x41, 0x54, 0x41, 0x55, 0x41, 0x56,
            0x41, 0x57,
        ],
        bitness: Bitness::Bits64,
    },
];

/// Precompiled multi-pattern matcher over one pattern set.
#[derive(Debug)]
pub struct SignatureEngine {
    automaton: AhoCorasick,
    patterns: Vec<SignaturePattern>,
}

static PROLOG_32: Lazy<SignatureEngine> =
    Lazy::new(|| SignatureEngine::from_sets(&[PROLOG_32_PATTERNS]));
static PROLOG_64: Lazy<SignatureEngine> =
    Lazy::new(|| SignatureEngine::from_sets(&[PROLOG_64_PATTERNS]));
static PROLOG_ALL: Lazy<SignatureEngine> =
    Lazy::new(|| SignatureEngine::from_sets(&[PROLOG_32_PATTERNS, PROLOG_64_PATTERNS]));

impl SignatureEngine {
    fn from_sets(sets: &[&'static [SignaturePattern]]) -> SignatureEngine {
        let patterns: Vec<SignaturePattern> =
            sets.iter().flat_map(|set| set.iter().copied()).collect();
        let automaton = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(patterns.iter().map(|p| p.bytes))
            .expect("static prologue pattern set always builds");
        SignatureEngine {
            automaton,
            patterns,
        }
    }

    /// Shared engine over the 32-bit prologue set.
    pub fn prolog32() -> &'static SignatureEngine {
        &PROLOG_32
    }

    /// Shared engine over the 64-bit prologue set.
    pub fn prolog64() -> &'static SignatureEngine {
        &PROLOG_64
    }

    /// Shared engine over the combined 32+64-bit set.
    pub fn combined() -> &'static SignatureEngine {
        &PROLOG_ALL
    }

    /// Number of independent (leftmost, non-overlapping) pattern matches,
    /// or `None` when nothing in the buffer matches.
    pub fn match_count(&self, buffer: &[u8]) -> Option<usize> {
        let count = self.automaton.find_iter(buffer).count();
        if count == 0 {
            None
        } else {
            Some(count)
        }
    }

    /// Every independent match, with its offset and pattern name.
    pub fn matches(&self, buffer: &[u8]) -> Vec<PatternMatch> {
        self.automaton
            .find_iter(buffer)
            .map(|m| {
                let pattern = &self.patterns[m.pattern().as_usize()];
                PatternMatch {
                    offset: m.start(),
                    name: pattern.name,
                    bitness: pattern.bitness,
                }
            })
            .collect()
    }
}

/// Count of 32-bit prologue matches; `None` if the buffer has none.
pub fn is_32bit_code(buffer: &[u8]) -> Option<usize> {
    SignatureEngine::prolog32().match_count(buffer)
}

/// Count of 64-bit prologue matches; `None` if the buffer has none.
pub fn is_64bit_code(buffer: &[u8]) -> Option<usize> {
    SignatureEngine::prolog64().match_count(buffer)
}

/// Whether the buffer looks like compiled code of either bitness.
///
/// A buffer consisting of a single repeated byte value is padding, never
/// code, regardless of pattern content.
pub fn is_code(buffer: &[u8]) -> bool {
    match buffer.first() {
        None => false,
        Some(&first) if is_padding(buffer, first) => false,
        Some(_) => SignatureEngine::combined().match_count(buffer).is_some(),
    }
}

/// Find the first occurrence of a single pattern, optionally capping the
/// scan at `max_offset` (0 means unlimited).
pub fn find_pattern(buffer: &[u8], pattern: &[u8], max_offset: usize) -> Option<usize> {
    if pattern.is_empty() || pattern.len() > buffer.len() {
        return None;
    }
    let window = if max_offset == 0 {
        buffer
    } else {
        let end = max_offset
            .saturating_add(pattern.len())
            .min(buffer.len());
        &buffer[..end]
    };
    memchr::memmem::find(window, pattern)
}

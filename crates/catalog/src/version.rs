//! Version-aware name ordering, in the spirit of `sort -V`.
//!
//! Names are split into alternating digit and non-digit runs. Digit runs are
//! compared as unbounded integers, the rest byte-wise, so `m:2b < m:9b <
//! m:10b`. The final tie-break is plain lexical order, which keeps the sort
//! total: `m:01b` and `m:1b` are numerically equal but still ordered.

use std::cmp::Ordering;

#[derive(Debug, PartialEq, Eq)]
enum Run<'a> {
    Digits(&'a str),
    Text(&'a str),
}

fn runs(name: &str) -> Vec<Run<'_>> {
    let mut out = Vec::new();
    let bytes = name.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        let digit = bytes[start].is_ascii_digit();
        let mut end = start + 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() == digit {
            end += 1;
        }
        // ASCII digits never split a UTF-8 sequence.
        let run = &name[start..end];
        out.push(if digit { Run::Digits(run) } else { Run::Text(run) });
        start = end;
    }
    out
}

fn compare_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

pub fn version_cmp(a: &str, b: &str) -> Ordering {
    let left = runs(a);
    let right = runs(b);
    for (l, r) in left.iter().zip(right.iter()) {
        let ord = match (l, r) {
            (Run::Digits(x), Run::Digits(y)) => compare_digits(x, y),
            (Run::Text(x), Run::Text(y)) => x.cmp(y),
            (Run::Digits(_), Run::Text(_)) => Ordering::Less,
            (Run::Text(_), Run::Digits(_)) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len()).then_with(|| a.cmp(b))
}

pub fn sort_versioned(names: &mut [String]) {
    names.sort_by(|a, b| version_cmp(a, b));
}

/// Plain lexical ordering.
pub fn order_lexical(names: &mut [String]) {
    names.sort();
}

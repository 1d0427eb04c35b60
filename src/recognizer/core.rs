use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;

use crate::error::{Result, RouterError};

/// Parameters extracted from a recognized path, keyed by placeholder name.
///
/// A `BTreeMap` keeps iteration deterministic, which the URL serializer and
/// the recognition determinism guarantee both rely on.
pub type Params = BTreeMap<String, String>;

/// Declared shape of a single dynamic placeholder in a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub optional: bool,
    pub catch_all: bool,
    pub constraint: Option<String>,
}

/// One compiled pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(ParameterSpec),
}

/// A single route pattern compiled into matchable segments.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub raw: String,
    pub segments: Vec<Segment>,
    /// Explicit literal paths are tier 0; name-derived implicit paths are
    /// tier 1 and never outrank an explicit pattern.
    pub tier: u8,
    pub def_index: usize,
    pub order: usize,
}

impl CompiledPattern {
    pub fn params(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param(spec) => Some(spec),
            Segment::Literal(_) => None,
        })
    }

    pub fn required_params(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.params().filter(|spec| !spec.optional && !spec.catch_all)
    }
}

/// Outcome of recognizing a path against a pattern set.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub def_index: usize,
    pub raw_pattern: String,
    pub params: Params,
    /// Number of path segments the winning pattern consumed.
    pub consumed: usize,
    tier: u8,
    skipped: u32,
    order: usize,
}

/// Compile a single pattern string.
///
/// Supported segment forms: literal, `:name`, `:name?`, `*name`, each of the
/// dynamic forms optionally constrained with `:name{{pattern}}`.
pub fn compile_pattern(
    raw: &str,
    tier: u8,
    def_index: usize,
    order: usize,
) -> Result<CompiledPattern> {
    let mut segments = Vec::new();
    let mut seen = std::collections::HashSet::new();

    if !raw.is_empty() {
        for (idx, piece) in raw.split('/').enumerate() {
            let segment = compile_segment(raw, piece)?;
            if let Segment::Param(spec) = &segment {
                if !seen.insert(spec.name.clone()) {
                    return Err(RouterError::configuration(
                        raw,
                        format!("duplicate parameter `{}`", spec.name),
                    ));
                }
                if spec.catch_all && idx != raw.split('/').count() - 1 {
                    return Err(RouterError::configuration(
                        raw,
                        format!("catch-all `{}` must be the final segment", spec.name),
                    ));
                }
            }
            segments.push(segment);
        }
    }

    Ok(CompiledPattern {
        raw: raw.to_string(),
        segments,
        tier,
        def_index,
        order,
    })
}

fn compile_segment(raw: &str, piece: &str) -> Result<Segment> {
    let (body, constraint) = split_constraint(raw, piece)?;

    if let Some(name) = body.strip_prefix('*') {
        if name.is_empty() {
            return Err(RouterError::configuration(raw, "catch-all needs a name"));
        }
        return Ok(Segment::Param(ParameterSpec {
            name: name.to_string(),
            optional: true,
            catch_all: true,
            constraint,
        }));
    }

    if let Some(rest) = body.strip_prefix(':') {
        let (name, optional) = match rest.strip_suffix('?') {
            Some(name) => (name, true),
            None => (rest, false),
        };
        if name.is_empty() {
            return Err(RouterError::configuration(raw, "parameter needs a name"));
        }
        return Ok(Segment::Param(ParameterSpec {
            name: name.to_string(),
            optional,
            catch_all: false,
            constraint,
        }));
    }

    if constraint.is_some() {
        return Err(RouterError::configuration(
            raw,
            "constraints only apply to parameter segments",
        ));
    }

    Ok(Segment::Literal(body.to_string()))
}

fn split_constraint(raw: &str, piece: &str) -> Result<(String, Option<String>)> {
    match piece.find("{{") {
        Some(start) => {
            let end = piece.rfind("}}").filter(|end| *end > start).ok_or_else(|| {
                RouterError::configuration(raw, "unterminated constraint braces")
            })?;
            let constraint = piece[start + 2..end].to_string();
            parse_constraint(&constraint).ok_or_else(|| {
                RouterError::configuration(raw, format!("unsupported constraint `{constraint}`"))
            })?;
            Ok((piece[..start].to_string(), Some(constraint)))
        }
        None => Ok((piece.to_string(), None)),
    }
}

/// Matcher over a fixed set of compiled patterns.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    patterns: Vec<CompiledPattern>,
}

impl Matcher {
    pub fn new(patterns: Vec<CompiledPattern>) -> Self {
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Recognize the full path. `None` is a normal outcome, not an error.
    pub fn recognize(&self, path: &str) -> Option<Recognition> {
        let segments = split_path(path);
        let mut best: Option<Recognition> = None;
        for pattern in &self.patterns {
            if let Some(outcome) = match_segments(&pattern.segments, &segments, false) {
                debug_assert_eq!(outcome.consumed, segments.len());
                consider(&mut best, recognition(pattern, outcome));
            }
        }
        best
    }

    /// Greedily recognize the longest matching prefix, returning the match
    /// and the unconsumed remainder (still percent-encoded).
    pub fn recognize_prefix(&self, path: &str) -> Option<(Recognition, String)> {
        let segments = split_path(path);
        let mut best: Option<Recognition> = None;
        for pattern in &self.patterns {
            if let Some(outcome) = match_segments(&pattern.segments, &segments, true) {
                consider_prefix(&mut best, recognition(pattern, outcome));
            }
        }
        best.map(|rec| {
            let remainder = segments[rec.consumed..].join("/");
            (rec, remainder)
        })
    }
}

fn recognition(pattern: &CompiledPattern, outcome: MatchOutcome) -> Recognition {
    Recognition {
        def_index: pattern.def_index,
        raw_pattern: pattern.raw.clone(),
        params: outcome.params,
        consumed: outcome.consumed,
        tier: pattern.tier,
        skipped: outcome.skipped,
        order: pattern.order,
    }
}

/// Most specific match wins: fewest unmatched optional/catch-all slots,
/// explicit tier first, declaration order as the tiebreaker.
fn consider(best: &mut Option<Recognition>, candidate: Recognition) {
    let better = match best {
        None => true,
        Some(current) => {
            (candidate.tier, candidate.skipped, candidate.order)
                < (current.tier, current.skipped, current.order)
        }
    };
    if better {
        *best = Some(candidate);
    }
}

/// Prefix recognition prefers the longest consumed prefix before specificity.
fn consider_prefix(best: &mut Option<Recognition>, candidate: Recognition) {
    let better = match best {
        None => true,
        Some(current) => {
            (
                std::cmp::Reverse(candidate.consumed),
                candidate.tier,
                candidate.skipped,
                candidate.order,
            ) < (
                std::cmp::Reverse(current.consumed),
                current.tier,
                current.skipped,
                current.order,
            )
        }
    };
    if better {
        *best = Some(candidate);
    }
}

pub fn split_path(path: &str) -> Vec<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('/').map(str::to_string).collect()
}

pub fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

struct MatchOutcome {
    params: Params,
    consumed: usize,
    skipped: u32,
}

/// Backtracking segment matcher. Optional placeholders may consume a segment
/// or be skipped; the branch with the fewest skipped slots (and, for prefix
/// recognition, the longest consumption) wins.
fn match_segments(pattern: &[Segment], path: &[String], allow_prefix: bool) -> Option<MatchOutcome> {
    fn walk(
        pattern: &[Segment],
        path: &[String],
        allow_prefix: bool,
        params: &mut Params,
        consumed: usize,
        skipped: u32,
        best: &mut Option<MatchOutcome>,
    ) {
        let Some((head, tail)) = pattern.split_first() else {
            if path.is_empty() || allow_prefix {
                record(best, params.clone(), consumed, skipped, allow_prefix);
            }
            return;
        };

        match head {
            Segment::Literal(lit) => {
                if let Some((seg, rest)) = path.split_first() {
                    if decode_segment(seg) == *lit {
                        walk(tail, rest, allow_prefix, params, consumed + 1, skipped, best);
                    }
                }
            }
            Segment::Param(spec) if spec.catch_all => {
                let values: Vec<String> = path.iter().map(|seg| decode_segment(seg)).collect();
                let value = values.join("/");
                if constraint_allows(spec, &value) {
                    let extra_skip = if path.is_empty() { 1 } else { 0 };
                    params.insert(spec.name.clone(), value);
                    record(
                        best,
                        params.clone(),
                        consumed + path.len(),
                        skipped + extra_skip,
                        allow_prefix,
                    );
                    params.remove(&spec.name);
                }
            }
            Segment::Param(spec) => {
                if let Some((seg, rest)) = path.split_first() {
                    let value = decode_segment(seg);
                    if constraint_allows(spec, &value) {
                        params.insert(spec.name.clone(), value);
                        walk(tail, rest, allow_prefix, params, consumed + 1, skipped, best);
                        params.remove(&spec.name);
                    }
                }
                if spec.optional {
                    walk(tail, path, allow_prefix, params, consumed, skipped + 1, best);
                }
            }
        }
    }

    fn record(
        best: &mut Option<MatchOutcome>,
        params: Params,
        consumed: usize,
        skipped: u32,
        allow_prefix: bool,
    ) {
        let candidate = MatchOutcome {
            params,
            consumed,
            skipped,
        };
        let better = match best {
            None => true,
            Some(current) => {
                if allow_prefix {
                    (std::cmp::Reverse(candidate.consumed), candidate.skipped)
                        < (std::cmp::Reverse(current.consumed), current.skipped)
                } else {
                    candidate.skipped < current.skipped
                }
            }
        };
        if better {
            *best = Some(candidate);
        }
    }

    let mut best = None;
    let mut params = Params::new();
    walk(
        pattern,
        path,
        allow_prefix,
        &mut params,
        0,
        0,
        &mut best,
    );
    best
}

fn constraint_allows(spec: &ParameterSpec, value: &str) -> bool {
    match &spec.constraint {
        Some(constraint) => constraint_match(constraint, value),
        None => true,
    }
}

// --- constraint matching -------------------------------------------------
//
// Constraints are an anchored pattern subset: literal characters, `.`, `\d`,
// `\w`, character classes (`[a-z0-9]`, `[^/]`) and the `?`/`*`/`+`
// quantifiers. This covers the numeric and slug constraints route
// configurations actually use without pulling a full regex engine into the
// dependency tree.

#[derive(Debug, Clone, PartialEq)]
enum Atom {
    Lit(char),
    Any,
    Digit,
    Word,
    Class { negated: bool, items: Vec<ClassItem> },
}

#[derive(Debug, Clone, PartialEq)]
enum ClassItem {
    Ch(char),
    Range(char, char),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Quant {
    One,
    Opt,
    Star,
    Plus,
}

#[derive(Debug, Clone, PartialEq)]
struct Piece {
    atom: Atom,
    quant: Quant,
}

fn parse_constraint(pattern: &str) -> Option<Vec<Piece>> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut pieces = Vec::new();
    let mut idx = 0;

    while idx < chars.len() {
        let atom = match chars[idx] {
            '.' => {
                idx += 1;
                Atom::Any
            }
            '\\' => {
                let escaped = *chars.get(idx + 1)?;
                idx += 2;
                match escaped {
                    'd' => Atom::Digit,
                    'w' => Atom::Word,
                    other => Atom::Lit(other),
                }
            }
            '[' => {
                let close = chars[idx..].iter().position(|c| *c == ']')? + idx;
                let mut inner = &chars[idx + 1..close];
                let negated = inner.first() == Some(&'^');
                if negated {
                    inner = &inner[1..];
                }
                let mut items = Vec::new();
                let mut i = 0;
                while i < inner.len() {
                    if i + 2 < inner.len() && inner[i + 1] == '-' {
                        items.push(ClassItem::Range(inner[i], inner[i + 2]));
                        i += 3;
                    } else {
                        items.push(ClassItem::Ch(inner[i]));
                        i += 1;
                    }
                }
                idx = close + 1;
                Atom::Class { negated, items }
            }
            '(' | ')' | '|' | '{' | '}' | '$' | '^' => return None,
            other => {
                idx += 1;
                Atom::Lit(other)
            }
        };

        let quant = match chars.get(idx) {
            Some('?') => {
                idx += 1;
                Quant::Opt
            }
            Some('*') => {
                idx += 1;
                Quant::Star
            }
            Some('+') => {
                idx += 1;
                Quant::Plus
            }
            _ => Quant::One,
        };

        pieces.push(Piece { atom, quant });
    }

    Some(pieces)
}

pub(crate) fn constraint_match(pattern: &str, text: &str) -> bool {
    let Some(pieces) = parse_constraint(pattern) else {
        return false;
    };
    let chars: Vec<char> = text.chars().collect();
    match_pieces(&pieces, &chars)
}

fn match_pieces(pieces: &[Piece], text: &[char]) -> bool {
    let Some((head, tail)) = pieces.split_first() else {
        return text.is_empty();
    };

    match head.quant {
        Quant::One => match text.split_first() {
            Some((ch, rest)) if atom_matches(&head.atom, *ch) => match_pieces(tail, rest),
            _ => false,
        },
        Quant::Opt => {
            if let Some((ch, rest)) = text.split_first() {
                if atom_matches(&head.atom, *ch) && match_pieces(tail, rest) {
                    return true;
                }
            }
            match_pieces(tail, text)
        }
        Quant::Star | Quant::Plus => {
            let min = if head.quant == Quant::Plus { 1 } else { 0 };
            let mut len = 0;
            while len < text.len() && atom_matches(&head.atom, text[len]) {
                len += 1;
            }
            // Longest-first backtracking.
            while len + 1 > min {
                if match_pieces(tail, &text[len..]) {
                    return true;
                }
                if len == 0 {
                    break;
                }
                len -= 1;
            }
            min == 0 && match_pieces(tail, text)
        }
    }
}

fn atom_matches(atom: &Atom, ch: char) -> bool {
    match atom {
        Atom::Lit(lit) => *lit == ch,
        Atom::Any => true,
        Atom::Digit => ch.is_ascii_digit(),
        Atom::Word => ch.is_ascii_alphanumeric() || ch == '_',
        Atom::Class { negated, items } => {
            let hit = items.iter().any(|item| match item {
                ClassItem::Ch(c) => *c == ch,
                ClassItem::Range(lo, hi) => (*lo..=*hi).contains(&ch),
            });
            hit != *negated
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(patterns: &[&str]) -> Matcher {
        let compiled = patterns
            .iter()
            .enumerate()
            .map(|(idx, raw)| compile_pattern(raw, 0, idx, idx).unwrap())
            .collect();
        Matcher::new(compiled)
    }

    #[test]
    fn literal_match() {
        let m = matcher(&["a/b"]);
        let rec = m.recognize("a/b").unwrap();
        assert_eq!(rec.def_index, 0);
        assert!(rec.params.is_empty());
        assert!(m.recognize("a/c").is_none());
    }

    #[test]
    fn no_match_is_not_an_error() {
        let m = matcher(&["a"]);
        assert!(m.recognize("b").is_none());
    }

    #[test]
    fn required_param_extraction() {
        let m = matcher(&["users/:id"]);
        let rec = m.recognize("users/42").unwrap();
        assert_eq!(rec.params.get("id").unwrap(), "42");
    }

    #[test]
    fn optional_param_can_be_absent() {
        let m = matcher(&["users/:id?"]);
        assert!(m.recognize("users").is_some());
        let rec = m.recognize("users/7").unwrap();
        assert_eq!(rec.params.get("id").unwrap(), "7");
    }

    #[test]
    fn fewest_unmatched_slots_wins() {
        // "a" leaves no slot unmatched while "a/:x?" skips one.
        let m = matcher(&["a/:x?", "a"]);
        let rec = m.recognize("a").unwrap();
        assert_eq!(rec.def_index, 1);
        // With a second segment only the parameterized pattern fits.
        let rec = m.recognize("a/1").unwrap();
        assert_eq!(rec.def_index, 0);
    }

    #[test]
    fn ties_break_by_declaration_order() {
        let m = matcher(&["x/:a", "x/:b"]);
        let rec = m.recognize("x/1").unwrap();
        assert_eq!(rec.def_index, 0);
    }

    #[test]
    fn catch_all_consumes_remainder() {
        let m = matcher(&["files/*path"]);
        let rec = m.recognize("files/a/b/c").unwrap();
        assert_eq!(rec.params.get("path").unwrap(), "a/b/c");
    }

    #[test]
    fn catch_all_must_be_final() {
        let err = compile_pattern("*rest/tail", 0, 0, 0).unwrap_err();
        assert!(matches!(err, RouterError::Configuration { .. }));
    }

    #[test]
    fn constraint_restricts_match() {
        let m = matcher(&["p/:id{{\\d+}}", "p/:slug"]);
        assert_eq!(m.recognize("p/15").unwrap().def_index, 0);
        assert_eq!(m.recognize("p/hello").unwrap().def_index, 1);
    }

    #[test]
    fn class_constraint() {
        let m = matcher(&["t/:tag{{[a-z]+}}"]);
        assert!(m.recognize("t/abc").is_some());
        assert!(m.recognize("t/ABC").is_none());
    }

    #[test]
    fn unsupported_constraint_fails_compilation() {
        let err = compile_pattern("p/:x{{(a|b)}}", 0, 0, 0).unwrap_err();
        assert!(matches!(err, RouterError::Configuration { .. }));
    }

    #[test]
    fn percent_escapes_decoded_before_comparison() {
        let m = matcher(&["caf\u{e9}/:name"]);
        let rec = m.recognize("caf%C3%A9/j%C3%B8rn").unwrap();
        assert_eq!(rec.params.get("name").unwrap(), "j\u{f8}rn");
    }

    #[test]
    fn prefix_recognition_returns_remainder() {
        let m = matcher(&["parent/:id"]);
        let (rec, rest) = m.recognize_prefix("parent/3/child/9").unwrap();
        assert_eq!(rec.params.get("id").unwrap(), "3");
        assert_eq!(rest, "child/9");
    }

    #[test]
    fn prefix_recognition_prefers_longest_consumption() {
        let m = matcher(&["a", "a/b"]);
        let (rec, rest) = m.recognize_prefix("a/b/c").unwrap();
        assert_eq!(rec.def_index, 1);
        assert_eq!(rest, "c");
    }

    #[test]
    fn empty_pattern_matches_empty_path() {
        let m = matcher(&[""]);
        assert!(m.recognize("").is_some());
        let (rec, rest) = m.recognize_prefix("anything").unwrap();
        assert_eq!(rec.consumed, 0);
        assert_eq!(rest, "anything");
    }

    #[test]
    fn duplicate_param_name_rejected() {
        let err = compile_pattern(":a/:a", 0, 0, 0).unwrap_err();
        assert!(matches!(err, RouterError::Configuration { .. }));
    }

    #[test]
    fn recognition_is_deterministic() {
        let m = matcher(&["a/:x?", "a/:y?", "a"]);
        let first = m.recognize("a/1").map(|r| r.def_index);
        for _ in 0..16 {
            assert_eq!(m.recognize("a/1").map(|r| r.def_index), first);
        }
    }
}

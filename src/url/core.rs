use std::collections::BTreeSet;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::error::{Result, RouterError};
use crate::instruction::{NormalizedInput, ViewportInstruction};
use crate::recognizer::{
    CompiledPattern, Params, Segment, compile_pattern, constraint_match, decode_segment,
};
use crate::registry::RouteDefinition;
use crate::tree::{RouteNode, RouteTree};

/// Everything except unreserved characters is escaped, matching what the
/// recognizer decodes on the way back in.
const SEGMENT_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub fn encode_segment(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT_SET).to_string()
}

/// Serialized location produced from a committed route tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub path: String,
    pub query: String,
    pub fragment: Option<String>,
}

impl UrlParts {
    pub fn href(&self) -> String {
        let mut out = self.path.clone();
        if !self.query.is_empty() {
            out.push('?');
            out.push_str(&self.query);
        }
        if let Some(fragment) = &self.fragment {
            out.push('#');
            out.push_str(&encode_segment(fragment));
        }
        out
    }
}

/// Split on `sep`, ignoring separators nested inside parentheses.
fn split_top(input: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in input.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            c if c == sep && depth == 0 => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    parts.push(current);
    parts
}

struct Token {
    text: String,
    params: Option<Params>,
    viewport: Option<String>,
    /// Inner sibling strings of a `(a+b)` child group.
    group: Option<Vec<String>>,
}

impl Token {
    fn is_plain(&self) -> bool {
        self.params.is_none() && self.viewport.is_none() && self.group.is_none()
    }
}

fn split_viewport(body: &str) -> (String, Option<String>) {
    let mut depth = 0usize;
    let mut at = None;
    for (idx, ch) in body.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '@' if depth == 0 => at = Some(idx),
            _ => {}
        }
    }
    match at {
        Some(idx) => (
            body[..idx].to_string(),
            Some(decode_segment(&body[idx + 1..])),
        ),
        None => (body.to_string(), None),
    }
}

fn parse_token(raw: &str) -> Result<Token> {
    if raw.starts_with('(') && raw.ends_with(')') {
        let inner = &raw[1..raw.len() - 1];
        let parts: Vec<String> = split_top(inner, '+')
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            return Err(RouterError::recognition(raw));
        }
        return Ok(Token {
            text: String::new(),
            params: None,
            viewport: None,
            group: Some(parts),
        });
    }
    let (body, viewport) = split_viewport(raw);
    if let Some(open) = body.find('(') {
        if !body.ends_with(')') {
            return Err(RouterError::recognition(raw));
        }
        let name = body[..open].to_string();
        if name.is_empty() {
            return Err(RouterError::recognition(raw));
        }
        let inner = &body[open + 1..body.len() - 1];
        let mut params = Params::new();
        for pair in inner.split(',').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            params.insert(decode_segment(key), decode_segment(value));
        }
        return Ok(Token {
            text: name,
            params: Some(params),
            viewport,
            group: None,
        });
    }
    Ok(Token {
        text: body,
        params: None,
        viewport,
        group: None,
    })
}

fn build_children(tokens: &[Token]) -> Result<Vec<ViewportInstruction>> {
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    if let Some(parts) = &tokens[0].group {
        if tokens.len() > 1 {
            return Err(RouterError::recognition("segments after a sibling group"));
        }
        return parts.iter().map(|part| parse_sibling(part)).collect();
    }
    Ok(build_chain(tokens)?.into_iter().collect())
}

fn build_chain(tokens: &[Token]) -> Result<Option<ViewportInstruction>> {
    if tokens.is_empty() {
        return Ok(None);
    }
    let plain = tokens.iter().take_while(|t| t.is_plain()).count();
    if plain > 0 {
        let path: Vec<&str> = tokens[..plain].iter().map(|t| t.text.as_str()).collect();
        let mut instruction = ViewportInstruction::path(path.join("/"));
        instruction.children = build_children(&tokens[plain..])?;
        return Ok(Some(instruction));
    }
    let token = &tokens[0];
    if token.group.is_some() {
        return Err(RouterError::recognition("sibling group without a parent"));
    }
    let mut instruction = match &token.params {
        Some(params) => {
            ViewportInstruction::named(decode_segment(&token.text)).with_params(params.clone())
        }
        None => ViewportInstruction::path(token.text.clone()),
    };
    if let Some(viewport) = &token.viewport {
        instruction = instruction.with_viewport(viewport.clone());
    }
    instruction.children = build_children(&tokens[1..])?;
    Ok(Some(instruction))
}

fn parse_sibling(raw: &str) -> Result<ViewportInstruction> {
    let tokens: Result<Vec<Token>> = split_top(raw, '/')
        .into_iter()
        .filter(|t| !t.is_empty())
        .map(|t| parse_token(&t))
        .collect();
    let tokens = tokens?;
    if tokens.is_empty() {
        return Ok(ViewportInstruction::path(""));
    }
    build_chain(&tokens)?.ok_or_else(|| RouterError::recognition(raw))
}

/// Parse a location string into sibling instructions plus query and fragment.
///
/// Accepts the parenthesized parameter form `name(key=value)` anywhere a
/// positional segment is accepted, `+` for siblings, `@viewport` targeting,
/// and `(a+b)` groups for sibling children under one parent.
pub fn parse(input: &str) -> Result<NormalizedInput> {
    let (rest, fragment) = match input.split_once('#') {
        Some((rest, fragment)) => (rest, Some(decode_segment(fragment))),
        None => (input, None),
    };
    let (path, query_str) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    let mut query = Params::new();
    if let Some(raw) = query_str {
        for pair in raw.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            query.insert(decode_segment(key), decode_segment(value));
        }
    }

    let path = path.trim_matches('/');
    let mut instructions = Vec::new();
    if path.is_empty() {
        instructions.push(ViewportInstruction::path(""));
    } else {
        for sibling in split_top(path, '+').into_iter().filter(|s| !s.is_empty()) {
            instructions.push(parse_sibling(&sibling)?);
        }
    }
    Ok(NormalizedInput {
        instructions,
        query,
        fragment,
    })
}

enum Fill {
    Filled {
        path: String,
        consumed: BTreeSet<String>,
        flex: usize,
    },
    Missing(Vec<String>),
    Unusable,
}

fn try_fill(pattern: &CompiledPattern, params: &Params) -> Fill {
    let mut segments: Vec<String> = Vec::new();
    let mut consumed = BTreeSet::new();
    let mut missing = Vec::new();
    // A value following a skipped optional with no literal anchor between
    // them would re-recognize into the wrong parameter.
    let mut skip_pending = false;
    let flex = pattern
        .params()
        .filter(|spec| spec.optional || spec.catch_all)
        .count();
    for segment in &pattern.segments {
        match segment {
            Segment::Literal(lit) => {
                skip_pending = false;
                segments.push(encode_segment(lit));
            }
            Segment::Param(spec) => match params.get(&spec.name) {
                Some(value) => {
                    if skip_pending {
                        return Fill::Unusable;
                    }
                    if let Some(constraint) = &spec.constraint {
                        if !constraint_match(constraint, value) {
                            return Fill::Unusable;
                        }
                    }
                    if spec.catch_all {
                        for piece in value.split('/').filter(|p| !p.is_empty()) {
                            segments.push(encode_segment(piece));
                        }
                    } else {
                        segments.push(encode_segment(value));
                    }
                    consumed.insert(spec.name.clone());
                }
                None => {
                    if spec.optional || spec.catch_all {
                        skip_pending = true;
                    } else {
                        missing.push(spec.name.clone());
                    }
                }
            },
        }
    }
    if !missing.is_empty() {
        return Fill::Missing(missing);
    }
    Fill::Filled {
        path: segments.join("/"),
        consumed,
        flex,
    }
}

/// Generate the path for one definition from supplied params.
///
/// Prefers the pattern declaring the fewest optional/catch-all slots among
/// those whose required params are all supplied; params no pattern consumes
/// are appended to `leftover` for query serialization.
pub fn generate_path(
    def: &RouteDefinition,
    params: &Params,
    leftover: &mut Params,
) -> Result<String> {
    let patterns: Vec<String> = if def.paths.is_empty() {
        vec![def.name().to_string()]
    } else {
        def.paths.clone()
    };

    let mut best: Option<(usize, String, BTreeSet<String>)> = None;
    let mut ambiguous = false;
    let mut missing: Vec<String> = Vec::new();
    for (order, raw) in patterns.iter().enumerate() {
        let compiled = compile_pattern(raw, 0, 0, order)
            .map_err(|err| RouterError::generation(def.name(), err.to_string()))?;
        match try_fill(&compiled, params) {
            Fill::Filled {
                path,
                consumed,
                flex,
            } => match &best {
                None => best = Some((flex, path, consumed)),
                Some((best_flex, _, best_consumed)) => {
                    if flex < *best_flex {
                        best = Some((flex, path, consumed));
                        ambiguous = false;
                    } else if flex == *best_flex && consumed != *best_consumed {
                        ambiguous = true;
                    }
                }
            },
            Fill::Missing(names) => missing.extend(names),
            Fill::Unusable => {}
        }
    }

    match best {
        Some((_, path, consumed)) => {
            if ambiguous {
                return Err(RouterError::generation(
                    def.name(),
                    "ambiguous reverse pattern for the supplied params",
                ));
            }
            for (key, value) in params {
                if !consumed.contains(key) {
                    leftover
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
            }
            Ok(path)
        }
        None => {
            missing.sort();
            missing.dedup();
            if missing.is_empty() {
                return Err(RouterError::generation(
                    def.name(),
                    "no pattern accepts the supplied params",
                ));
            }
            Err(RouterError::generation(
                def.name(),
                format!("missing required parameter(s): {}", missing.join(", ")),
            ))
        }
    }
}

/// Validate that some pattern of `def` is generable from `params` without
/// producing a path.
pub(crate) fn ensure_params(def: &RouteDefinition, params: &Params) -> Result<()> {
    let mut scratch = Params::new();
    generate_path(def, params, &mut scratch).map(|_| ())
}

fn serialize_node(node: &RouteNode, query: &mut Params) -> Result<String> {
    let mut out = match &node.raw_path {
        Some(raw) => raw.clone(),
        None => {
            let def = node.definition.as_ref().ok_or_else(|| {
                RouterError::generation(node.component_name(), "node carries no definition")
            })?;
            generate_path(def, &node.params, query)?
        }
    };
    // Synthesized viewport names mirror the component name and are implied.
    if !node.viewport_name.is_empty() && node.viewport_name != node.component_name() {
        out.push('@');
        out.push_str(&encode_segment(&node.viewport_name));
    }
    match node.children.len() {
        0 => {}
        1 => {
            let child = serialize_node(&node.children[0], query)?;
            if !child.is_empty() {
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str(&child);
            }
        }
        _ => {
            let parts: Result<Vec<String>> = node
                .children
                .iter()
                .map(|child| serialize_node(child, query))
                .collect();
            if !out.is_empty() {
                out.push('/');
            }
            out.push('(');
            out.push_str(&parts?.join("+"));
            out.push(')');
        }
    }
    Ok(out)
}

/// Serialize a committed tree back into its location form.
pub fn serialize(tree: &RouteTree) -> Result<UrlParts> {
    let mut query = tree.query.clone();
    let mut parts = Vec::new();
    for child in &tree.root.children {
        parts.push(serialize_node(child, &mut query)?);
    }
    let path = parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("+");
    let query_string = query
        .iter()
        .map(|(key, value)| format!("{}={}", encode_segment(key), encode_segment(value)))
        .collect::<Vec<_>>()
        .join("&");
    Ok(UrlParts {
        path,
        query: query_string,
        fragment: tree.fragment.clone(),
    })
}

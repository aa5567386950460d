//! Query values and the query repository.
//!
//! A [`Query`] pairs SQL text with an ordered tuple of typed parameters.
//! Freezing it against an OID map produces a [`BinaryQuery`]: parameter
//! OIDs and binary frames laid out once, shareable across retries.
//!
//! A [`QueryRepository`] loads a declarative query file of
//! `-- name: <identifier>` blocks whose `:name` / `:0` placeholders are
//! rewritten to `$1, $2, ...` at load time.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use crate::conversion::ToParams;
use crate::error::{Error, Result};
use crate::oid_map::OidMap;
use crate::protocol::types::Oid;

/// A parameterized SQL statement.
#[derive(Debug, Clone)]
pub struct Query<'a, P> {
    /// SQL text with `$1, $2, ...` placeholders
    pub text: Cow<'a, str>,
    /// Ordered parameter values
    pub params: P,
}

impl<'a, P: ToParams> Query<'a, P> {
    /// Build a query from text and parameters.
    pub fn new(text: impl Into<Cow<'a, str>>, params: P) -> Self {
        Self {
            text: text.into(),
            params,
        }
    }

    /// Freeze parameter OIDs and binary frames against an OID map.
    pub fn freeze(&self, map: &OidMap) -> Result<BinaryQuery> {
        let param_oids = self.params.param_oids(map)?;
        let mut frames = Vec::new();
        self.params.write_frames(map, &mut frames)?;

        Ok(BinaryQuery {
            inner: Arc::new(BinaryQueryInner {
                text: self.text.clone().into_owned(),
                param_oids,
                param_count: self.params.param_count() as u16,
                frames,
            }),
        })
    }
}

/// Shorthand for [`Query::new`].
pub fn query<'a, P: ToParams>(text: impl Into<Cow<'a, str>>, params: P) -> Query<'a, P> {
    Query::new(text, params)
}

impl<'a> From<&'a str> for Query<'a, ()> {
    fn from(text: &'a str) -> Self {
        Query::new(text, ())
    }
}

#[derive(Debug)]
struct BinaryQueryInner {
    text: String,
    param_oids: Vec<Oid>,
    param_count: u16,
    frames: Vec<u8>,
}

/// A query frozen to wire form: text, parameter OIDs and encoded frames.
///
/// Reference-counted so an operation's retries and continuations can
/// share it without re-encoding.
#[derive(Debug, Clone)]
pub struct BinaryQuery {
    inner: Arc<BinaryQueryInner>,
}

impl BinaryQuery {
    /// The SQL text.
    pub fn text(&self) -> &str {
        &self.inner.text
    }

    /// Frozen parameter OIDs.
    pub fn param_oids(&self) -> &[Oid] {
        &self.inner.param_oids
    }

    /// Number of parameters.
    pub fn param_count(&self) -> u16 {
        self.inner.param_count
    }

    /// The parameters as consecutive binary data frames.
    pub fn param_frames(&self) -> &[u8] {
        &self.inner.frames
    }
}

/// One query loaded from a repository file.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedQuery {
    /// SQL text with placeholders rewritten to `$1, $2, ...`
    pub text: String,
    /// Parameter names in `$n` order; positional placeholders are named
    /// by their index
    pub params: Vec<String>,
}

/// A set of named queries loaded from a declarative config file.
#[derive(Debug, Default)]
pub struct QueryRepository {
    queries: HashMap<String, LoadedQuery>,
}

impl QueryRepository {
    /// Parse a query file.
    ///
    /// Load-time errors: duplicate block names, malformed headers, mixing
    /// named and positional placeholders in one query, and positional
    /// placeholders that do not form a contiguous range from 0.
    pub fn parse(source: &str) -> Result<Self> {
        let mut queries = HashMap::new();
        let mut current: Option<(String, String)> = None;

        for line in source.lines() {
            if let Some(rest) = line.trim_start().strip_prefix("-- name:") {
                if let Some((name, body)) = current.take() {
                    Self::insert(&mut queries, name, &body)?;
                }
                let name = rest.trim();
                if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    return Err(Error::InvalidUsage(format!(
                        "invalid query name: {:?}",
                        name
                    )));
                }
                current = Some((name.to_string(), String::new()));
            } else if let Some((_, body)) = &mut current {
                body.push_str(line);
                body.push('\n');
            }
            // text before the first block is ignored
        }

        if let Some((name, body)) = current.take() {
            Self::insert(&mut queries, name, &body)?;
        }

        Ok(Self { queries })
    }

    fn insert(
        queries: &mut HashMap<String, LoadedQuery>,
        name: String,
        body: &str,
    ) -> Result<()> {
        if queries.contains_key(&name) {
            return Err(Error::InvalidUsage(format!(
                "duplicate query name: {}",
                name
            )));
        }
        let loaded = rewrite_placeholders(&name, body.trim())?;
        queries.insert(name, loaded);
        Ok(())
    }

    /// Look up a loaded query by name.
    pub fn get(&self, name: &str) -> Option<&LoadedQuery> {
        self.queries.get(name)
    }

    /// SQL text of a query, or an error naming the missing entry.
    pub fn sql(&self, name: &str) -> Result<&str> {
        self.queries
            .get(name)
            .map(|q| q.text.as_str())
            .ok_or_else(|| Error::InvalidUsage(format!("no query named `{}`", name)))
    }

    /// Number of loaded queries.
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Whether the repository is empty.
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Rewrite `:name` / `:0` placeholders to `$1, $2, ...`.
///
/// Skips string literals and `::` casts. A repeated placeholder reuses
/// its number.
fn rewrite_placeholders(query_name: &str, body: &str) -> Result<LoadedQuery> {
    let mut text = String::with_capacity(body.len());
    let mut params: Vec<String> = Vec::new();
    let mut saw_named = false;
    let mut saw_positional = false;

    let mut chars = body.char_indices().peekable();
    let mut in_string = false;

    while let Some((_, c)) = chars.next() {
        if in_string {
            text.push(c);
            if c == '\'' {
                in_string = false;
            }
            continue;
        }

        match c {
            '\'' => {
                in_string = true;
                text.push(c);
            }
            ':' => {
                if let Some(&(_, next)) = chars.peek() {
                    if next == ':' {
                        // a cast, copy both colons through
                        text.push(':');
                        text.push(':');
                        chars.next();
                        continue;
                    }
                    if is_ident_char(next) {
                        let mut ident = String::new();
                        while let Some(&(_, c)) = chars.peek() {
                            if is_ident_char(c) {
                                ident.push(c);
                                chars.next();
                            } else {
                                break;
                            }
                        }

                        if ident.chars().all(|c| c.is_ascii_digit()) {
                            saw_positional = true;
                        } else {
                            saw_named = true;
                        }
                        if saw_named && saw_positional {
                            return Err(Error::InvalidUsage(format!(
                                "query `{}` mixes named and positional placeholders",
                                query_name
                            )));
                        }

                        let index = match params.iter().position(|p| *p == ident) {
                            Some(index) => index,
                            None => {
                                params.push(ident);
                                params.len() - 1
                            }
                        };
                        text.push('$');
                        text.push_str(&(index + 1).to_string());
                        continue;
                    }
                }
                text.push(c);
            }
            _ => text.push(c),
        }
    }

    if saw_positional {
        // positional placeholders must cover 0..n densely
        let mut indices: Vec<usize> = Vec::with_capacity(params.len());
        for p in &params {
            let index = p.parse::<usize>().map_err(|_| {
                Error::InvalidUsage(format!("query `{}`: bad positional index {}", query_name, p))
            })?;
            indices.push(index);
        }
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        if sorted.iter().enumerate().any(|(i, &v)| i != v) {
            return Err(Error::InvalidUsage(format!(
                "query `{}`: positional placeholders must be contiguous from 0",
                query_name
            )));
        }
        // renumber $n to match the positional order, not first appearance
        let mut renumbered = String::with_capacity(text.len());
        let mut rest = text.as_str();
        while let Some(pos) = rest.find('$') {
            renumbered.push_str(&rest[..pos + 1]);
            rest = &rest[pos + 1..];
            let end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            let appearance: usize = rest[..end].parse().map_err(|_| {
                Error::InvalidUsage(format!("query `{}`: dangling placeholder", query_name))
            })?;
            renumbered.push_str(&(indices[appearance - 1] + 1).to_string());
            rest = &rest[end..];
        }
        text = renumbered;
        params = indices.iter().map(usize::to_string).collect();
        params.sort_unstable_by_key(|p| p.parse::<usize>().unwrap_or(usize::MAX));
    }

    Ok(LoadedQuery { text, params })
}

//! Scop input model.
//!
//! The front end that extracts iteration domains and access relations from
//! program text is an external collaborator; this module defines the data it
//! hands us and a small line-oriented text format for loading a scop
//! description from a file:
//!
//! ```text
//! domain: { S[i, j] : 0 <= i < 1024 and 0 <= j < 1024 }
//! context: [N] -> { : N >= 1 }
//! schedule: { domain: "...", child: { schedule: "[...]" } }
//! read: { S[i, j] -> A[i, j] }
//! write: { S[i, j] -> C[i, j] }
//! may_write: { S[i, j] -> C[i, j] }
//! array: A 4 N N
//! ```
//!
//! Each `read:`/`write:`/`may_write:` line is one static reference. An
//! `array:` line names an array, its element size in bytes, and its declared
//! extents (affine expressions over the parameters).

use crate::isl_ext;
use isl_rs::{Context, Schedule, Set, UnionMap, UnionSet};
use log::{debug, warn};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScopError {
    #[error("failed to parse {field}: {reason}")]
    Parse { field: &'static str, reason: String },

    #[error("scop description is missing its domain")]
    MissingDomain,

    #[error("malformed line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Global descriptor of one source array.
#[derive(Clone, Debug)]
pub struct ArrayInfo {
    pub name: String,

    /// Element size in bytes.
    pub element_size: i64,

    /// Declared extent per dimension, as affine expressions over parameters.
    pub extents: Vec<String>,
}

/// One static read or write reference.
///
/// Referenced by index from the groups that contain it; the scop owns it.
#[derive(Clone, Debug)]
pub struct StmtAccess {
    pub stmt: String,
    pub array: String,

    /// Access relation `{ S[i] -> A[e] }` on original statement instances.
    pub access: UnionMap,

    pub write: bool,

    /// Definite write (not guarded by a runtime condition).
    pub exact_write: bool,
}

/// A program region ready for kernel synthesis. Immutable once built.
#[derive(Debug)]
pub struct Scop {
    pub ctx: Arc<Context>,
    pub domain: UnionSet,
    pub schedule: Schedule,

    /// Constraints on the parameters that hold for the whole region.
    pub context: Set,

    pub accesses: Vec<StmtAccess>,
    pub arrays: Vec<ArrayInfo>,
}

/// Parses with a panic guard: the bindings abort on malformed input.
fn guarded<T>(field: &'static str, text: &str, f: impl Fn() -> T) -> Result<T, ScopError> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(|_| ScopError::Parse {
        field,
        reason: format!("ISL rejected: {}", text),
    })
}

impl Scop {
    /// Builds a scop from ISL strings. `schedule` may be `None`, in which
    /// case a domain-only schedule is used (no bands, so nothing will be
    /// identified as a kernel).
    pub fn from_parts(
        ctx: Arc<Context>,
        domain: &str,
        context: Option<&str>,
        schedule: Option<&str>,
        accesses: Vec<(AccessKind, String)>,
        arrays: Vec<ArrayInfo>,
    ) -> Result<Self, ScopError> {
        let domain_set = guarded("domain", domain, || UnionSet::read_from_str(&ctx, domain))?;

        let context_set = match context {
            Some(c) => guarded("context", c, || Set::read_from_str(&ctx, c))?,
            None => guarded("context", "{ : }", || Set::read_from_str(&ctx, "{ : }"))?,
        };

        let schedule = match schedule {
            Some(s) => guarded("schedule", s, || Schedule::read_from_str(&ctx, s))?,
            None => {
                warn!("no schedule given; using domain-only schedule without bands");
                Schedule::from_domain(domain_set.copy())
            }
        };

        let stmt_re = Regex::new(r"(\w+)\s*\[").map_err(|e| ScopError::Parse {
            field: "accesses",
            reason: e.to_string(),
        })?;
        let array_re = Regex::new(r"->\s*(\w+)\s*\[").map_err(|e| ScopError::Parse {
            field: "accesses",
            reason: e.to_string(),
        })?;

        let mut parsed = Vec::with_capacity(accesses.len());
        for (kind, text) in &accesses {
            let access =
                guarded("access", text, || UnionMap::read_from_str(&ctx, text))?;
            let stmt = stmt_re
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            let array = array_re
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            if stmt.is_empty() || array.is_empty() {
                return Err(ScopError::Parse {
                    field: "access",
                    reason: format!("cannot identify statement/array in: {}", text),
                });
            }
            parsed.push(StmtAccess {
                stmt,
                array,
                access,
                write: kind.is_write(),
                exact_write: matches!(kind, AccessKind::Write),
            });
        }

        // Arrays referenced by accesses but not declared get a default
        // descriptor so promotion can still reason about them.
        let mut arrays = arrays;
        for acc in &parsed {
            if !arrays.iter().any(|a| a.name == acc.array) {
                debug!("array {} not declared; assuming 4-byte elements", acc.array);
                arrays.push(ArrayInfo {
                    name: acc.array.clone(),
                    element_size: 4,
                    extents: Vec::new(),
                });
            }
        }

        Ok(Scop {
            ctx,
            domain: domain_set,
            schedule,
            context: context_set,
            accesses: parsed,
            arrays,
        })
    }

    /// Union of the access relations of the references selected by `filter`,
    /// restricted to the given domain.
    pub fn collect_accesses(
        &self,
        domain: &UnionSet,
        filter: impl Fn(&StmtAccess) -> bool,
    ) -> UnionMap {
        let mut result = UnionMap::read_from_str(&self.ctx, "{ }");
        for acc in self.accesses.iter().filter(|a| filter(a)) {
            result = isl_ext::union_map_union(result, acc.access.copy());
        }
        result.intersect_domain(domain.copy())
    }

    /// All reads reaching `domain`.
    pub fn reads(&self, domain: &UnionSet) -> UnionMap {
        self.collect_accesses(domain, |a| !a.write)
    }

    /// All writes reaching `domain`.
    pub fn writes(&self, domain: &UnionSet) -> UnionMap {
        self.collect_accesses(domain, |a| a.write)
    }

    pub fn array(&self, name: &str) -> Option<&ArrayInfo> {
        self.arrays.iter().find(|a| a.name == name)
    }
}

/// Kind of a parsed access line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    MayWrite,
}

impl AccessKind {
    pub fn is_write(self) -> bool {
        !matches!(self, AccessKind::Read)
    }
}

/// Reads a scop description file in the line-oriented format above.
pub fn read_scop_file(ctx: Arc<Context>, path: &Path) -> Result<Scop, ScopError> {
    let content = std::fs::read_to_string(path)?;
    parse_scop_description(ctx, &content)
}

/// Parses a scop description from text.
pub fn parse_scop_description(ctx: Arc<Context>, text: &str) -> Result<Scop, ScopError> {
    let mut domain: Option<String> = None;
    let mut context: Option<String> = None;
    let mut schedule: Option<String> = None;
    let mut accesses: Vec<(AccessKind, String)> = Vec::new();
    let mut arrays: Vec<ArrayInfo> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once(':').ok_or(ScopError::MalformedLine {
            line: idx + 1,
            reason: "expected `key: value`".to_string(),
        })?;
        let value = value.trim();
        match key.trim() {
            "domain" => domain = Some(value.to_string()),
            "context" => context = Some(value.to_string()),
            "schedule" => schedule = Some(value.to_string()),
            "read" => accesses.push((AccessKind::Read, value.to_string())),
            "write" => accesses.push((AccessKind::Write, value.to_string())),
            "may_write" => accesses.push((AccessKind::MayWrite, value.to_string())),
            "array" => {
                let mut parts = value.split_whitespace();
                let name = parts.next().ok_or(ScopError::MalformedLine {
                    line: idx + 1,
                    reason: "array line needs a name".to_string(),
                })?;
                let element_size = parts
                    .next()
                    .and_then(|s| s.parse::<i64>().ok())
                    .unwrap_or(4);
                let extents = parts.map(|s| s.to_string()).collect();
                arrays.push(ArrayInfo {
                    name: name.to_string(),
                    element_size,
                    extents,
                });
            }
            other => {
                return Err(ScopError::MalformedLine {
                    line: idx + 1,
                    reason: format!("unknown key `{}`", other),
                })
            }
        }
    }

    let domain = domain.ok_or(ScopError::MissingDomain)?;
    Scop::from_parts(
        ctx,
        &domain,
        context.as_deref(),
        schedule.as_deref(),
        accesses,
        arrays,
    )
}

//! Middleware chains and their composition.
//!
//! # Composition
//! ```text
//! chains (outer → inner):  global   group    route
//!   before                 [A, B]   [C]      [D]      skip {B}
//!   after                  [X]      [Y]      [Z]
//!
//! effective before = A C D          (outer → inner, skipped removed)
//! effective after  = Z Y X          (inner → outer, skipped removed)
//! ```
//!
//! A skip entry in any chain removes that middleware everywhere in the
//! composed chain, so a route can opt out of a global middleware.

use crate::http::view::Middleware;

/// Before, after and skip lists of one routing scope.
#[derive(Clone, Debug, Default)]
pub struct Middlewares {
    pub before: Vec<Middleware>,
    pub after: Vec<Middleware>,
    pub skip: Vec<Middleware>,
}

impl Middlewares {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_before(mut self, middleware: impl Into<Middleware>) -> Self {
        self.before.push(middleware.into());
        self
    }

    pub fn use_after(mut self, middleware: impl Into<Middleware>) -> Self {
        self.after.push(middleware.into());
        self
    }

    pub fn skip(mut self, middleware: &Middleware) -> Self {
        self.skip.push(middleware.clone());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty() && self.skip.is_empty()
    }
}

/// Flattened middleware sequences for one route.
#[derive(Clone, Debug, Default)]
pub struct ComposedChain {
    pub before: Vec<Middleware>,
    pub after: Vec<Middleware>,
}

/// Compose chains given from the outermost scope to the route itself.
pub fn compose(chains: &[&Middlewares]) -> ComposedChain {
    let skipped: Vec<&Middleware> = chains.iter().flat_map(|c| c.skip.iter()).collect();
    let kept = |mw: &&Middleware| !skipped.iter().any(|s| s.same_as(mw));

    let before = chains
        .iter()
        .flat_map(|c| c.before.iter())
        .filter(kept)
        .cloned()
        .collect();

    let after = chains
        .iter()
        .rev()
        .flat_map(|c| c.after.iter())
        .filter(kept)
        .cloned()
        .collect();

    ComposedChain { before, after }
}

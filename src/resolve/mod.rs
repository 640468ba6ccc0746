//! Ecosystem resolvers.
//!
//! Each resolver implements [`EcosystemResolver`](crate::traits::EcosystemResolver)
//! and turns one manifest/lockfile format into [`DependencyNode`](crate::model::DependencyNode)s:
//! - `npm` - `package-lock.json` / `npm-shrinkwrap.json` with full depth
//! - `pip` - `requirements.txt` or `pyproject.toml`, direct dependencies only
//! - `go` - `go.mod`, direct and `// indirect` requirements

pub mod go;
pub mod npm;
pub mod pip;

pub use go::GoResolver;
pub use npm::NpmResolver;
pub use pip::PipResolver;

use crate::model::Ecosystem;
use crate::traits::EcosystemResolver;

/// Default resolver for an ecosystem.
pub fn resolver_for(ecosystem: Ecosystem) -> Box<dyn EcosystemResolver> {
    match ecosystem {
        Ecosystem::Npm => Box::new(NpmResolver),
        Ecosystem::Pip => Box::new(PipResolver),
        Ecosystem::Go => Box::new(GoResolver::new()),
    }
}

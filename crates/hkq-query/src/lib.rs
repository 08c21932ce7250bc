//! HKQ Query - Templates, compilation and result normalization
//!
//! - [`TemplateRegistry`]: the intent → template catalog
//! - [`QueryCompiler`]: template + slot resolutions → SPARQL SELECT
//! - [`ResultNormalizer`]: store bindings → language-tagged facts

pub mod compiler;
pub mod normalizer;
pub mod template;

pub use compiler::{CompileError, QueryCompiler};
pub use normalizer::ResultNormalizer;
pub use template::{
    Comparison, OrderBy, Placeholder, Template, TemplateMessages, TemplateRegistry, TriplePattern,
    Variable,
};

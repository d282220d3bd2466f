//! Display transform chain resolution and transform file output.

pub mod chain;
pub mod itk;

pub use chain::{resolve_reference_index, TransformChain};
pub use itk::{parse_itk_affine_text, to_itk_affine_text};

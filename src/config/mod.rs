//! Declarative quantization-simulation configuration
//!
//! Defaults apply to every tensor; per-tensor entries override single fields.
//!
//! # Example
//!
//! ```yaml
//! defaults:
//!   bitwidth: 8
//!   device: parallel
//!
//! activations:
//!   conv1.output: {}
//!
//! params:
//!   conv1.weight:
//!     bitwidth: 4
//!     symmetric: true
//! ```

mod builder;
mod load;
mod schema;
mod validate;



pub use builder::{build_registry, build_registry_with_allocator};
pub use load::{load_config, parse_yaml};
pub use schema::{QuantSimConfig, QuantizerConfig, QuantizerOverride};
pub use validate::{validate_config, validate_quantizer_config, ValidationError};

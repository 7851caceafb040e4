//! Build a quantizer registry from configuration

use std::sync::Arc;

use tracing::info;

use super::schema::QuantSimConfig;
use super::validate::validate_config;
use crate::device::{Allocator, HostAllocator};
use crate::error::Result;
use crate::quant::{mix_seed, Quantizer};
use crate::registry::{QuantizerRegistry, TensorKind};

/// Build a registry with one quantizer per configured tensor
///
/// Activations are registered before params, each section in name order.
/// A seed inherited from `defaults` is mixed with the registration index, so
/// tensors draw distinct stochastic streams; a per-tensor seed is used as is.
pub fn build_registry(config: &QuantSimConfig) -> Result<QuantizerRegistry> {
    build_registry_with_allocator(config, Arc::new(HostAllocator::new()))
}

/// Like [`build_registry`], with every quantizer drawing scratch from `allocator`
pub fn build_registry_with_allocator(
    config: &QuantSimConfig,
    allocator: Arc<dyn Allocator>,
) -> Result<QuantizerRegistry> {
    validate_config(config)?;

    let mut registry = QuantizerRegistry::new();
    let sections = [
        (TensorKind::Activation, &config.activations),
        (TensorKind::Param, &config.params),
    ];

    for (kind, section) in sections {
        for (name, over) in section {
            let mut resolved = over.apply(&config.defaults);
            if over.seed.is_none() {
                resolved.seed = config
                    .defaults
                    .seed
                    .map(|seed| mix_seed(seed, registry.len() as u64));
            }
            let quantizer = Quantizer::with_allocator(resolved, Arc::clone(&allocator))?;
            registry.register(name.clone(), kind, quantizer)?;
        }
    }

    info!(quantizers = registry.len(), "built quantizer registry");
    Ok(registry)
}

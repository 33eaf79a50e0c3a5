//! # Provider Routing
//!
//! Capabilities with multiple interchangeable backends (image generation
//! being the canonical one) route through [`fallback`]: healthy-provider
//! selection fed by live health state, and an ordered degrade chain that
//! always produces something usable.

pub mod fallback;

pub use fallback::{
    FallbackRouter, GeneratedImage, ImageResult, ImageSource, ProviderError, PLACEHOLDER_STAGE,
};

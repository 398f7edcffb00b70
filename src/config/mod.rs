//! Configuration module for terragraph.
//!
//! This module handles all configuration-related functionality:
//! - Parsing `terragraph.yaml` documents and their module files
//! - Flattening documents into graph nodes
//! - Validation of declarations and interpolation syntax
//! - Computing configuration hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, VAR_ENV_PREFIX, find_config_file, parse_var,
};
pub use spec::{
    DataConfig, Document, ModuleConfig, OutputConfig, ProviderConfig, ResourceConfig,
    VariableConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};

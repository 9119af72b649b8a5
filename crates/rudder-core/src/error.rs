//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error("Invalid kubeVersion constraint '{constraint}': {message}")]
    InvalidKubeConstraint { constraint: String, message: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;

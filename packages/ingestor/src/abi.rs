//! ABI Registry
//!
//! Loads JSON contract interface descriptions and maps 4-byte method selectors
//! to the method name and its resolved parameter types.
//! Built once at startup and shared read-only afterwards.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use alloy::dyn_abi::{DynSolType, Specifier};
use alloy::json_abi::{Function, JsonAbi};
use thiserror::Error;
use tracing::{debug, info};

/// Opaque 4-byte method selector (first 4 bytes of call data)
pub type MethodSelector = [u8; 4];

/// Errors that can occur while loading an interface description
#[derive(Error, Debug)]
pub enum AbiError {
    #[error("Failed to read ABI file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed ABI JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot canonicalize parameter `{param}` of `{method}`: {reason}")]
    Signature {
        method: String,
        param: String,
        reason: String,
    },
}

/// A single method parameter with its resolved type
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    /// Declared name, `arg{index}` when the ABI leaves it empty
    pub name: String,
    /// Resolved ABI type
    pub ty: DynSolType,
}

/// Method declaration as described in the interface
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSpec {
    /// Method name (e.g., "swapExactTokensForTokens")
    pub name: String,
    /// Canonical signature (e.g., "swapExactTokensForTokens(uint256,uint256,address[],address,uint256)")
    pub signature: String,
    /// Selector derived from the canonical signature
    pub selector: MethodSelector,
    /// Parameters in declaration order
    pub params: Vec<ParamSpec>,
}

impl MethodSpec {
    /// Resolve a JSON ABI function into a method spec
    pub fn from_function(function: &Function) -> Result<Self, AbiError> {
        let params = function
            .inputs
            .iter()
            .enumerate()
            .map(|(index, param)| {
                let ty = param.resolve().map_err(|e| AbiError::Signature {
                    method: function.name.clone(),
                    param: param.name.clone(),
                    reason: e.to_string(),
                })?;
                let name = if param.name.is_empty() {
                    format!("arg{index}")
                } else {
                    param.name.clone()
                };
                Ok(ParamSpec { name, ty })
            })
            .collect::<Result<Vec<_>, AbiError>>()?;

        Ok(Self {
            name: function.name.clone(),
            signature: function.signature(),
            selector: function.selector().0,
            params,
        })
    }

    /// Get the selector as a hex string with 0x prefix
    pub fn selector_hex(&self) -> String {
        format!("0x{}", hex::encode(self.selector))
    }

    /// Parameter types in declaration order
    pub fn param_types(&self) -> impl Iterator<Item = &DynSolType> {
        self.params.iter().map(|p| &p.ty)
    }
}

/// Immutable selector → method lookup table
#[derive(Debug, Clone, Default)]
pub struct AbiRegistry {
    methods: HashMap<MethodSelector, MethodSpec>,
}

impl AbiRegistry {
    /// Build a registry from a JSON ABI string
    pub fn from_json(json: &str) -> Result<Self, AbiError> {
        let mut registry = Self::default();
        registry.extend_from_json(json)?;
        Ok(registry)
    }

    /// Load a registry from a single ABI file
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, AbiError> {
        Self::load_files([path])
    }

    /// Load and merge several ABI files into one registry
    ///
    /// A selector declared by more than one file keeps its first declaration.
    pub fn load_files<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Result<Self, AbiError> {
        let mut registry = Self::default();
        for path in paths {
            let path = path.as_ref();
            let json = fs::read_to_string(path).map_err(|source| AbiError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let added = registry.extend_from_json(&json)?;
            info!("Loaded {} methods from {}", added, path.display());
        }
        Ok(registry)
    }

    /// Add every function of a JSON ABI, returning how many were new
    fn extend_from_json(&mut self, json: &str) -> Result<usize, AbiError> {
        let abi: JsonAbi = serde_json::from_str(json)?;
        let mut added = 0;
        for function in abi.functions() {
            let spec = MethodSpec::from_function(function)?;
            if let Some(existing) = self.methods.get(&spec.selector) {
                debug!(
                    "Selector {} already registered as {}, ignoring {}",
                    spec.selector_hex(),
                    existing.signature,
                    spec.signature
                );
                continue;
            }
            self.methods.insert(spec.selector, spec);
            added += 1;
        }
        Ok(added)
    }

    /// Look up the method for a selector
    ///
    /// # Returns
    /// `Some(&MethodSpec)` if a method matches, `None` otherwise
    pub fn lookup(&self, selector: &MethodSelector) -> Option<&MethodSpec> {
        self.methods.get(selector)
    }

    /// Look up the method for the selector at the start of `call_data`
    pub fn lookup_call_data(&self, call_data: &[u8]) -> Option<&MethodSpec> {
        let selector: MethodSelector = call_data.get(..4)?.try_into().ok()?;
        self.lookup(&selector)
    }

    /// Iterate over all registered methods (unordered)
    pub fn methods(&self) -> impl Iterator<Item = &MethodSpec> {
        self.methods.values()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

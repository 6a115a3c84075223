//! Compiled contract artifacts (Hardhat or Foundry output).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::{json_abi::JsonAbi, primitives::Bytes};
use serde::Deserialize;

use crate::PlanError;

/// A contract factory: the ABI and creation bytecode of one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractFactory {
    pub name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

impl ContractFactory {
    pub fn new(name: impl Into<String>, abi: JsonAbi, bytecode: Bytes) -> Self {
        Self {
            name: name.into(),
            abi,
            bytecode,
        }
    }
}

/// Hardhat stores bytecode as a string, Foundry as `{ "object": ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    Hex(Bytes),
    Object { object: Bytes },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    contract_name: Option<String>,
    abi: JsonAbi,
    bytecode: RawBytecode,
}

/// Resolves contract factories by name.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    /// Artifact files indexed by contract name.
    paths: BTreeMap<String, PathBuf>,
    /// Factories registered in memory.
    loaded: BTreeMap<String, ContractFactory>,
}

impl ArtifactStore {
    /// Index every `<Name>.json` artifact below `dir`.
    pub fn open(dir: &Path) -> Result<Self, PlanError> {
        let mut paths = BTreeMap::new();
        index_dir(dir, &mut paths)?;
        tracing::debug!(dir = %dir.display(), artifacts = paths.len(), "Artifacts indexed");
        Ok(Self {
            paths,
            loaded: BTreeMap::new(),
        })
    }

    /// Build a store from in-memory factories.
    pub fn from_factories(factories: impl IntoIterator<Item = ContractFactory>) -> Self {
        Self {
            paths: BTreeMap::new(),
            loaded: factories
                .into_iter()
                .map(|f| (f.name.clone(), f))
                .collect(),
        }
    }

    /// Resolve a factory by contract name.
    pub fn resolve(&self, name: &str) -> Result<ContractFactory, PlanError> {
        if let Some(factory) = self.loaded.get(name) {
            return Ok(factory.clone());
        }

        let path = self
            .paths
            .get(name)
            .ok_or_else(|| PlanError::UnknownFactory(name.to_string()))?;
        let content = std::fs::read_to_string(path).map_err(|source| PlanError::Io {
            path: path.clone(),
            source,
        })?;
        let raw: RawArtifact =
            serde_json::from_str(&content).map_err(|source| PlanError::Artifact {
                path: path.clone(),
                source,
            })?;

        let bytecode = match raw.bytecode {
            RawBytecode::Hex(b) | RawBytecode::Object { object: b } => b,
        };
        if bytecode.is_empty() {
            return Err(PlanError::Invalid(format!(
                "{name} has no creation bytecode (abstract contract or interface?)"
            )));
        }

        Ok(ContractFactory::new(
            raw.contract_name.unwrap_or_else(|| name.to_string()),
            raw.abi,
            bytecode,
        ))
    }
}

fn index_dir(dir: &Path, paths: &mut BTreeMap<String, PathBuf>) -> Result<(), PlanError> {
    let entries = std::fs::read_dir(dir).map_err(|source| PlanError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let path = entry
            .map_err(|source| PlanError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();

        if path.is_dir() {
            index_dir(&path, paths)?;
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name.ends_with(".dbg.json") {
            continue;
        }
        if let Some(name) = file_name.strip_suffix(".json") {
            if let Some(previous) = paths.insert(name.to_string(), path.clone()) {
                tracing::warn!(
                    contract = name,
                    kept = %path.display(),
                    shadowed = %previous.display(),
                    "Duplicate artifact name"
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    const HARDHAT_ARTIFACT: &str = r#"{
        "_format": "hh-sol-artifact-1",
        "contractName": "Vault",
        "sourceName": "contracts/Vault.sol",
        "abi": [{"type": "function", "name": "initialize", "inputs": [{"name": "owner", "type": "address"}], "outputs": [], "stateMutability": "nonpayable"}],
        "bytecode": "0x6080604052",
        "deployedBytecode": "0x6080",
        "linkReferences": {},
        "deployedLinkReferences": {}
    }"#;

    const FOUNDRY_ARTIFACT: &str = r#"{
        "abi": [{"type": "constructor", "inputs": [{"name": "implementation", "type": "address"}, {"name": "_data", "type": "bytes"}], "stateMutability": "payable"}],
        "bytecode": {"object": "0x60806040", "sourceMap": "", "linkReferences": {}}
    }"#;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_resolves_hardhat_and_foundry() {
        let dir = TempDir::new("chainrig-artifacts").unwrap();
        write(dir.path(), "contracts/Vault.sol/Vault.json", HARDHAT_ARTIFACT);
        write(dir.path(), "contracts/Vault.sol/Vault.dbg.json", r#"{"buildInfo": "x"}"#);
        write(dir.path(), "out/ERC1967Proxy.sol/ERC1967Proxy.json", FOUNDRY_ARTIFACT);

        let store = ArtifactStore::open(dir.path()).unwrap();

        let vault = store.resolve("Vault").unwrap();
        assert_eq!(vault.name, "Vault");
        assert_eq!(vault.bytecode.as_ref(), &[0x60, 0x80, 0x60, 0x40, 0x52]);
        assert!(vault.abi.function("initialize").is_some());

        let proxy = store.resolve("ERC1967Proxy").unwrap();
        assert_eq!(proxy.name, "ERC1967Proxy");
        assert_eq!(proxy.abi.constructor().unwrap().inputs.len(), 2);
    }

    #[test]
    fn test_unknown_factory() {
        let dir = TempDir::new("chainrig-artifacts").unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.resolve("Missing"),
            Err(PlanError::UnknownFactory(n)) if n == "Missing"
        ));
    }

    #[test]
    fn test_empty_bytecode_rejected() {
        let dir = TempDir::new("chainrig-artifacts").unwrap();
        write(
            dir.path(),
            "IVault.sol/IVault.json",
            r#"{"contractName": "IVault", "abi": [], "bytecode": "0x"}"#,
        );
        let store = ArtifactStore::open(dir.path()).unwrap();
        assert!(matches!(store.resolve("IVault"), Err(PlanError::Invalid(_))));
    }

    #[test]
    fn test_missing_dir() {
        assert!(matches!(
            ArtifactStore::open(Path::new("/nonexistent/artifacts")),
            Err(PlanError::Io { .. })
        ));
    }
}

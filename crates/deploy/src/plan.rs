//! Deployment plans: the ordered list of steps for one proxy.
//!
//! A plan is written in TOML. Per-network addresses live in the plan itself,
//! keyed by network name, and are referenced from step arguments as `${name}`:
//!
//! ```toml
//! name = "usdc-vault"
//! factory = "StrategyVault"
//! proxy_kind = "uups"
//!
//! [constants]
//! max = "115792089237316195423570985008687907853269984665640564039457584007913129639935"
//!
//! [networks.base]
//! usdc = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
//!
//! [[steps]]
//! action = "deploy_proxy"
//! args = ["${usdc}", "BRT2 vault"]
//!
//! [[steps]]
//! action = "call"
//! function = "approveAllowances"
//! args = ["${max}"]
//! ```
//!
//! Plans are compiled against contract artifacts before any network I/O, so
//! every argument error surfaces before a transaction is sent.

use std::{collections::BTreeMap, path::Path};

use alloy_core::{
    dyn_abi::{DynSolValue, JsonAbiExt, Specifier},
    primitives::{Address, Bytes},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    PlanError,
    artifacts::{ArtifactStore, ContractFactory},
    config::ProxyArtifacts,
};

/// Upgradeable proxy flavours.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProxyKind {
    /// ERC-1967 proxy, upgrades driven by the implementation.
    #[default]
    Uups,
    /// Transparent proxy with a separate ProxyAdmin.
    Transparent,
}

fn default_initializer() -> String {
    "initialize".to_string()
}

/// A step as written in the plan file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanStep {
    /// Deploy the implementation and a fresh proxy, calling the initializer.
    DeployProxy {
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_initializer")]
        initializer: String,
    },
    /// Point an existing proxy at a freshly deployed implementation.
    UpgradeProxy { proxy: String },
    /// Call a function on the deployed proxy.
    Call {
        function: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// A deployment plan as written in the plan file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub name: String,
    /// Contract factory (artifact name) of the implementation.
    pub factory: String,
    #[serde(default)]
    pub proxy_kind: ProxyKind,
    /// Values shared by every network.
    #[serde(default)]
    pub constants: BTreeMap<String, String>,
    /// Per-network values, overriding `constants`.
    #[serde(default)]
    pub networks: BTreeMap<String, BTreeMap<String, String>>,
    pub steps: Vec<PlanStep>,
}

/// An ABI-encoded function call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCall {
    /// Canonical signature, e.g. `grantRole(bytes32,address)`.
    pub function: String,
    pub calldata: Bytes,
}

/// Everything needed to deploy an implementation behind a new proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyDeployment {
    pub factory: String,
    pub kind: ProxyKind,
    pub implementation_code: Bytes,
    pub proxy_code: Bytes,
    /// Initializer calldata passed to the proxy constructor; empty for none.
    pub init_data: Bytes,
}

/// Everything needed to upgrade an existing proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyUpgrade {
    pub proxy: Address,
    pub factory: String,
    pub kind: ProxyKind,
    pub implementation_code: Bytes,
}

/// A plan step with every argument resolved and encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledStep {
    DeployProxy(ProxyDeployment),
    UpgradeProxy(ProxyUpgrade),
    Call(EncodedCall),
}

impl CompiledStep {
    /// Short human-readable label used in logs and records.
    pub fn label(&self) -> String {
        match self {
            CompiledStep::DeployProxy(d) => format!("deployProxy({}, {})", d.factory, d.kind),
            CompiledStep::UpgradeProxy(u) => format!("upgradeProxy({}, {})", u.proxy, u.factory),
            CompiledStep::Call(call) => call.function.clone(),
        }
    }

    /// The name used when reporting a failing call.
    pub fn function_name(&self) -> &str {
        match self {
            CompiledStep::DeployProxy(_) => "deployProxy",
            CompiledStep::UpgradeProxy(_) => "upgradeProxy",
            CompiledStep::Call(call) => call
                .function
                .split('(')
                .next()
                .unwrap_or(&call.function),
        }
    }

    fn fingerprint_bytes(&self) -> Vec<&[u8]> {
        match self {
            CompiledStep::DeployProxy(d) => vec![
                d.implementation_code.as_ref(),
                d.proxy_code.as_ref(),
                d.init_data.as_ref(),
            ],
            CompiledStep::UpgradeProxy(u) => {
                vec![u.proxy.as_slice(), u.implementation_code.as_ref()]
            }
            CompiledStep::Call(call) => vec![call.calldata.as_ref()],
        }
    }
}

/// A plan resolved for one network and ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPlan {
    pub name: String,
    pub network: String,
    pub factory: String,
    pub proxy_kind: ProxyKind,
    pub steps: Vec<CompiledStep>,
    /// SHA-256 over every step, hex encoded.
    pub fingerprint: String,
}

impl CompiledPlan {
    /// Whether step 0 deploys a new proxy (as opposed to upgrading one).
    pub fn deploys_fresh_proxy(&self) -> bool {
        matches!(self.steps.first(), Some(CompiledStep::DeployProxy(_)))
    }
}

impl DeploymentPlan {
    /// Load a plan from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, PlanError> {
        let content = std::fs::read_to_string(path).map_err(|source| PlanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let plan: Self = toml::from_str(&content).map_err(|source| PlanError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        plan.validate()?;
        tracing::debug!(path = %path.display(), plan = %plan.name, steps = plan.steps.len(), "Plan loaded");
        Ok(plan)
    }

    /// Check the step structure: one leading deploy/upgrade, then calls only.
    pub fn validate(&self) -> Result<(), PlanError> {
        // The name becomes the record's file name.
        if self.name.trim().is_empty()
            || self.name.starts_with('.')
            || self.name.contains(['/', '\\'])
        {
            return Err(PlanError::Invalid(format!(
                "plan name {:?} must be a plain file name",
                self.name
            )));
        }

        match self.steps.first() {
            None => return Err(PlanError::Invalid("plan has no steps".to_string())),
            Some(PlanStep::Call { .. }) => {
                return Err(PlanError::Invalid(
                    "step 0 must be deploy_proxy or upgrade_proxy".to_string(),
                ));
            }
            Some(_) => {}
        }

        if let Some(index) = self
            .steps
            .iter()
            .skip(1)
            .position(|s| !matches!(s, PlanStep::Call { .. }))
        {
            return Err(PlanError::Invalid(format!(
                "step {} must be a call; only step 0 may deploy or upgrade",
                index + 1
            )));
        }

        Ok(())
    }

    /// Constants visible to `network`: shared values overridden by network values.
    pub fn constants_for(&self, network: &str) -> BTreeMap<String, String> {
        let mut constants = self.constants.clone();
        if let Some(overrides) = self.networks.get(network) {
            constants.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        constants
    }

    /// Resolve and encode every step for `network`.
    pub fn compile(
        &self,
        network: &str,
        artifacts: &ArtifactStore,
        proxies: &ProxyArtifacts,
    ) -> Result<CompiledPlan, PlanError> {
        self.validate()?;

        let factory = artifacts.resolve(&self.factory)?;
        let constants = self.constants_for(network);

        let mut steps = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            let resolve_args = |args: &[String]| -> Result<Vec<String>, PlanError> {
                args.iter()
                    .map(|arg| substitute(arg, &constants, index))
                    .collect()
            };

            let compiled = match step {
                PlanStep::DeployProxy { args, initializer } => {
                    let args = resolve_args(args)?;
                    let has_initializer = factory.abi.function(initializer).is_some();
                    let init_data = if args.is_empty() && !has_initializer {
                        Bytes::new()
                    } else {
                        encode_call(&factory, initializer, &args, index)?.calldata
                    };
                    let proxy = artifacts.resolve(proxies.for_kind(self.proxy_kind))?;

                    CompiledStep::DeployProxy(ProxyDeployment {
                        factory: factory.name.clone(),
                        kind: self.proxy_kind,
                        implementation_code: factory.bytecode.clone(),
                        proxy_code: proxy.bytecode,
                        init_data,
                    })
                }
                PlanStep::UpgradeProxy { proxy } => {
                    let proxy = substitute(proxy, &constants, index)?;
                    let proxy = proxy
                        .parse::<Address>()
                        .map_err(|e| PlanError::InvalidArgument {
                            step: index,
                            index: 0,
                            ty: "address".to_string(),
                            reason: e.to_string(),
                        })?;

                    CompiledStep::UpgradeProxy(ProxyUpgrade {
                        proxy,
                        factory: factory.name.clone(),
                        kind: self.proxy_kind,
                        implementation_code: factory.bytecode.clone(),
                    })
                }
                PlanStep::Call { function, args } => {
                    let args = resolve_args(args)?;
                    CompiledStep::Call(encode_call(&factory, function, &args, index)?)
                }
            };
            steps.push(compiled);
        }

        let fingerprint = fingerprint(&steps);
        Ok(CompiledPlan {
            name: self.name.clone(),
            network: network.to_string(),
            factory: factory.name,
            proxy_kind: self.proxy_kind,
            steps,
            fingerprint,
        })
    }
}

/// Replace every `${name}` in `input` with its constant.
fn substitute(
    input: &str,
    constants: &BTreeMap<String, String>,
    step: usize,
) -> Result<String, PlanError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| PlanError::UnresolvedPlaceholder {
                step,
                name: after.to_string(),
            })?;
        let name = after[..end].trim();
        let value = constants
            .get(name)
            .ok_or_else(|| PlanError::UnresolvedPlaceholder {
                step,
                name: name.to_string(),
            })?;
        out.push_str(value);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Encode a call to `function` on `factory`, coercing string arguments to ABI values.
fn encode_call(
    factory: &ContractFactory,
    function: &str,
    args: &[String],
    step: usize,
) -> Result<EncodedCall, PlanError> {
    let unknown = || PlanError::UnknownFunction {
        factory: factory.name.clone(),
        function: function.to_string(),
        arity: args.len(),
    };

    let func = factory
        .abi
        .function(function)
        .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == args.len()))
        .ok_or_else(unknown)?;

    let values = func
        .inputs
        .iter()
        .zip(args)
        .enumerate()
        .map(|(index, (param, arg))| {
            let invalid = |reason: String| PlanError::InvalidArgument {
                step,
                index,
                ty: param.selector_type().into_owned(),
                reason,
            };
            let ty = param.resolve().map_err(|e| invalid(e.to_string()))?;
            ty.coerce_str(arg).map_err(|e| invalid(e.to_string()))
        })
        .collect::<Result<Vec<DynSolValue>, PlanError>>()?;

    let calldata = func
        .abi_encode_input(&values)
        .map_err(|e| PlanError::Invalid(format!("step {step}: {e}")))?;

    Ok(EncodedCall {
        function: func.signature(),
        calldata: calldata.into(),
    })
}

fn fingerprint(steps: &[CompiledStep]) -> String {
    let mut hasher = Sha256::new();
    for step in steps {
        hasher.update(step.label().as_bytes());
        for bytes in step.fingerprint_bytes() {
            hasher.update([0u8]);
            hasher.update(bytes);
        }
        hasher.update([0xffu8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::json_abi::JsonAbi;

    const PLAN: &str = r#"
        name = "usdc-vault"
        factory = "StrategyVault"
        proxy_kind = "uups"

        [constants]
        owner = "0x4e3DA49cc22694D53F4a71e4d4BfdFB2BF272887"
        owner_role = "0x4f574e45525f524f4c4500000000000000000000000000000000000000000000"
        max = "115792089237316195423570985008687907853269984665640564039457584007913129639935"
        usdc = "0x0000000000000000000000000000000000000001"

        [networks.base]
        usdc = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
        weth = "0x4200000000000000000000000000000000000006"
        pool = "0x420DD381b31aEf6683db6B902084cB0FFECe40Da"

        [[steps]]
        action = "deploy_proxy"
        args = ["${usdc}", "${owner}", "BRT2: moonwell USDC"]

        [[steps]]
        action = "call"
        function = "initRoutes"
        args = ["[(${weth},${usdc},false,${pool})]"]

        [[steps]]
        action = "call"
        function = "updateFeeBips"
        args = ["[100000000000000,500,100,10]"]

        [[steps]]
        action = "call"
        function = "grantRole"
        args = ["${owner_role}", "${owner}"]

        [[steps]]
        action = "call"
        function = "approveAllowances"
        args = ["${max}"]
    "#;

    fn artifacts() -> ArtifactStore {
        let vault_abi = JsonAbi::parse([
            "function initialize(address asset, address governor, string name)",
            "function initRoutes((address,address,bool,address)[] routes)",
            "function updateFeeBips(uint256[] fees)",
            "function grantRole(bytes32 role, address account)",
            "function approveAllowances(uint256 amount)",
        ])
        .unwrap();
        let proxy_abi =
            JsonAbi::parse(["constructor(address implementation, bytes data)"]).unwrap();

        ArtifactStore::from_factories([
            ContractFactory::new("StrategyVault", vault_abi, Bytes::from_static(&[0x60, 0x80])),
            ContractFactory::new("ERC1967Proxy", proxy_abi, Bytes::from_static(&[0x60, 0x40])),
        ])
    }

    fn plan() -> DeploymentPlan {
        let plan: DeploymentPlan = toml::from_str(PLAN).unwrap();
        plan.validate().unwrap();
        plan
    }

    #[test]
    fn test_network_constants_override_shared() {
        let constants = plan().constants_for("base");
        assert_eq!(
            constants["usdc"],
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
        );
        assert_eq!(
            plan().constants_for("sepolia")["usdc"],
            "0x0000000000000000000000000000000000000001"
        );
    }

    #[test]
    fn test_compile_for_network() {
        let compiled = plan()
            .compile("base", &artifacts(), &ProxyArtifacts::default())
            .unwrap();

        assert_eq!(compiled.steps.len(), 5);
        assert!(compiled.deploys_fresh_proxy());
        assert_eq!(compiled.fingerprint.len(), 64);

        let CompiledStep::DeployProxy(deploy) = &compiled.steps[0] else {
            panic!("step 0 should deploy");
        };
        assert_eq!(deploy.implementation_code.as_ref(), &[0x60, 0x80]);
        assert_eq!(deploy.proxy_code.as_ref(), &[0x60, 0x40]);
        assert!(!deploy.init_data.is_empty());

        let labels: Vec<_> = compiled.steps.iter().map(|s| s.function_name().to_string()).collect();
        assert_eq!(
            labels,
            ["deployProxy", "initRoutes", "updateFeeBips", "grantRole", "approveAllowances"]
        );

        let CompiledStep::Call(grant) = &compiled.steps[3] else {
            panic!("step 3 should be a call");
        };
        assert_eq!(grant.function, "grantRole(bytes32,address)");
        assert_eq!(&grant.calldata[..4], &[0x2f, 0x2f, 0xf1, 0x5d]);
        assert_eq!(grant.calldata.len(), 4 + 32 * 2);
    }

    #[test]
    fn test_fingerprint_depends_on_network_constants() {
        let a = plan().compile("base", &artifacts(), &ProxyArtifacts::default()).unwrap();
        let b = plan().compile("base", &artifacts(), &ProxyArtifacts::default()).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);

        let mut other = plan();
        other
            .networks
            .get_mut("base")
            .unwrap()
            .insert("usdc".to_string(), "0x0000000000000000000000000000000000000002".to_string());
        let c = other.compile("base", &artifacts(), &ProxyArtifacts::default()).unwrap();
        assert_ne!(a.fingerprint, c.fingerprint);
    }

    #[test]
    fn test_unresolved_placeholder() {
        // `weth` only exists for base.
        let err = plan()
            .compile("sepolia", &artifacts(), &ProxyArtifacts::default())
            .unwrap_err();
        assert!(matches!(
            err,
            PlanError::UnresolvedPlaceholder { step: 1, ref name } if name == "weth"
        ));
    }

    #[test]
    fn test_unknown_function() {
        let mut plan = plan();
        plan.steps.push(PlanStep::Call {
            function: "grantRole".to_string(),
            args: vec!["0x00".to_string()],
        });
        let err = plan
            .compile("base", &artifacts(), &ProxyArtifacts::default())
            .unwrap_err();
        assert!(matches!(err, PlanError::UnknownFunction { arity: 1, .. }));
    }

    #[test]
    fn test_invalid_argument() {
        let mut plan = plan();
        plan.steps.push(PlanStep::Call {
            function: "approveAllowances".to_string(),
            args: vec!["not-a-number".to_string()],
        });
        let err = plan
            .compile("base", &artifacts(), &ProxyArtifacts::default())
            .unwrap_err();
        assert!(matches!(
            err,
            PlanError::InvalidArgument { step: 5, index: 0, .. }
        ));
    }

    #[test]
    fn test_missing_proxy_artifact() {
        let proxies = ProxyArtifacts {
            uups: "MissingProxy".to_string(),
            ..Default::default()
        };
        let err = plan().compile("base", &artifacts(), &proxies).unwrap_err();
        assert!(matches!(err, PlanError::UnknownFactory(n) if n == "MissingProxy"));
    }

    #[test]
    fn test_upgrade_plan() {
        let plan: DeploymentPlan = toml::from_str(
            r#"
            name = "usdc-vault"
            factory = "StrategyVault"

            [networks.base]
            vault = "0xF32D39ff9f6Aa7a7A64d7a4F00a54826Ef791a55"

            [[steps]]
            action = "upgrade_proxy"
            proxy = "${vault}"
            "#,
        )
        .unwrap();

        let compiled = plan
            .compile("base", &artifacts(), &ProxyArtifacts::default())
            .unwrap();
        assert!(!compiled.deploys_fresh_proxy());
        let CompiledStep::UpgradeProxy(upgrade) = &compiled.steps[0] else {
            panic!("step 0 should upgrade");
        };
        assert_eq!(upgrade.kind, ProxyKind::Uups);
        assert_eq!(
            upgrade.proxy.to_string().to_lowercase(),
            "0xf32d39ff9f6aa7a7a64d7a4f00a54826ef791a55"
        );
    }

    #[test]
    fn test_validate_structure() {
        let mut plan = plan();
        plan.steps.swap(0, 1);
        assert!(matches!(plan.validate(), Err(PlanError::Invalid(_))));

        let mut plan = self::plan();
        plan.steps.push(PlanStep::UpgradeProxy {
            proxy: "0x0000000000000000000000000000000000000001".to_string(),
        });
        assert!(matches!(plan.validate(), Err(PlanError::Invalid(_))));

        let mut plan = self::plan();
        plan.steps.clear();
        assert!(matches!(plan.validate(), Err(PlanError::Invalid(_))));
    }

    #[test]
    fn test_name_must_be_a_file_name() {
        for name in ["../x", "a/b", "..\\x", ".hidden", " "] {
            let mut plan = plan();
            plan.name = name.to_string();
            assert!(
                matches!(plan.validate(), Err(PlanError::Invalid(ref reason)) if reason.contains("plain file name")),
                "{name:?} accepted"
            );
        }

        let mut plan = plan();
        plan.name = "usdc-vault.v2".to_string();
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_substitute() {
        let constants = BTreeMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
        assert_eq!(substitute("[${a},${ b }]", &constants, 0).unwrap(), "[1,2]");
        assert_eq!(substitute("plain", &constants, 0).unwrap(), "plain");
        assert!(substitute("${a", &constants, 0).is_err());
        assert!(substitute("${c}", &constants, 0).is_err());
    }

    #[test]
    fn test_shipped_plan() {
        let plan: DeploymentPlan =
            toml::from_str(include_str!("../../../plans/moonwell-usdc-vault.toml")).unwrap();
        plan.validate().unwrap();

        assert_eq!(plan.factory, "MoonwellFlagshipStrategyVault");
        assert_eq!(plan.steps.len(), 6);
        assert!(matches!(
            &plan.steps[0],
            PlanStep::DeployProxy { args, initializer } if args.len() == 5 && initializer == "initialize"
        ));
        assert_eq!(
            plan.constants_for("base")["usdc"],
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
        );
    }

    #[test]
    fn test_proxy_kind_parsing() {
        assert_eq!("uups".parse::<ProxyKind>().unwrap(), ProxyKind::Uups);
        assert_eq!(ProxyKind::Transparent.to_string(), "transparent");
        assert!("beacon".parse::<ProxyKind>().is_err());
    }
}

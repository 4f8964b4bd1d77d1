//! Lifecycle hook scripts.
//!
//! Scripts live in the confbase and receive their context as environment
//! variables. A missing script is skipped; a failing one is logged and
//! otherwise ignored.
//!
//! | Script        | When                               | Extra variables       |
//! |---------------|------------------------------------|-----------------------|
//! | `mesh-up`     | device is up                       |                       |
//! | `mesh-down`   | network torn down                  |                       |
//! | `subnet-up`   | a subnet becomes reachable         | `NODE SUBNET WEIGHT`  |
//! | `subnet-down` | a subnet goes away                 | `NODE SUBNET WEIGHT`  |

use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, info, warn};

use crate::node::Node;

pub const HOOK_UP: &str = "mesh-up";
pub const HOOK_DOWN: &str = "mesh-down";
pub const SUBNET_UP: &str = "subnet-up";
pub const SUBNET_DOWN: &str = "subnet-down";

/// Extra context for `subnet-up` / `subnet-down`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetVars {
    pub node: String,
    pub subnet: String,
    pub weight: u32,
}

/// Environment handed to every hook. The four base variables are always
/// exported, as empty strings when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookEnv {
    pub netname: Option<String>,
    pub device: Option<String>,
    pub interface: Option<String>,
    pub name: String,
    pub subnet: Option<SubnetVars>,
}

impl HookEnv {
    pub fn vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            ("NETNAME", self.netname.clone().unwrap_or_default()),
            ("DEVICE", self.device.clone().unwrap_or_default()),
            ("INTERFACE", self.interface.clone().unwrap_or_default()),
            ("NAME", self.name.clone()),
        ];
        if let Some(s) = &self.subnet {
            vars.push(("NODE", s.node.clone()));
            vars.push(("SUBNET", s.subnet.clone()));
            vars.push(("WEIGHT", s.weight.to_string()));
        }
        vars
    }

    pub fn with_subnet(&self, subnet: SubnetVars) -> Self {
        Self { subnet: Some(subnet), ..self.clone() }
    }
}

/// Runs a named hook. Failures never propagate to the caller.
pub trait ScriptRunner: Send {
    fn execute(&self, script: &str, env: &HookEnv);
}

/// Runs `<dir>/<script>` as a child process and waits for it.
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    dir: PathBuf,
}

impl ScriptExecutor {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ScriptRunner for ScriptExecutor {
    fn execute(&self, script: &str, env: &HookEnv) {
        let path = self.dir.join(script);
        if !path.exists() {
            debug!(script, "hook script not present, skipping");
            return;
        }

        info!(script, "Executing script");
        match Command::new(&path).envs(env.vars()).status() {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(script, %status, "script exited unsuccessfully"),
            Err(e) => warn!(script, error = %e, "could not execute script"),
        }
    }
}

/// Announce every subnet of `node` as up or down.
pub fn subnet_update(runner: &dyn ScriptRunner, env: &HookEnv, node: &Node, up: bool) {
    let script = if up { SUBNET_UP } else { SUBNET_DOWN };
    for subnet in node.subnets() {
        let vars = SubnetVars {
            node: node.name.clone(),
            subnet: subnet.range.to_string(),
            weight: subnet.weight,
        };
        runner.execute(script, &env.with_subnet(vars));
    }
}

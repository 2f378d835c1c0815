//! Workload command rendering.
//!
//! Both roles run a script as `bash <script> <bandwidth> <delay> <path>` from
//! their working directory. Only exit status and stdout are observed.

use crate::config::{Config, RoleConfig};
use crate::remote::RemoteTarget;
use crate::shaping::ShapingConfig;
use crate::types::{ParameterSet, Role};

/// One role's target and script.
#[derive(Debug, Clone)]
pub struct RoleSpec {
    /// Which role.
    pub role: Role,
    /// Machine the script runs on.
    pub target: RemoteTarget,
    /// Directory the script runs from.
    pub workdir: String,
    /// Script name.
    pub script: String,
    /// Pattern the reaper kills.
    pub identifier: String,
}

impl RoleSpec {
    /// Build a role from its target and `[server]`/`[client]` section.
    pub fn new(role: Role, target: RemoteTarget, config: &RoleConfig) -> Self {
        Self {
            role,
            target,
            workdir: config.workdir.clone(),
            script: config.script.clone(),
            identifier: config.workload_identifier().to_string(),
        }
    }
}

/// The paired workload: both roles plus network shaping.
#[derive(Debug, Clone)]
pub struct Workloads {
    /// Server role.
    pub server: RoleSpec,
    /// Client role.
    pub client: RoleSpec,
    /// Network-condition control.
    pub shaping: ShapingConfig,
}

impl Workloads {
    /// Build from a loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            server: RoleSpec::new(Role::Server, config.targets.server.clone(), &config.server),
            client: RoleSpec::new(Role::Client, config.targets.client.clone(), &config.client),
            shaping: config.shaping.clone(),
        }
    }

    /// Target and script for `role`.
    pub fn spec(&self, role: Role) -> &RoleSpec {
        match role {
            Role::Server => &self.server,
            Role::Client => &self.client,
        }
    }

    /// Render `role`'s command for one attempt of `set`.
    pub fn command(&self, role: Role, set: &ParameterSet, attempt: u32) -> String {
        let spec = self.spec(role);
        let path = match role {
            Role::Server => set.server_output_path(attempt),
            Role::Client => set.client_input_file.clone(),
        };

        let mut parts = vec![format!("cd {}", shell_quote(&spec.workdir))];
        if self.shaping.applies_to(role) {
            if let Some(shaping) = self.shaping.command(&set.bandwidth, &set.delay) {
                parts.push(shaping);
            }
        }
        parts.push(format!(
            "bash {} {} {} {}",
            shell_quote(&spec.script),
            shell_quote(&set.bandwidth),
            shell_quote(&set.delay),
            shell_quote(&path)
        ));
        parts.join(" && ")
    }
}

/// Quote `s` for a POSIX shell unless it is made only of safe characters.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,~".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaping::ShapingTool;

    fn workloads() -> Workloads {
        let role = |script: &str| RoleConfig {
            workdir: "/vagrant/foggytcp".into(),
            script: script.into(),
            reap_pattern: None,
        };
        Workloads {
            server: RoleSpec::new(Role::Server, RemoteTarget::new("server"), &role("ServerScript.sh")),
            client: RoleSpec::new(Role::Client, RemoteTarget::new("client"), &role("ClientScript.sh")),
            shaping: ShapingConfig::default(),
        }
    }

    fn set() -> ParameterSet {
        ParameterSet {
            name: "t1".into(),
            bandwidth: "10Mbps".into(),
            delay: "1ms".into(),
            server_output_prefix: "/vagrant/foggytcp/server_output1".into(),
            client_input_file: "/vagrant/foggytcp/testfile/file_1.txt".into(),
        }
    }

    #[test]
    fn server_command_uses_attempt_output_path() {
        let cmd = workloads().command(Role::Server, &set(), 2);
        assert_eq!(
            cmd,
            "cd /vagrant/foggytcp && bash ServerScript.sh 10Mbps 1ms /vagrant/foggytcp/server_output1_2.out"
        );
    }

    #[test]
    fn client_command_carries_shaping() {
        let cmd = workloads().command(Role::Client, &set(), 1);
        assert_eq!(
            cmd,
            "cd /vagrant/foggytcp && sudo tcset enp0s8 --rate 10Mbps --delay 1ms --overwrite \
             && bash ClientScript.sh 10Mbps 1ms /vagrant/foggytcp/testfile/file_1.txt"
        );
    }

    #[test]
    fn shaping_moves_to_server() {
        let mut w = workloads();
        w.shaping = ShapingConfig::default()
            .on(Role::Server)
            .tool(ShapingTool::Netem);
        let server = w.command(Role::Server, &set(), 1);
        let client = w.command(Role::Client, &set(), 1);
        assert!(server.contains("sudo tc qdisc replace dev enp0s8 root netem delay 1ms rate 10Mbps"));
        assert!(!client.contains("netem"));
    }

    #[test]
    fn identifier_defaults_to_script() {
        let w = workloads();
        assert_eq!(w.spec(Role::Server).identifier, "ServerScript.sh");
        assert_eq!(w.spec(Role::Client).identifier, "ClientScript.sh");
    }

    #[test]
    fn shell_quote_cases() {
        assert_eq!(shell_quote("file_1.txt"), "file_1.txt");
        assert_eq!(shell_quote("my file"), "'my file'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}

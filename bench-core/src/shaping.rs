//! Network-condition command builder.
//!
//! Renders the traffic-control command that is chained in front of one
//! role's workload. Bandwidth and delay strings are passed through as given;
//! their unit syntax is whatever the chosen tool accepts.

use serde::Deserialize;

use crate::types::Role;
use crate::workload::shell_quote;

/// Which traffic-control tool renders the command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapingTool {
    /// `tcset <iface> --rate <bw> --delay <delay> --overwrite` (tcconfig).
    #[default]
    Tcset,
    /// `tc qdisc replace dev <iface> root netem delay <delay> rate <bw>` (iproute2).
    Netem,
}

/// Network-condition control for one role.
#[derive(Debug, Clone, Deserialize)]
pub struct ShapingConfig {
    /// Apply shaping at all (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Role whose command carries the shaping prefix (default: client).
    #[serde(default = "default_role")]
    pub role: Role,
    /// Interface to shape (default: `enp0s8`).
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Tool used to render the command.
    #[serde(default)]
    pub tool: ShapingTool,
    /// Prefix with `sudo` (default: true).
    #[serde(default = "default_sudo")]
    pub sudo: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_role() -> Role {
    Role::Client
}

fn default_interface() -> String {
    "enp0s8".to_string()
}

fn default_sudo() -> bool {
    true
}

impl Default for ShapingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            role: default_role(),
            interface: default_interface(),
            tool: ShapingTool::default(),
            sudo: default_sudo(),
        }
    }
}

impl ShapingConfig {
    /// Create a config for the given interface with defaults otherwise.
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.into(),
            ..Default::default()
        }
    }

    /// Set the role that carries the prefix.
    pub fn on(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Set the rendering tool.
    pub fn tool(mut self, tool: ShapingTool) -> Self {
        self.tool = tool;
        self
    }

    /// Enable or disable `sudo`.
    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// Whether `role`'s command gets the prefix.
    pub fn applies_to(&self, role: Role) -> bool {
        self.enabled && self.role == role
    }

    /// Build the shaping command, or `None` when shaping is disabled.
    pub fn command(&self, bandwidth: &str, delay: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }

        let iface = shell_quote(&self.interface);
        let bandwidth = shell_quote(bandwidth);
        let delay = shell_quote(delay);
        let body = match self.tool {
            ShapingTool::Tcset => format!(
                "tcset {} --rate {} --delay {} --overwrite",
                iface, bandwidth, delay
            ),
            ShapingTool::Netem => format!(
                "tc qdisc replace dev {} root netem delay {} rate {}",
                iface, delay, bandwidth
            ),
        };

        Some(if self.sudo {
            format!("sudo {}", body)
        } else {
            body
        })
    }
}

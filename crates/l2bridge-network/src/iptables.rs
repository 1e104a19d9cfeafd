//! Packet filter rule programming.
//!
//! The driver only ever programs rules through [`PacketFilter`]. The
//! [`Iptables`] implementation shells out to the `iptables` binary.

use std::fmt;
use std::process::Command;
use std::sync::Arc;

use l2bridge_common::{DriverError, DriverResult};
use parking_lot::Mutex;

/// Callback run after the host's packet filter has been reset.
pub type ReloadHook = Arc<dyn Fn() + Send + Sync>;

/// iptables table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    /// The `filter` table.
    Filter,
    /// The `nat` table.
    Nat,
}

impl Table {
    /// Table name as passed to iptables.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Nat => "nat",
        }
    }
}

/// How a rule is programmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Append at the end of the chain.
    Append,
    /// Insert at the head of the chain.
    Insert,
    /// Remove the rule.
    Delete,
}

impl Action {
    /// iptables flag for this action.
    #[must_use]
    pub const fn flag(self) -> &'static str {
        match self {
            Self::Append => "-A",
            Self::Insert => "-I",
            Self::Delete => "-D",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag())
    }
}

/// Capability to program packet filter rules.
pub trait PacketFilter: Send + Sync {
    /// Program a rule. Appending an existing rule or deleting a missing one
    /// is a no-op.
    fn program_rule(
        &self,
        table: Table,
        chain: &str,
        action: Action,
        rule: &[String],
    ) -> DriverResult<()>;

    /// Register a hook to run when the packet filter is reloaded.
    fn on_reloaded(&self, hook: ReloadHook);

    /// Run every registered reload hook.
    fn reloaded(&self);
}

/// `iptables` command backed packet filter.
#[derive(Default)]
pub struct Iptables {
    hooks: Mutex<Vec<ReloadHook>>,
}

impl Iptables {
    /// Create a new iptables filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn exists(table: Table, chain: &str, rule: &[String]) -> bool {
        let mut args = vec!["-t", table.as_str(), "-C", chain];
        args.extend(rule.iter().map(String::as_str));
        Command::new("iptables")
            .args(&args)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

impl fmt::Debug for Iptables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iptables")
            .field("hooks", &self.hooks.lock().len())
            .finish()
    }
}

impl PacketFilter for Iptables {
    fn program_rule(
        &self,
        table: Table,
        chain: &str,
        action: Action,
        rule: &[String],
    ) -> DriverResult<()> {
        if Self::exists(table, chain, rule) != (action == Action::Delete) {
            return Ok(());
        }

        let mut args = vec!["-t", table.as_str(), action.flag(), chain];
        args.extend(rule.iter().map(String::as_str));
        run_iptables(&args)
    }

    fn on_reloaded(&self, hook: ReloadHook) {
        self.hooks.lock().push(hook);
    }

    fn reloaded(&self) {
        let hooks = self.hooks.lock().clone();
        tracing::info!(hooks = hooks.len(), "Packet filter reloaded, reapplying rules");
        for hook in hooks {
            hook();
        }
    }
}

/// Run an iptables command.
fn run_iptables(args: &[&str]) -> DriverResult<()> {
    let output = Command::new("iptables")
        .args(args)
        .output()
        .map_err(|e| DriverError::internal(format!("Failed to execute iptables: {e}")))?;

    if !output.status.success() {
        return Err(DriverError::internal(format!(
            "iptables {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(())
}

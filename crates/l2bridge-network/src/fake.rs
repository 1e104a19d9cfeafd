//! In-memory kernel fakes for exercising the driver without privileges.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use ipnet::IpNet;
use l2bridge_common::{DriverError, DriverResult};
use parking_lot::Mutex;

use crate::iptables::{Action, PacketFilter, ReloadHook, Table};
use crate::links::{AddressFamily, KernelLinks, Link, LinkKind};
use crate::mac::MacAddress;
use crate::netns::NamespaceGuard;
use crate::sysctl::SysctlTree;

/// A [`KernelLinks`] operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `link_by_name`.
    LinkByName,
    /// `add_bridge`.
    AddBridge,
    /// `add_veth`.
    AddVeth,
    /// `delete_link`.
    DeleteLink,
    /// `set_mtu`.
    SetMtu,
    /// `set_master`.
    SetMaster,
    /// `set_hardware_addr`.
    SetHardwareAddr,
    /// `set_up`.
    SetUp,
    /// `set_hairpin`.
    SetHairpin,
    /// `addresses`.
    Addresses,
}

/// State of one fake link.
#[derive(Debug, Clone)]
pub struct FakeLink {
    /// The link as reported to callers.
    pub link: Link,
    /// Configured MTU.
    pub mtu: u32,
    /// Index of the bridge this link is attached to.
    pub master: Option<u32>,
    /// Hairpin mode.
    pub hairpin: bool,
    /// Hardware address, when one was set.
    pub mac: Option<MacAddress>,
    /// Other end of a veth pair.
    pub peer: Option<String>,
    /// Configured addresses.
    pub addresses: Vec<IpNet>,
}

#[derive(Default)]
struct FakeState {
    next_index: u32,
    links: BTreeMap<String, FakeLink>,
    // `None` fails every call, `Some(name)` only calls on that link
    failures: HashMap<FailPoint, Option<String>>,
}

impl FakeState {
    fn check(&self, point: FailPoint, name: &str) -> DriverResult<()> {
        match self.failures.get(&point) {
            Some(None) => Err(injected(point, name)),
            Some(Some(target)) if target == name => Err(injected(point, name)),
            _ => Ok(()),
        }
    }

    fn insert(&mut self, name: &str, kind: LinkKind, peer: Option<String>) -> Link {
        self.next_index += 1;
        let link = Link {
            index: self.next_index,
            name: name.to_string(),
            kind,
            up: false,
        };
        self.links.insert(
            name.to_string(),
            FakeLink {
                link: link.clone(),
                mtu: 1500,
                master: None,
                hairpin: false,
                mac: None,
                peer,
                addresses: Vec::new(),
            },
        );
        link
    }

    fn get_mut(&mut self, name: &str) -> DriverResult<&mut FakeLink> {
        self.links
            .get_mut(name)
            .ok_or_else(|| DriverError::internal(format!("{name}: No such device")))
    }
}

fn injected(point: FailPoint, name: &str) -> DriverError {
    DriverError::internal(format!("injected {point:?} failure on {name}"))
}

/// In-memory link table implementing [`KernelLinks`].
#[derive(Default)]
pub struct FakeLinks {
    state: Mutex<FakeState>,
    active_contexts: Arc<AtomicUsize>,
    sysctl: Option<SysctlTree>,
}

impl FakeLinks {
    /// Create an empty link table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a link table that mirrors new bridges into a sysctl tree,
    /// the way the kernel creates `net/ipv6/conf/<bridge>` entries.
    #[must_use]
    pub fn with_sysctl(sysctl: SysctlTree) -> Self {
        Self {
            sysctl: Some(sysctl),
            ..Self::default()
        }
    }

    /// Make every call of `point` fail.
    pub fn fail_on(&self, point: FailPoint) {
        self.state.lock().failures.insert(point, None);
    }

    /// Make calls of `point` fail for the link named `name`.
    pub fn fail_on_link(&self, point: FailPoint, name: &str) {
        self.state
            .lock()
            .failures
            .insert(point, Some(name.to_string()));
    }

    /// Remove every injected failure.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Add a link directly, bypassing failure injection.
    pub fn insert_link(&self, name: &str, kind: LinkKind) -> Link {
        self.state.lock().insert(name, kind, None)
    }

    /// Configure an address on an existing link.
    pub fn add_address(&self, name: &str, addr: IpNet) {
        if let Some(link) = self.state.lock().links.get_mut(name) {
            link.addresses.push(addr);
        }
    }

    /// Snapshot of a link.
    #[must_use]
    pub fn link(&self, name: &str) -> Option<FakeLink> {
        self.state.lock().links.get(name).cloned()
    }

    /// Whether a link exists.
    #[must_use]
    pub fn has_link(&self, name: &str) -> bool {
        self.state.lock().links.contains_key(name)
    }

    /// Names of all links, sorted.
    #[must_use]
    pub fn link_names(&self) -> Vec<String> {
        self.state.lock().links.keys().cloned().collect()
    }

    /// Number of namespace contexts currently held.
    #[must_use]
    pub fn active_contexts(&self) -> usize {
        self.active_contexts.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for FakeLinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeLinks")
            .field("links", &self.link_names())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KernelLinks for FakeLinks {
    async fn link_by_name(&self, name: &str) -> DriverResult<Option<Link>> {
        let state = self.state.lock();
        state.check(FailPoint::LinkByName, name)?;
        Ok(state.links.get(name).map(|l| l.link.clone()))
    }

    async fn add_bridge(&self, name: &str) -> DriverResult<Link> {
        let link = {
            let mut state = self.state.lock();
            state.check(FailPoint::AddBridge, name)?;
            if state.links.contains_key(name) {
                return Err(DriverError::internal(format!("{name}: File exists")));
            }
            state.insert(name, LinkKind::Bridge, None)
        };

        if let Some(sysctl) = &self.sysctl {
            let param = sysctl.path(&SysctlTree::disable_ipv6_param(name));
            if let Some(parent) = param.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(param, b"0\n")?;
        }
        Ok(link)
    }

    async fn add_veth(&self, name: &str, peer: &str) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.check(FailPoint::AddVeth, name)?;
        if state.links.contains_key(name) || state.links.contains_key(peer) {
            return Err(DriverError::internal(format!("{name}: File exists")));
        }
        state.insert(name, LinkKind::Veth, Some(peer.to_string()));
        state.insert(peer, LinkKind::Veth, Some(name.to_string()));
        Ok(())
    }

    async fn delete_link(&self, link: &Link) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.check(FailPoint::DeleteLink, &link.name)?;
        if let Some(removed) = state.links.remove(&link.name) {
            if let Some(peer) = removed.peer {
                state.links.remove(&peer);
            }
        }
        Ok(())
    }

    async fn set_mtu(&self, link: &Link, mtu: u32) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.check(FailPoint::SetMtu, &link.name)?;
        state.get_mut(&link.name)?.mtu = mtu;
        Ok(())
    }

    async fn set_master(&self, link: &Link, bridge: &Link) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.check(FailPoint::SetMaster, &link.name)?;
        let is_bridge = state
            .links
            .get(&bridge.name)
            .is_some_and(|b| b.link.is_bridge());
        if !is_bridge {
            return Err(DriverError::internal(format!(
                "{}: not a bridge device",
                bridge.name
            )));
        }
        state.get_mut(&link.name)?.master = Some(bridge.index);
        Ok(())
    }

    async fn set_hardware_addr(&self, link: &Link, mac: MacAddress) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.check(FailPoint::SetHardwareAddr, &link.name)?;
        state.get_mut(&link.name)?.mac = Some(mac);
        Ok(())
    }

    async fn set_up(&self, link: &Link) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.check(FailPoint::SetUp, &link.name)?;
        state.get_mut(&link.name)?.link.up = true;
        Ok(())
    }

    async fn set_hairpin(&self, link: &Link, enable: bool) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.check(FailPoint::SetHairpin, &link.name)?;
        state.get_mut(&link.name)?.hairpin = enable;
        Ok(())
    }

    async fn addresses(&self, link: &Link, family: AddressFamily) -> DriverResult<Vec<IpNet>> {
        let mut state = self.state.lock();
        state.check(FailPoint::Addresses, &link.name)?;
        let fake = state.get_mut(&link.name)?;
        Ok(fake
            .addresses
            .iter()
            .filter(|net| match family {
                AddressFamily::V4 => net.addr().is_ipv4(),
                AddressFamily::V6 => net.addr().is_ipv6(),
            })
            .copied()
            .collect())
    }

    fn enter_host_namespace(&self) -> DriverResult<NamespaceGuard> {
        self.active_contexts.fetch_add(1, Ordering::SeqCst);
        let active = Arc::clone(&self.active_contexts);
        Ok(NamespaceGuard::new(move || {
            active.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}

/// A rule as recorded by [`RecordingFilter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgrammedRule {
    /// Table the rule lives in.
    pub table: Table,
    /// Chain the rule lives in.
    pub chain: String,
    /// Rule arguments.
    pub rule: Vec<String>,
}

/// In-memory packet filter that records the rule set.
#[derive(Default)]
pub struct RecordingFilter {
    rules: Mutex<Vec<ProgrammedRule>>,
    hooks: Mutex<Vec<ReloadHook>>,
    fail: Mutex<bool>,
}

impl RecordingFilter {
    /// Create an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules currently installed.
    #[must_use]
    pub fn rules(&self) -> Vec<ProgrammedRule> {
        self.rules.lock().clone()
    }

    /// Number of registered reload hooks.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.hooks.lock().len()
    }

    /// Make every subsequent `program_rule` call fail.
    pub fn fail_programming(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    /// Simulate an external flush of the whole rule set.
    pub fn flush(&self) {
        self.rules.lock().clear();
    }
}

impl fmt::Debug for RecordingFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingFilter")
            .field("rules", &*self.rules.lock())
            .finish_non_exhaustive()
    }
}

impl PacketFilter for RecordingFilter {
    fn program_rule(
        &self,
        table: Table,
        chain: &str,
        action: Action,
        rule: &[String],
    ) -> DriverResult<()> {
        if *self.fail.lock() {
            return Err(DriverError::internal(format!(
                "iptables -t {} {action} {chain} failed",
                table.as_str()
            )));
        }

        let programmed = ProgrammedRule {
            table,
            chain: chain.to_string(),
            rule: rule.to_vec(),
        };
        let mut rules = self.rules.lock();
        let existing = rules.iter().position(|r| *r == programmed);
        match (action, existing) {
            (Action::Delete, Some(idx)) => {
                rules.remove(idx);
            }
            (Action::Append, None) => rules.push(programmed),
            (Action::Insert, None) => rules.insert(0, programmed),
            _ => {}
        }
        Ok(())
    }

    fn on_reloaded(&self, hook: ReloadHook) {
        self.hooks.lock().push(hook);
    }

    fn reloaded(&self) {
        let hooks = self.hooks.lock().clone();
        for hook in hooks {
            hook();
        }
    }
}

//! Hierarchical node address: the primary key for every node in the
//! simulator tree and the routing key on the pub/sub bus.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address construction failed the parent-before-child hierarchy rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressError(pub String);

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for AddressError {}

/// Identifies a Network, Hub, Access Point or Remote Terminal.
///
/// A field may only be populated if every shallower field is also populated
/// (net → hub → ap → rt). The derived `tag` is the canonical wire/routing
/// form and is what equality, hashing and ordering are based on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawAddress", into = "RawAddress")]
pub struct Address {
    net: Option<u32>,
    hub: Option<u32>,
    ap: Option<u32>,
    rt: Option<u32>,
    tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawAddress {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    net: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    hub: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    ap: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    rt: Option<u32>,
}

impl TryFrom<RawAddress> for Address {
    type Error = AddressError;

    fn try_from(raw: RawAddress) -> Result<Self, Self::Error> {
        Address::new(raw.net, raw.hub, raw.ap, raw.rt)
    }
}

impl From<Address> for RawAddress {
    fn from(a: Address) -> Self {
        RawAddress {
            net: a.net,
            hub: a.hub,
            ap: a.ap,
            rt: a.rt,
        }
    }
}

impl Address {
    /// Constructs and validates an address. Fails if a deeper field is
    /// populated while a shallower one is not.
    pub fn new(
        net: Option<u32>,
        hub: Option<u32>,
        ap: Option<u32>,
        rt: Option<u32>,
    ) -> Result<Self, AddressError> {
        if hub.is_some() && net.is_none() {
            return Err(AddressError("hub set without net".into()));
        }
        if ap.is_some() && hub.is_none() {
            return Err(AddressError("ap set without hub".into()));
        }
        if rt.is_some() && ap.is_none() {
            return Err(AddressError("rt set without ap".into()));
        }
        let tag = format_tag(net, hub, ap, rt);
        Ok(Address {
            net,
            hub,
            ap,
            rt,
            tag,
        })
    }

    pub fn root() -> Self {
        Address::new(None, None, None, None).expect("empty address is always valid")
    }

    pub fn network(net: u32) -> Self {
        Address::new(Some(net), None, None, None).expect("net-only address is always valid")
    }

    pub fn hub(net: u32, hub: u32) -> Self {
        Address::new(Some(net), Some(hub), None, None).expect("net+hub address is always valid")
    }

    pub fn ap(net: u32, hub: u32, ap: u32) -> Self {
        Address::new(Some(net), Some(hub), Some(ap), None)
            .expect("net+hub+ap address is always valid")
    }

    pub fn rt(net: u32, hub: u32, ap: u32, rt: u32) -> Self {
        Address::new(Some(net), Some(hub), Some(ap), Some(rt))
            .expect("fully populated address is always valid")
    }

    /// Builds the address of this node's direct child at `index`, one level
    /// deeper than self. Fails if this address is already at RT depth.
    pub fn child(&self, index: u32) -> Result<Self, AddressError> {
        match (self.net, self.hub, self.ap, self.rt) {
            (None, None, None, None) => Address::new(Some(index), None, None, None),
            (Some(n), None, None, None) => Address::new(Some(n), Some(index), None, None),
            (Some(n), Some(h), None, None) => Address::new(Some(n), Some(h), Some(index), None),
            (Some(n), Some(h), Some(a), None) => {
                Address::new(Some(n), Some(h), Some(a), Some(index))
            }
            _ => Err(AddressError("cannot descend below RT depth".into())),
        }
    }

    pub fn net(&self) -> Option<u32> {
        self.net
    }
    pub fn hub_idx(&self) -> Option<u32> {
        self.hub
    }
    pub fn ap_idx(&self) -> Option<u32> {
        self.ap
    }
    pub fn rt_idx(&self) -> Option<u32> {
        self.rt
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
    }
}
impl Eq for Address {}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.tag.hash(state)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag)
    }
}

fn format_tag(net: Option<u32>, hub: Option<u32>, ap: Option<u32>, rt: Option<u32>) -> String {
    let mut s = String::new();
    if let Some(n) = net {
        s.push_str(&format!("N{:02x}", n));
    }
    if let Some(h) = hub {
        s.push_str(&format!("H{:02x}", h));
    }
    if let Some(a) = ap {
        s.push_str(&format!("A{:02x}", a));
    }
    if let Some(r) = rt {
        s.push_str(&format!("R{:02x}", r));
    }
    s
}

//! Fragment Addressing
//!
//! Every stored piece of a backup is addressed by a structured string id:
//!
//! ```text
//! alias$user@host:path/version/block-slot-Data
//! └── customer ──┘ └┬─┘ └─ ver ┘ └── fragment ──┘
//! ```
//!
//! - `alias$user@host` names the customer key (`alias` defaults to `master`)
//! - `path` is the catalog path of the backed-up item, digits and `/` only
//! - `version` names one snapshot, e.g. `F20131120053803PM`
//! - `block-slot-Data|Parity` names one fragment: block number, supplier
//!   slot, and whether it carries data or parity words
//!
//! The `host` part is the one component that legitimately changes over a
//! backup's lifetime: identity servers rotate, and replies may come back
//! under the new host while our bookkeeping still holds the old one.
//! [`FragmentId::same_up_to_host`] captures that comparison; confirming the
//! two hosts really are the same identity is the contact book's job.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Key alias assumed when an id carries none.
pub const DEFAULT_KEY_ALIAS: &str = "master";

// =============================================================================
// Customer
// =============================================================================

/// A customer key: `alias$user@host`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomerId {
    pub key_alias: String,
    pub user: String,
    pub host: String,
}

impl CustomerId {
    pub fn new(key_alias: &str, user: &str, host: &str) -> Self {
        Self {
            key_alias: key_alias.to_string(),
            user: user.to_string(),
            host: host.to_string(),
        }
    }

    /// Same key alias and user name; the host is allowed to differ.
    pub fn same_up_to_host(&self, other: &CustomerId) -> bool {
        self.key_alias == other.key_alias && self.user == other.user
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}${}@{}", self.key_alias, self.user, self.host)
    }
}

impl FromStr for CustomerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (key_alias, rest) = match s.split_once('$') {
            Some((alias, rest)) => (alias, rest),
            None => (DEFAULT_KEY_ALIAS, s),
        };
        let (user, host) = rest
            .rsplit_once('@')
            .ok_or_else(|| Error::MalformedFragmentId(format!("no host in customer id: {s}")))?;
        if key_alias.is_empty() || user.is_empty() || host.is_empty() {
            return Err(Error::MalformedFragmentId(format!(
                "empty component in customer id: {s}"
            )));
        }
        Ok(Self::new(key_alias, user, host))
    }
}

// =============================================================================
// Backup
// =============================================================================

/// One snapshot of one catalog item: `customer:path/version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackupId {
    pub customer: CustomerId,
    pub path: String,
    pub version: String,
}

impl BackupId {
    pub fn new(customer: CustomerId, path: &str, version: &str) -> Self {
        Self {
            customer,
            path: path.to_string(),
            version: version.to_string(),
        }
    }

    /// Address one fragment of this backup.
    pub fn fragment(&self, block: u64, slot: usize, kind: FragmentKind) -> FragmentId {
        FragmentId {
            backup: self.clone(),
            block,
            slot,
            kind,
        }
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.customer, self.path, self.version)
    }
}

impl FromStr for BackupId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (rest, version) = s
            .rsplit_once('/')
            .ok_or_else(|| Error::MalformedFragmentId(format!("no version in backup id: {s}")))?;
        let (customer, path) = rest
            .rsplit_once(':')
            .ok_or_else(|| Error::MalformedFragmentId(format!("no customer in backup id: {s}")))?;
        if path.is_empty() || version.is_empty() {
            return Err(Error::MalformedFragmentId(format!(
                "empty component in backup id: {s}"
            )));
        }
        Ok(Self {
            customer: customer.parse()?,
            path: path.to_string(),
            version: version.to_string(),
        })
    }
}

// =============================================================================
// Fragment
// =============================================================================

/// Whether a fragment file carries data words or parity words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    Data,
    Parity,
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentKind::Data => write!(f, "Data"),
            FragmentKind::Parity => write!(f, "Parity"),
        }
    }
}

impl FromStr for FragmentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Data" => Ok(FragmentKind::Data),
            "Parity" => Ok(FragmentKind::Parity),
            other => Err(Error::MalformedFragmentId(format!(
                "bad fragment kind: {other}"
            ))),
        }
    }
}

/// File name of a fragment inside its version directory.
pub fn local_file_name(block: u64, slot: usize, kind: FragmentKind) -> String {
    format!("{block}-{slot}-{kind}")
}

/// Full address of one stored fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragmentId {
    pub backup: BackupId,
    pub block: u64,
    pub slot: usize,
    pub kind: FragmentKind,
}

impl FragmentId {
    /// File name inside the version directory, `block-slot-Kind`.
    pub fn local_name(&self) -> String {
        local_file_name(self.block, self.slot, self.kind)
    }

    /// Same fragment of the same backup, ignoring the customer host.
    ///
    /// True here is necessary but not sufficient for a rotation match; the
    /// caller must still confirm both hosts belong to one identity.
    pub fn same_up_to_host(&self, other: &FragmentId) -> bool {
        self.block == other.block
            && self.slot == other.slot
            && self.kind == other.kind
            && self.backup.path == other.backup.path
            && self.backup.version == other.backup.version
            && self.backup.customer.same_up_to_host(&other.backup.customer)
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.backup, self.local_name())
    }
}

impl FromStr for FragmentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (backup, file_name) = s
            .rsplit_once('/')
            .ok_or_else(|| Error::MalformedFragmentId(format!("no file name in: {s}")))?;
        let mut parts = file_name.split('-');
        let (block, slot, kind) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(block), Some(slot), Some(kind), None) => (block, slot, kind),
            _ => {
                return Err(Error::MalformedFragmentId(format!(
                    "bad fragment file name in: {s}"
                )))
            }
        };
        Ok(Self {
            backup: backup.parse()?,
            block: block
                .parse()
                .map_err(|_| Error::MalformedFragmentId(format!("bad block number in: {s}")))?,
            slot: slot
                .parse()
                .map_err(|_| Error::MalformedFragmentId(format!("bad slot number in: {s}")))?,
            kind: kind.parse()?,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

//! The immutable, staked roster of consensus participants for a round.

use crate::error::AddressBookError;
use parity_scale_codec::{Decode, Encode};
use std::collections::HashMap;
use std::fmt;

/// The stable identifier of a consensus participant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct NodeId(u64);

impl NodeId {
    /// Wraps a raw node identifier.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw identifier value.
    pub const fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// A single participant within the address book.
#[derive(Clone, Debug, Encode, Decode)]
pub struct AddressBookEntry {
    /// The stable, unique identifier of the node.
    pub node_id: NodeId,
    /// The consensus weight of the node. Zero-stake nodes may appear in the
    /// roster but contribute nothing to any threshold.
    pub stake: u64,
    /// The node's public signing key, in the verifier's expected encoding.
    pub public_key: Vec<u8>,
}

/// The per-round roster mapping node ids to public keys and stake.
///
/// An address book is immutable once constructed. The entry list is kept
/// sorted by `node_id` and the total stake is pre-computed so threshold
/// checks never re-sum the roster.
#[derive(Clone, Debug)]
pub struct AddressBook {
    entries: Vec<AddressBookEntry>,
    index: HashMap<NodeId, usize>,
    total_stake: u128,
}

impl AddressBook {
    /// Builds an address book from a list of entries.
    ///
    /// Entries are sorted by node id. Duplicate ids, an empty roster, and a
    /// roster whose stakes sum to zero are all rejected: none of them can
    /// ever satisfy a stake threshold.
    pub fn new(mut entries: Vec<AddressBookEntry>) -> Result<Self, AddressBookError> {
        if entries.is_empty() {
            return Err(AddressBookError::EmptyRoster);
        }
        entries.sort_by_key(|e| e.node_id);

        let mut index = HashMap::with_capacity(entries.len());
        let mut total_stake: u128 = 0;
        for (pos, entry) in entries.iter().enumerate() {
            if index.insert(entry.node_id, pos).is_some() {
                return Err(AddressBookError::DuplicateNodeId(entry.node_id));
            }
            total_stake += u128::from(entry.stake);
        }
        if total_stake == 0 {
            return Err(AddressBookError::ZeroTotalStake);
        }

        Ok(Self {
            entries,
            index,
            total_stake,
        })
    }

    /// The stake held by `node_id`, or `None` for an unknown node.
    pub fn stake(&self, node_id: NodeId) -> Option<u64> {
        self.index.get(&node_id).map(|&pos| self.entries[pos].stake)
    }

    /// The public key of `node_id`, or `None` for an unknown node.
    pub fn public_key(&self, node_id: NodeId) -> Option<&[u8]> {
        self.index
            .get(&node_id)
            .map(|&pos| self.entries[pos].public_key.as_slice())
    }

    /// Whether `node_id` appears in the roster.
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.index.contains_key(&node_id)
    }

    /// The pre-computed sum of all stakes, widened to avoid overflow in
    /// threshold arithmetic.
    pub fn total_stake(&self) -> u128 {
        self.total_stake
    }

    /// Number of nodes in the roster.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Iterates the roster in node-id order.
    pub fn iter(&self) -> impl Iterator<Item = &AddressBookEntry> {
        self.entries.iter()
    }
}

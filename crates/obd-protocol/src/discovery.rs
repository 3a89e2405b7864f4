//! Supported PID Discovery
//!
//! Vehicles report supported Mode 01 PIDs as chained 32-bit masks: PID 0x00
//! covers 0x01-0x20, PID 0x20 covers 0x21-0x40 and PID 0x40 covers 0x41-0x60.
//! The last bit of each mask announces the next block; a block is only
//! queried when the previous one announced it.

use crate::codec::DecodedValue;
use crate::error::{DiscoveryError, QueryError, TransportError};
use crate::registry::{self, Command};
use crate::transport::{self, Transport};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Number of chained support blocks that are queried
pub const BLOCK_COUNT: usize = 3;

/// PIDs the connected vehicle supports, iterated in ascending order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportedSet {
    ids: BTreeSet<u8>,
}

impl SupportedSet {
    /// Whether `id` is supported
    pub fn contains(&self, id: u8) -> bool {
        self.ids.contains(&id)
    }

    /// Number of supported PIDs
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether discovery found nothing
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Supported PIDs, ascending
    pub fn ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.ids.iter().copied()
    }

    /// Registry entries of the supported PIDs, ascending
    pub fn commands(&self) -> impl Iterator<Item = &'static Command> + '_ {
        self.ids().filter_map(registry::by_id)
    }
}

impl FromIterator<u8> for SupportedSet {
    /// Keeps only PIDs present in the registry
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        Self {
            ids: iter
                .into_iter()
                .filter(|id| registry::by_id(*id).is_some())
                .collect(),
        }
    }
}

/// PIDs flagged in the mask of `block`, most significant bit first
pub fn block_ids(block: usize, mask: u32) -> impl Iterator<Item = u8> {
    let base = block * 32;
    (0..32usize)
        .filter(move |bit| mask & (0x8000_0000 >> bit) != 0)
        .filter_map(move |bit| u8::try_from(base + bit + 1).ok())
}

/// Whether the mask announces the following block
pub fn next_block_available(mask: u32) -> bool {
    mask & 1 != 0
}

/// Run the chained support queries and build the supported set.
///
/// Fails with [`DiscoveryError::NoResponse`] when block A times out or comes
/// back empty. Later blocks that fail only end the chain early. Link
/// failures other than timeouts are always returned.
pub async fn discover<T>(transport: &mut T, timeout: Duration) -> Result<SupportedSet, DiscoveryError>
where
    T: Transport + ?Sized,
{
    let mut ids = BTreeSet::new();

    for block in 0..BLOCK_COUNT {
        let Some(command) = registry::support_query(block) else {
            break;
        };

        let mask = match transport::query(transport, command, timeout).await {
            Ok(DecodedValue::SupportMask(mask)) => mask,
            Ok(other) => {
                warn!("{} answered with {:?}", command.mnemonic, other);
                end_chain(block, DiscoveryError::NoResponse)?;
                break;
            }
            Err(QueryError::Transport(TransportError::Timeout(ms))) => {
                warn!("{} timed out after {}ms", command.mnemonic, ms);
                end_chain(block, DiscoveryError::NoResponse)?;
                break;
            }
            Err(QueryError::Transport(err)) => return Err(err.into()),
            Err(QueryError::Decode(err)) => {
                warn!("{} could not be decoded: {}", command.mnemonic, err);
                end_chain(block, DiscoveryError::NoResponse)?;
                break;
            }
        };

        debug!("Block {} mask {:08X}", block, mask);
        for id in block_ids(block, mask) {
            if registry::by_id(id).is_some() {
                ids.insert(id);
            } else {
                warn!("Skipping unregistered PID {:02X}", id);
            }
        }

        if !next_block_available(mask) {
            break;
        }
    }

    let set = SupportedSet { ids };
    info!("Discovered {} supported PIDs", set.len());
    Ok(set)
}

/// Block A failing is fatal, later blocks just end the chain
fn end_chain(block: usize, err: DiscoveryError) -> Result<(), DiscoveryError> {
    if block == 0 {
        Err(err)
    } else {
        Ok(())
    }
}

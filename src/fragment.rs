//! Reassembly of responses a server split over several datagrams.

use std::collections::{BTreeMap, HashMap};

use log::{debug, trace};

use crate::error::{QueryError, Result};
use crate::parse::Cursor;

/// How a split datagram describes its place in the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentEncoding {
    /// GoldSource: one byte, `total` in the low nibble and `index` in the high one.
    Legacy,
    /// Source: separate `total` and `index` bytes, then a 2-byte declared size.
    Modern,
}

/// The split header following the `-2` packet marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitHeader {
    pub id: i32,
    pub total: u8,
    pub index: u8,
    pub size: Option<u16>,
    pub compressed: bool,
}

impl SplitHeader {
    /// Compression is flagged by the high bit of the group id.
    const COMPRESSED_BIT: u32 = 0x8000_0000;

    /// Read the split header at the cursor; the `-2` marker must already be consumed.
    pub fn read(cursor: &mut Cursor<'_>, encoding: FragmentEncoding) -> Result<Self> {
        let id = cursor.read_i32_le()?;
        match encoding {
            FragmentEncoding::Legacy => {
                let packed = cursor.read_u8()?;
                Ok(SplitHeader {
                    id,
                    total: packed & 0x0F,
                    index: packed >> 4,
                    size: None,
                    compressed: false,
                })
            }
            FragmentEncoding::Modern => {
                let total = cursor.read_u8()?;
                let index = cursor.read_u8()?;
                let size = cursor.read_u16_le()?;
                Ok(SplitHeader {
                    id,
                    total,
                    index,
                    size: Some(size),
                    compressed: (id as u32) & Self::COMPRESSED_BIT != 0,
                })
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Assembly {
    Incomplete,
    Complete(Vec<u8>),
}

#[derive(Debug, Default)]
struct FragmentGroup {
    expected_total: Option<u8>,
    received: BTreeMap<u8, Vec<u8>>,
}

impl FragmentGroup {
    fn is_complete(&self) -> bool {
        match self.expected_total {
            Some(total) => {
                self.received.len() == total as usize
                    && (0..total).all(|i| self.received.contains_key(&i))
            }
            None => false,
        }
    }

    fn concatenate(&self, group: i32) -> Result<Vec<u8>> {
        let total = self.expected_total.unwrap_or(0);
        let mut out = Vec::with_capacity(self.received.values().map(Vec::len).sum());
        for index in 0..total {
            let piece = self
                .received
                .get(&index)
                .ok_or(QueryError::MissingFragment { group, index })?;
            out.extend_from_slice(piece);
        }
        Ok(out)
    }
}

/// Collects fragments per group id until a group is whole.
///
/// Owned by a single query; dropping it discards any unfinished groups.
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    groups: HashMap<i32, FragmentGroup>,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        FragmentAssembler::default()
    }

    /// Number of groups still waiting for fragments.
    pub fn pending(&self) -> usize {
        self.groups.len()
    }

    /// Store one fragment. A repeated index replaces the earlier bytes.
    ///
    /// Once every index in `0..total` is present the group is joined in
    /// index order, dropped, and returned as [Assembly::Complete].
    pub fn add_fragment(&mut self, group_id: i32, index: u8, total: u8, bytes: Vec<u8>) -> Result<Assembly> {
        if total == 0 || index >= total {
            return Err(QueryError::MalformedHeader(format!(
                "fragment {index} of {total} in group {group_id:#x}"
            )));
        }

        let group = self.groups.entry(group_id).or_default();
        match group.expected_total {
            None => group.expected_total = Some(total),
            Some(expected) if expected != total => {
                return Err(QueryError::MalformedHeader(format!(
                    "group {group_id:#x} announced {expected} fragments, then {total}"
                )));
            }
            Some(_) => {}
        }
        group.received.insert(index, bytes);
        trace!("group {:#x}: fragment {}/{}", group_id, index + 1, total);

        if !group.is_complete() {
            return Ok(Assembly::Incomplete);
        }
        let joined = group.concatenate(group_id)?;
        self.groups.remove(&group_id);
        debug!("group {:#x}: reassembled {} byte(s)", group_id, joined.len());
        Ok(Assembly::Complete(joined))
    }

    /// Read a split header plus body from `cursor` and add it.
    pub fn accept(&mut self, cursor: &mut Cursor<'_>, encoding: FragmentEncoding) -> Result<Assembly> {
        let header = SplitHeader::read(cursor, encoding)?;
        trace!(
            "group {:#x}: fragment {} of {}, {} byte(s), declared size {:?}",
            header.id,
            header.index,
            header.total,
            cursor.remaining_len(),
            header.size
        );
        if header.compressed {
            return Err(QueryError::UnsupportedCompression);
        }
        let body = cursor.remaining().to_vec();
        self.add_fragment(header.id, header.index, header.total, body)
    }
}

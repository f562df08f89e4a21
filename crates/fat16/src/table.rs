use alloc::vec;
use alloc::vec::Vec;

use crate::block::{BlockDevice, SECTOR_SIZE};
use crate::boot::BootParameterBlock;
use crate::error::FsError;

/// Number of a cluster in the data region. Entries 0 and 1 of the FAT are
/// reserved, so data clusters start at 2.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cluster(pub u16);

impl Cluster {
    pub const FIRST_DATA: Self = Self(2);
}

impl From<u16> for Cluster {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<Cluster> for u16 {
    fn from(value: Cluster) -> Self {
        value.0
    }
}

/// Decoded value of one FAT entry.
///
/// See <https://en.wikipedia.org/wiki/Design_of_the_FAT_file_system#Cluster_values>
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FatEntry {
    Free,
    Next(Cluster),
    Reserved(u16),
    Bad,
    EndOfChain,
}

impl FatEntry {
    /// Value written when terminating a chain. Anything from 0xFFF8 up is
    /// read back as [`FatEntry::EndOfChain`].
    pub const END_OF_CHAIN: u16 = 0xFFFF;
    pub const BAD: u16 = 0xFFF7;

    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0x0000 => Self::Free,
            0xFFF0..=0xFFF6 => Self::Reserved(raw),
            Self::BAD => Self::Bad,
            0xFFF8..=0xFFFF => Self::EndOfChain,
            next => Self::Next(Cluster(next)),
        }
    }

    pub fn raw(self) -> u16 {
        match self {
            Self::Free => 0,
            Self::Next(cluster) => cluster.0,
            Self::Reserved(raw) => raw,
            Self::Bad => Self::BAD,
            Self::EndOfChain => Self::END_OF_CHAIN,
        }
    }
}

/// In-memory copy of the first FAT. Every change is written through to
/// disk one sector at a time, into each mirrored copy.
#[derive(Debug)]
pub struct FatTable {
    bytes: Vec<u8>,
    copy_starts: Vec<u32>,
    /// One past the highest cluster that maps onto the data region.
    cluster_limit: u16,
    /// No free cluster exists below this one.
    free_hint: u16,
}

impl FatTable {
    /// Reads FAT copy 0 into memory. With `mirror` set, updates are also
    /// written to the remaining copies.
    pub fn load<D: BlockDevice>(
        device: &D,
        bpb: &BootParameterBlock,
        mirror: bool,
    ) -> Result<Self, FsError> {
        let mut bytes = vec![0; usize::from(bpb.sectors_per_fat) * SECTOR_SIZE];
        device.read_sectors(bpb.fat_start(), &mut bytes)?;

        let copies = if mirror { bpb.fat_count } else { 1 };
        let copy_starts = (0..copies)
            .map(|copy| bpb.fat_copy_start(copy).0)
            .collect();

        let cluster_limit = (bpb.data_clusters() + 2)
            .min(bpb.fat_entry_count())
            .min(u32::from(FatEntry::BAD)) as u16;

        Ok(Self {
            bytes,
            copy_starts,
            cluster_limit,
            free_hint: Cluster::FIRST_DATA.0,
        })
    }

    /// Number of entries in one FAT copy.
    pub fn entry_count(&self) -> usize {
        self.bytes.len() / 2
    }

    /// Highest usable data cluster plus one.
    pub fn cluster_limit(&self) -> u16 {
        self.cluster_limit
    }

    fn raw(&self, cluster: Cluster) -> Result<u16, FsError> {
        let offset = usize::from(cluster.0) * 2;
        match self.bytes.get(offset..offset + 2) {
            Some(&[lo, hi]) => Ok(u16::from_le_bytes([lo, hi])),
            _ => Err(FsError::InvalidCluster(cluster.0)),
        }
    }

    /// Checks that `cluster` names a cluster in the data region.
    pub fn check_data_cluster(&self, cluster: Cluster) -> Result<(), FsError> {
        if cluster < Cluster::FIRST_DATA || cluster.0 >= self.cluster_limit {
            return Err(FsError::InvalidCluster(cluster.0));
        }
        Ok(())
    }

    pub fn entry(&self, cluster: Cluster) -> Result<FatEntry, FsError> {
        self.raw(cluster).map(FatEntry::from_raw)
    }

    /// Follows one link. `Ok(None)` means `cluster` ends its chain. A free,
    /// bad or reserved entry, or a link leaving the data region, is
    /// corruption.
    pub fn next(&self, cluster: Cluster) -> Result<Option<Cluster>, FsError> {
        match self.entry(cluster)? {
            FatEntry::EndOfChain => Ok(None),
            FatEntry::Next(next) if self.check_data_cluster(next).is_ok() => Ok(Some(next)),
            other => {
                log::warn!("cluster {cluster:?} has invalid link {other:?}");
                Err(FsError::CorruptChain { cluster: cluster.0 })
            }
        }
    }

    /// Iterates over the chain starting at `start`, `start` included.
    pub fn chain(&self, start: Cluster) -> Chain<'_> {
        Chain {
            table: self,
            next: Some(start),
            first: true,
            remaining: self.entry_count(),
        }
    }

    pub fn chain_len(&self, start: Cluster) -> Result<usize, FsError> {
        self.chain(start).try_fold(0, |len, cluster| cluster.map(|_| len + 1))
    }

    /// Cluster `steps` links after `start`, or `None` if the chain ends
    /// first.
    pub fn walk(&self, start: Cluster, steps: usize) -> Result<Option<Cluster>, FsError> {
        for (i, cluster) in self.chain(start).enumerate() {
            let cluster = cluster?;
            if i == steps {
                return Ok(Some(cluster));
            }
        }
        Ok(None)
    }

    /// Cluster whose entry is the end-of-chain marker.
    pub fn last_in_chain(&self, start: Cluster) -> Result<Cluster, FsError> {
        self.last_in_chain_before_end(start, 0)
    }

    /// Cluster `offset` links before the end of the chain, clamped to
    /// `start` for chains shorter than that.
    pub fn last_in_chain_before_end(
        &self,
        start: Cluster,
        offset: usize,
    ) -> Result<Cluster, FsError> {
        let len = self.chain_len(start)?;
        let steps = len.saturating_sub(offset + 1);
        Ok(self.walk(start, steps)?.unwrap_or(start))
    }

    /// Finds the lowest free data cluster without claiming it. The caller
    /// marks it used through [`FatTable::set_link`].
    pub fn allocate_free(&mut self) -> Option<Cluster> {
        let start = self.free_hint.max(Cluster::FIRST_DATA.0);
        for candidate in start..self.cluster_limit {
            if self.raw(Cluster(candidate)).ok() == Some(0) {
                self.free_hint = candidate;
                log::trace!("next free cluster is {candidate:#06x}");
                return Some(Cluster(candidate));
            }
        }
        self.free_hint = self.cluster_limit;
        None
    }

    pub fn free_count(&self) -> usize {
        (Cluster::FIRST_DATA.0..self.cluster_limit)
            .filter(|&c| self.raw(Cluster(c)).ok() == Some(0))
            .count()
    }

    /// Sets the entry for `cluster` and writes the containing FAT sector
    /// through to every copy. The in-memory table is updated even when the
    /// device write fails.
    pub fn set_link<D: BlockDevice>(
        &mut self,
        device: &D,
        cluster: Cluster,
        entry: FatEntry,
    ) -> Result<(), FsError> {
        self.check_data_cluster(cluster)?;
        let offset = usize::from(cluster.0) * 2;
        self.bytes[offset..offset + 2].copy_from_slice(&entry.raw().to_le_bytes());
        if entry == FatEntry::Free && cluster.0 < self.free_hint {
            self.free_hint = cluster.0;
        }
        log::trace!("FAT[{:#06x}] = {:#06x}", cluster.0, entry.raw());

        let sector = offset / SECTOR_SIZE;
        let data = &self.bytes[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE];
        for &copy_start in &self.copy_starts {
            device.write_sectors((copy_start + sector as u32).into(), data)?;
        }
        Ok(())
    }
}

/// Iterator over a cluster chain. Stops with [`FsError::CorruptChain`] if
/// the chain is longer than the FAT itself, which only a cycle can cause.
#[derive(Debug)]
pub struct Chain<'a> {
    table: &'a FatTable,
    next: Option<Cluster>,
    first: bool,
    remaining: usize,
}

impl Iterator for Chain<'_> {
    type Item = Result<Cluster, FsError>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        if self.first {
            self.first = false;
            if let Err(err) = self.table.check_data_cluster(current) {
                return Some(Err(err));
            }
        }
        if self.remaining == 0 {
            log::warn!("cluster chain through {current:?} does not terminate");
            return Some(Err(FsError::CorruptChain { cluster: current.0 }));
        }
        self.remaining -= 1;
        match self.table.next(current) {
            Ok(next) => {
                self.next = next;
                Some(Ok(current))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::DeviceError;
    use crate::testing::TestImage;

    #[test]
    fn decodes_entry_ranges() {
        assert_eq!(FatEntry::from_raw(0), FatEntry::Free);
        assert_eq!(FatEntry::from_raw(0x0006), FatEntry::Next(Cluster(6)));
        assert_eq!(FatEntry::from_raw(0xFFEF), FatEntry::Next(Cluster(0xFFEF)));
        assert_eq!(FatEntry::from_raw(0xFFF0), FatEntry::Reserved(0xFFF0));
        assert_eq!(FatEntry::from_raw(0xFFF7), FatEntry::Bad);
        assert_eq!(FatEntry::from_raw(0xFFF8), FatEntry::EndOfChain);
        assert_eq!(FatEntry::from_raw(0xFFFF), FatEntry::EndOfChain);
        assert_eq!(FatEntry::EndOfChain.raw(), 0xFFFF);
    }

    #[test]
    fn walks_chains() {
        let image = TestImage::small();
        image.link_chain(&[5, 9, 7]);
        let table = image.fat_table();

        let chain: Vec<_> = table.chain(Cluster(5)).collect::<Result<_, _>>().unwrap();
        assert_eq!(chain, vec![Cluster(5), Cluster(9), Cluster(7)]);
        assert_eq!(table.chain_len(Cluster(5)), Ok(3));
        assert_eq!(table.walk(Cluster(5), 2), Ok(Some(Cluster(7))));
        assert_eq!(table.walk(Cluster(5), 3), Ok(None));
        assert_eq!(table.last_in_chain(Cluster(5)), Ok(Cluster(7)));
        assert_eq!(table.last_in_chain_before_end(Cluster(5), 1), Ok(Cluster(9)));
        assert_eq!(table.last_in_chain_before_end(Cluster(5), 5), Ok(Cluster(5)));
    }

    #[test]
    fn chain_walk_terminates_on_cycles() {
        let image = TestImage::small();
        image.set_fat(5, 6);
        image.set_fat(6, 5);
        let table = image.fat_table();

        assert!(matches!(
            table.chain_len(Cluster(5)),
            Err(FsError::CorruptChain { .. })
        ));
    }

    #[test]
    fn invalid_links_are_corrupt() {
        let image = TestImage::small();
        image.set_fat(5, 0x0001);
        image.set_fat(6, 0xFFF7);
        let table = image.fat_table();

        assert_eq!(table.next(Cluster(5)), Err(FsError::CorruptChain { cluster: 5 }));
        assert_eq!(table.next(Cluster(6)), Err(FsError::CorruptChain { cluster: 6 }));
        assert_eq!(table.next(Cluster(7)), Err(FsError::CorruptChain { cluster: 7 }));
        assert_eq!(table.walk(Cluster(1), 0), Err(FsError::InvalidCluster(1)));
        assert_eq!(table.walk(Cluster(5), 3), Err(FsError::CorruptChain { cluster: 5 }));
    }

    #[test]
    fn allocation_scans_from_lowest_free() {
        let image = TestImage::small();
        image.link_chain(&[2, 3]);
        image.link_chain(&[5]);
        let mut table = image.fat_table();

        assert_eq!(table.allocate_free(), Some(Cluster(4)));
        table
            .set_link(&image.disk, Cluster(4), FatEntry::EndOfChain)
            .unwrap();
        assert_eq!(table.allocate_free(), Some(Cluster(6)));

        table.set_link(&image.disk, Cluster(3), FatEntry::Free).unwrap();
        assert_eq!(table.allocate_free(), Some(Cluster(3)));
    }

    #[test]
    fn allocation_stays_inside_data_region() {
        let image = TestImage::small();
        let mut table = image.fat_table();
        let limit = table.cluster_limit();
        for c in 2..limit {
            table
                .set_link(&image.disk, Cluster(c), FatEntry::EndOfChain)
                .unwrap();
        }
        assert_eq!(table.free_count(), 0);
        assert_eq!(table.allocate_free(), None);
        assert_eq!(
            table.set_link(&image.disk, Cluster(limit), FatEntry::EndOfChain),
            Err(FsError::InvalidCluster(limit))
        );
    }

    #[test]
    fn updates_reach_every_copy() {
        let image = TestImage::small();
        let mut table = image.fat_table();
        table
            .set_link(&image.disk, Cluster(40), FatEntry::EndOfChain)
            .unwrap();
        assert_eq!(image.fat_on_disk(0, 40), 0xFFFF);
        assert_eq!(image.fat_on_disk(1, 40), 0xFFFF);
    }

    #[test]
    fn unmirrored_updates_only_touch_first_copy() {
        let image = TestImage::small();
        let mut table = FatTable::load(&image.disk, &image.bpb, false).unwrap();
        table.set_link(&image.disk, Cluster(8), FatEntry::Bad).unwrap();
        assert_eq!(image.fat_on_disk(0, 8), 0xFFF7);
        assert_eq!(image.fat_on_disk(1, 8), 0);
    }

    #[test]
    fn failed_write_keeps_cached_update() {
        let image = TestImage::small();
        let mut table = image.fat_table();
        image.disk.set_fail_writes(true);

        assert_eq!(
            table.set_link(&image.disk, Cluster(9), FatEntry::Next(Cluster(10))),
            Err(FsError::Device(DeviceError::Transfer))
        );
        assert_eq!(table.entry(Cluster(9)), Ok(FatEntry::Next(Cluster(10))));
        assert_eq!(image.fat_on_disk(0, 9), 0);
        assert_eq!(image.fat_on_disk(1, 9), 0);
    }
}

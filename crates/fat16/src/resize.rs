use alloc::vec::Vec;
use core::cmp::Ordering;

use crate::block::BlockDevice;
use crate::boot::BootParameterBlock;
use crate::cluster_io::ClusterIo;
use crate::error::FsError;
use crate::table::{Cluster, FatEntry, FatTable};

/// Clusters a file of `size` bytes occupies. A file always owns at least
/// one cluster, and a size landing exactly on a cluster boundary owns one
/// extra.
pub fn clusters_needed(size: u32, cluster_bytes: u32) -> usize {
    (size / cluster_bytes) as usize + 1
}

/// Grows or shrinks the cluster chain behind a file. The directory entry
/// itself is left to the caller.
#[derive(Debug)]
pub struct Resizer<'a, D> {
    device: &'a D,
    bpb: &'a BootParameterBlock,
    table: &'a mut FatTable,
}

impl<'a, D: BlockDevice> Resizer<'a, D> {
    pub fn new(device: &'a D, bpb: &'a BootParameterBlock, table: &'a mut FatTable) -> Self {
        Self { device, bpb, table }
    }

    /// Makes the chain starting at `first` match a file of `new_size`
    /// bytes. When shrinking, the bytes from `new_size` to the end of the
    /// retained clusters are zeroed.
    ///
    /// Returns `new_size`. On [`FsError::NoFreeSpace`] the chain is
    /// restored to its original length.
    pub fn resize(&mut self, first: Cluster, old_size: u32, new_size: u32) -> Result<u32, FsError> {
        let cluster_bytes = self.bpb.cluster_bytes();
        let have = self.table.chain_len(first)?;
        let want = clusters_needed(new_size, cluster_bytes);
        log::debug!(
            "resizing chain {first:?} from {old_size} to {new_size} bytes \
             ({have} -> {want} clusters)"
        );

        match want.cmp(&have) {
            Ordering::Less => self.shrink(first, have - want)?,
            Ordering::Greater => self.grow(first, want - have)?,
            Ordering::Equal => {}
        }

        if new_size < old_size {
            let retained = want as u64 * u64::from(cluster_bytes);
            let len = (retained - u64::from(new_size)) as usize;
            ClusterIo::new(self.device, self.bpb, &*self.table)
                .zero(first, new_size, len)?;
        }
        Ok(new_size)
    }

    fn shrink(&mut self, first: Cluster, count: usize) -> Result<(), FsError> {
        for _ in 0..count {
            let last = self.table.last_in_chain(first)?;
            let new_last = self.table.last_in_chain_before_end(first, 1)?;
            if last == new_last {
                break;
            }
            self.table.set_link(self.device, last, FatEntry::Free)?;
            self.table
                .set_link(self.device, new_last, FatEntry::EndOfChain)?;
        }
        Ok(())
    }

    fn grow(&mut self, first: Cluster, count: usize) -> Result<(), FsError> {
        let free = self.table.free_count();
        if free < count {
            log::warn!("need {count} clusters but only {free} are free");
            return Err(FsError::NoFreeSpace);
        }

        let original_last = self.table.last_in_chain(first)?;
        let mut last = original_last;
        let mut added = Vec::with_capacity(count);

        for _ in 0..count {
            let Some(cluster) = self.table.allocate_free() else {
                log::warn!(
                    "volume full after {} of {count} clusters; releasing them",
                    added.len()
                );
                self.release(original_last, &added)?;
                return Err(FsError::NoFreeSpace);
            };

            // The new cluster is claimed and cleared before it joins the
            // chain.
            self.table
                .set_link(self.device, cluster, FatEntry::EndOfChain)?;
            ClusterIo::new(self.device, self.bpb, &*self.table)
                .zero_cluster(cluster)?;
            self.table
                .set_link(self.device, last, FatEntry::Next(cluster))?;

            added.push(cluster);
            last = cluster;
        }
        Ok(())
    }

    fn release(&mut self, original_last: Cluster, added: &[Cluster]) -> Result<(), FsError> {
        self.table
            .set_link(self.device, original_last, FatEntry::EndOfChain)?;
        for &cluster in added {
            self.table.set_link(self.device, cluster, FatEntry::Free)?;
        }
        Ok(())
    }
}

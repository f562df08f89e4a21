use alloc::vec;

use crate::block::{BlockDevice, SECTOR_SIZE};
use crate::boot::BootParameterBlock;
use crate::error::FsError;
use crate::table::{Cluster, FatTable};

/// Moves bytes between caller buffers and the clusters of one chain.
/// Never allocates or frees clusters: transfers stop short at the end of
/// the chain.
#[derive(Debug)]
pub struct ClusterIo<'a, D> {
    device: &'a D,
    bpb: &'a BootParameterBlock,
    table: &'a FatTable,
}

impl<'a, D: BlockDevice> ClusterIo<'a, D> {
    pub fn new(device: &'a D, bpb: &'a BootParameterBlock, table: &'a FatTable) -> Self {
        Self { device, bpb, table }
    }

    /// Locates the cluster holding byte `offset` of the chain, and the
    /// offset within it.
    fn seek(&self, start: Cluster, offset: u32) -> Result<Option<(Cluster, usize)>, FsError> {
        let cluster_bytes = self.bpb.cluster_bytes();
        let steps = (offset / cluster_bytes) as usize;
        let within = (offset % cluster_bytes) as usize;
        Ok(self.table.walk(start, steps)?.map(|cluster| (cluster, within)))
    }

    /// Reads up to `buf.len()` bytes starting at byte `offset` of the
    /// chain. Returns how many bytes were copied, which is less than
    /// requested only when the chain runs out.
    pub fn read(&self, start: Cluster, offset: u32, buf: &mut [u8]) -> Result<usize, FsError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let Some((mut cluster, mut within)) = self.seek(start, offset)? else {
            return Ok(0);
        };

        let cluster_bytes = self.bpb.cluster_bytes() as usize;
        let mut scratch = vec![0; cluster_bytes];
        let mut done = 0;
        loop {
            self.device
                .read_sectors(self.bpb.cluster_lba(cluster), &mut scratch)?;
            let n = (cluster_bytes - within).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&scratch[within..within + n]);
            done += n;
            within = 0;

            if done == buf.len() {
                break;
            }
            match self.table.next(cluster)? {
                Some(next) => cluster = next,
                None => break,
            }
        }
        Ok(done)
    }

    /// Writes `data` starting at byte `offset` of the chain, sector by
    /// sector. Partially covered sectors are read first so their other
    /// bytes survive.
    pub fn write(&self, start: Cluster, offset: u32, data: &[u8]) -> Result<usize, FsError> {
        self.write_with(start, offset, data.len(), |dst, done| {
            dst.copy_from_slice(&data[done..done + dst.len()]);
        })
    }

    /// Zeroes `len` bytes of the chain starting at byte `offset`.
    pub fn zero(&self, start: Cluster, offset: u32, len: usize) -> Result<usize, FsError> {
        self.write_with(start, offset, len, |dst, _| dst.fill(0))
    }

    /// Overwrites every sector of `cluster` with zeroes.
    pub fn zero_cluster(&self, cluster: Cluster) -> Result<(), FsError> {
        let zeroes = vec![0; self.bpb.cluster_bytes() as usize];
        self.device
            .write_sectors(self.bpb.cluster_lba(cluster), &zeroes)?;
        Ok(())
    }

    fn write_with<F>(
        &self,
        start: Cluster,
        offset: u32,
        len: usize,
        mut fill: F,
    ) -> Result<usize, FsError>
    where
        F: FnMut(&mut [u8], usize),
    {
        if len == 0 {
            return Ok(0);
        }
        let Some((mut cluster, within)) = self.seek(start, offset)? else {
            return Ok(0);
        };

        let sectors_per_cluster = usize::from(self.bpb.sectors_per_cluster);
        let mut sector_index = within / SECTOR_SIZE;
        let mut sector_offset = within % SECTOR_SIZE;
        let mut sector = [0; SECTOR_SIZE];
        let mut done = 0;
        while done < len {
            if sector_index == sectors_per_cluster {
                match self.table.next(cluster)? {
                    Some(next) => cluster = next,
                    None => break,
                }
                sector_index = 0;
            }

            let lba = self.bpb.cluster_lba(cluster) + sector_index as u32;
            let n = (SECTOR_SIZE - sector_offset).min(len - done);
            if n < SECTOR_SIZE {
                self.device.read_sectors(lba, &mut sector)?;
            }
            fill(&mut sector[sector_offset..sector_offset + n], done);
            self.device.write_sectors(lba, &sector)?;

            done += n;
            sector_offset = 0;
            sector_index += 1;
        }
        Ok(done)
    }
}

//! Helpers for building small volumes in memory and poking at their raw
//! bytes from unit tests.

use alloc::vec;
use alloc::vec::Vec;

use crate::block::{BlockDevice, Lba, MemoryDisk, SECTOR_SIZE};
use crate::boot::BootParameterBlock;
use crate::directory::{Attributes, DirectoryEntry, ShortName, DIRECTORY_ENTRY_SIZE};
use crate::format::{format, FormatOptions};
use crate::table::{Cluster, FatEntry, FatTable};
use crate::volume::{Fat16Volume, MountOptions};

#[derive(Debug)]
pub(crate) struct TestImage {
    pub(crate) disk: MemoryDisk,
    pub(crate) bpb: BootParameterBlock,
}

impl TestImage {
    pub(crate) fn new(options: &FormatOptions) -> Self {
        let disk = MemoryDisk::new(options.total_sectors);
        let bpb = format(&disk, options).unwrap();
        Self { disk, bpb }
    }

    /// 256 sectors, one sector per cluster, two FATs and a one sector root
    /// directory of 16 entries.
    pub(crate) fn small() -> Self {
        Self::with_sectors_per_cluster(1)
    }

    pub(crate) fn with_sectors_per_cluster(sectors_per_cluster: u8) -> Self {
        Self::new(&FormatOptions {
            total_sectors: 256,
            sectors_per_cluster,
            root_dir_entries: 16,
            volume_label: *b"           ",
            ..FormatOptions::default()
        })
    }

    pub(crate) fn mount(&self) -> Fat16Volume<MemoryDisk> {
        Fat16Volume::mount(self.disk.clone(), MountOptions::default())
            .unwrap()
    }

    pub(crate) fn fat_table(&self) -> FatTable {
        FatTable::load(&self.disk, &self.bpb, true).unwrap()
    }

    fn read_sector(&self, lba: Lba) -> [u8; SECTOR_SIZE] {
        let mut sector = [0; SECTOR_SIZE];
        self.disk.read_sectors(lba, &mut sector).unwrap();
        sector
    }

    fn patch(&self, byte_offset: usize, bytes: &[u8]) {
        let lba = Lba((byte_offset / SECTOR_SIZE) as u32);
        let within = byte_offset % SECTOR_SIZE;
        let mut sector = self.read_sector(lba);
        sector[within..within + bytes.len()].copy_from_slice(bytes);
        self.disk.write_sectors(lba, &sector).unwrap();
    }

    /// Sets a raw FAT entry in every copy on disk.
    pub(crate) fn set_fat(&self, cluster: u16, value: u16) {
        for copy in 0..self.bpb.fat_count {
            let offset = self.bpb.fat_copy_start(copy).byte_offset() + usize::from(cluster) * 2;
            self.patch(offset, &value.to_le_bytes());
        }
    }

    /// Links `clusters` into one chain, terminated after the last.
    pub(crate) fn link_chain(&self, clusters: &[u16]) {
        for pair in clusters.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        if let Some(&last) = clusters.last() {
            self.set_fat(last, FatEntry::END_OF_CHAIN);
        }
    }

    pub(crate) fn fat_on_disk(&self, copy: u8, cluster: u16) -> u16 {
        let offset = self.bpb.fat_copy_start(copy).byte_offset() + usize::from(cluster) * 2;
        let image = self.disk.to_vec();
        u16::from_le_bytes([image[offset], image[offset + 1]])
    }

    /// Writes `data` at the start of `cluster`, zero filling the rest.
    pub(crate) fn write_cluster(&self, cluster: u16, data: &[u8]) {
        let mut buf = vec![0; self.bpb.cluster_bytes() as usize];
        buf[..data.len()].copy_from_slice(data);
        self.disk
            .write_sectors(self.bpb.cluster_lba(Cluster(cluster)), &buf)
            .unwrap();
    }

    pub(crate) fn read_cluster(&self, cluster: u16) -> Vec<u8> {
        let mut buf = vec![0; self.bpb.cluster_bytes() as usize];
        self.disk
            .read_sectors(self.bpb.cluster_lba(Cluster(cluster)), &mut buf)
            .unwrap();
        buf
    }

    fn root_offset(&self, index: u32) -> usize {
        self.bpb.root_dir_start().byte_offset() + index as usize * DIRECTORY_ENTRY_SIZE
    }

    fn dir_offset(&self, chain: &[u16], index: u32) -> usize {
        let byte = index as usize * DIRECTORY_ENTRY_SIZE;
        let cluster_bytes = self.bpb.cluster_bytes() as usize;
        let cluster = Cluster(chain[byte / cluster_bytes]);
        self.bpb.cluster_lba(cluster).byte_offset() + byte % cluster_bytes
    }

    pub(crate) fn put_root_entry(&self, index: u32, entry: &DirectoryEntry) {
        self.patch(self.root_offset(index), &entry.encode());
    }

    pub(crate) fn root_entry(&self, index: u32) -> DirectoryEntry {
        let offset = self.root_offset(index);
        DirectoryEntry::parse(&self.disk.to_vec()[offset..]).unwrap()
    }

    /// Places a record in the directory whose clusters are `chain`.
    pub(crate) fn put_dir_entry(&self, chain: &[u16], index: u32, entry: &DirectoryEntry) {
        self.patch(self.dir_offset(chain, index), &entry.encode());
    }

    pub(crate) fn dir_entry(&self, chain: &[u16], index: u32) -> DirectoryEntry {
        let offset = self.dir_offset(chain, index);
        DirectoryEntry::parse(&self.disk.to_vec()[offset..]).unwrap()
    }

    /// Creates a root file whose contents fill `chain` in order.
    pub(crate) fn add_root_file(&self, index: u32, name: &str, chain: &[u16], data: &[u8]) {
        self.link_chain(chain);
        let cluster_bytes = self.bpb.cluster_bytes() as usize;
        for (cluster, piece) in chain.iter().zip(data.chunks(cluster_bytes)) {
            self.write_cluster(*cluster, piece);
        }
        let entry = DirectoryEntry::new(
            ShortName::encode(name).unwrap(),
            Attributes::ARCHIVE,
            chain[0],
            data.len() as u32,
        );
        self.put_root_entry(index, &entry);
    }
}

use alloc::vec;

use crate::block::{BlockDevice, Lba, SECTOR_SIZE};
use crate::boot::{BootParameterBlock, BootSectorError};
use crate::directory::{Attributes, DirectoryEntry, ShortName, DIRECTORY_ENTRY_SIZE};
use crate::error::FsError;
use crate::table::FatEntry;

/// Parameters for laying out a fresh volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    pub total_sectors: u32,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_dir_entries: u16,
    pub media_descriptor: u8,
    pub volume_id: u32,
    /// Space padded. An all-blank label writes no label entry.
    pub volume_label: [u8; 11],
    pub oem_name: [u8; 8],
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            total_sectors: 8192,
            sectors_per_cluster: 4,
            reserved_sectors: 1,
            fat_count: 2,
            root_dir_entries: 512,
            media_descriptor: 0xF8,
            volume_id: 0x1234_5678,
            volume_label: *b"NO NAME    ",
            oem_name: *b"FAT16RS ",
        }
    }
}

impl FormatOptions {
    /// Geometry the options produce. FAT size is picked so every data
    /// cluster has an entry.
    pub fn geometry(&self) -> Result<BootParameterBlock, BootSectorError> {
        let root_dir_sectors = (u32::from(self.root_dir_entries) * DIRECTORY_ENTRY_SIZE as u32)
            .div_ceil(SECTOR_SIZE as u32);
        let spc = u32::from(self.sectors_per_cluster.max(1));
        let clusters = self
            .total_sectors
            .saturating_sub(u32::from(self.reserved_sectors) + root_dir_sectors)
            / spc;
        if clusters + 2 > u32::from(FatEntry::BAD) {
            return Err(BootSectorError::TooManyClusters { clusters });
        }
        let sectors_per_fat = ((clusters + 2) * 2).div_ceil(SECTOR_SIZE as u32) as u16;

        let bpb = BootParameterBlock {
            oem_name: self.oem_name,
            bytes_per_sector: SECTOR_SIZE as u16,
            sectors_per_cluster: self.sectors_per_cluster,
            reserved_sectors: self.reserved_sectors,
            fat_count: self.fat_count,
            root_dir_entries: self.root_dir_entries,
            total_sectors: self.total_sectors,
            media_descriptor: self.media_descriptor,
            sectors_per_fat,
            sectors_per_track: 63,
            head_count: 255,
            hidden_sectors: 0,
            volume_id: self.volume_id,
            volume_label: self.volume_label,
        };

        // Validated the same way as a mounted volume.
        BootParameterBlock::parse(&bpb.boot_sector())
    }
}

/// Writes an empty FAT16 file system onto `device`: boot sector, zeroed
/// FATs with the two reserved entries set, and an empty root directory.
/// The data region is left untouched.
pub fn format<D: BlockDevice>(
    device: &D,
    options: &FormatOptions,
) -> Result<BootParameterBlock, FsError> {
    let bpb = options.geometry()?;
    log::debug!("formatting {} sectors: {bpb:?}", bpb.total_sectors);

    device.write_sectors(Lba(0), &bpb.boot_sector())?;

    if bpb.reserved_sectors > 1 {
        let zeroes = vec![0; (usize::from(bpb.reserved_sectors) - 1) * SECTOR_SIZE];
        device.write_sectors(Lba(1), &zeroes)?;
    }

    let mut fat = vec![0; usize::from(bpb.sectors_per_fat) * SECTOR_SIZE];
    let reserved = [0xFF00 | u16::from(bpb.media_descriptor), FatEntry::END_OF_CHAIN];
    fat[0..2].copy_from_slice(&reserved[0].to_le_bytes());
    fat[2..4].copy_from_slice(&reserved[1].to_le_bytes());
    for copy in 0..bpb.fat_count {
        device.write_sectors(bpb.fat_copy_start(copy), &fat)?;
    }

    let mut root = vec![0; bpb.root_dir_sectors() as usize * SECTOR_SIZE];
    if bpb.label().iter().any(|&b| b != b' ') {
        let label =
            DirectoryEntry::new(ShortName(bpb.volume_label), Attributes::VOLUME_LABEL, 0, 0);
        root[..DIRECTORY_ENTRY_SIZE].copy_from_slice(&label.encode());
    }
    device.write_sectors(bpb.root_dir_start(), &root)?;

    Ok(bpb)
}

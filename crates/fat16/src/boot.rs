use thiserror::Error;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::block::{Lba, SECTOR_SIZE};
use crate::directory::DIRECTORY_ENTRY_SIZE;
use crate::table::{Cluster, FatEntry};

type Le16 = U16<LittleEndian>;
type Le32 = U32<LittleEndian>;

/// Last two bytes of a bootable boot sector.
pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
pub const BOOT_SIGNATURE_OFFSET: usize = 510;

/// The BIOS parameter block is the first part of the boot sector. FAT16
/// volumes follow it directly with the extended boot record, which is
/// included here.
///
/// See <https://wiki.osdev.org/FAT#BPB_.28BIOS_Parameter_Block.29>
#[derive(Debug, Clone, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct BIOSParameterBlock {
    pub jmp_boot: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: Le16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: Le16,
    pub fat_count: u8,
    pub root_dir_entries: Le16,
    pub total_sectors: Le16,
    pub media_descriptor: u8,
    pub sectors_per_fat: Le16,
    pub sectors_per_track: Le16,
    pub head_count: Le16,
    pub hidden_sectors: Le32,
    pub total_sectors_large: Le32,

    // Extended boot record
    pub drive_number: u8,
    pub reserved: u8,
    pub extended_signature: u8,
    pub volume_id: Le32,
    pub volume_label: [u8; 11],
    pub fs_type: [u8; 8],
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum BootSectorError {
    #[error("boot sector is only {len} bytes long")]
    Truncated { len: usize },
    #[error("unsupported sector size {0}")]
    UnsupportedSectorSize(u16),
    #[error("sectors per cluster {0} is not a power of two")]
    InvalidSectorsPerCluster(u8),
    #[error("volume has no reserved sectors")]
    NoReservedSectors,
    #[error("volume has no FAT copies")]
    NoFats,
    #[error("volume has an empty FAT")]
    EmptyFat,
    #[error("volume has no root directory entries")]
    NoRootEntries,
    #[error("{clusters} data clusters do not fit in a 16 bit FAT")]
    TooManyClusters { clusters: u32 },
    #[error("data region starts at sector {data_start} but the volume has {total_sectors}")]
    RegionsExceedVolume { data_start: u32, total_sectors: u32 },
}

/// Validated geometry of a FAT16 volume. Immutable after mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootParameterBlock {
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_dir_entries: u16,
    pub total_sectors: u32,
    pub media_descriptor: u8,
    pub sectors_per_fat: u16,
    pub sectors_per_track: u16,
    pub head_count: u16,
    pub hidden_sectors: u32,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
}

impl BootParameterBlock {
    /// Decodes and validates sector 0 of a volume.
    pub fn parse(sector: &[u8]) -> Result<Self, BootSectorError> {
        let raw = BIOSParameterBlock::read_from_prefix(sector)
            .ok_or(BootSectorError::Truncated { len: sector.len() })?;

        let total_sectors = match raw.total_sectors.get() {
            0 => raw.total_sectors_large.get(),
            n => u32::from(n),
        };
        let bpb = Self {
            oem_name: raw.oem_name,
            bytes_per_sector: raw.bytes_per_sector.get(),
            sectors_per_cluster: raw.sectors_per_cluster,
            reserved_sectors: raw.reserved_sectors.get(),
            fat_count: raw.fat_count,
            root_dir_entries: raw.root_dir_entries.get(),
            total_sectors,
            media_descriptor: raw.media_descriptor,
            sectors_per_fat: raw.sectors_per_fat.get(),
            sectors_per_track: raw.sectors_per_track.get(),
            head_count: raw.head_count.get(),
            hidden_sectors: raw.hidden_sectors.get(),
            volume_id: raw.volume_id.get(),
            volume_label: raw.volume_label,
        };
        bpb.validate()?;

        if sector.get(BOOT_SIGNATURE_OFFSET..SECTOR_SIZE) != Some(&BOOT_SIGNATURE[..]) {
            log::warn!("boot sector is missing the 0x55AA signature");
        }
        Ok(bpb)
    }

    fn validate(&self) -> Result<(), BootSectorError> {
        if usize::from(self.bytes_per_sector) != SECTOR_SIZE {
            return Err(BootSectorError::UnsupportedSectorSize(self.bytes_per_sector));
        }
        if !self.sectors_per_cluster.is_power_of_two() {
            return Err(BootSectorError::InvalidSectorsPerCluster(self.sectors_per_cluster));
        }
        if self.reserved_sectors == 0 {
            return Err(BootSectorError::NoReservedSectors);
        }
        if self.fat_count == 0 {
            return Err(BootSectorError::NoFats);
        }
        if self.sectors_per_fat == 0 {
            return Err(BootSectorError::EmptyFat);
        }
        if self.root_dir_entries == 0 {
            return Err(BootSectorError::NoRootEntries);
        }
        let data_start = self.data_start().0;
        if data_start >= self.total_sectors {
            return Err(BootSectorError::RegionsExceedVolume {
                data_start,
                total_sectors: self.total_sectors,
            });
        }
        let clusters = self.data_clusters();
        if clusters + 2 > u32::from(FatEntry::BAD) {
            return Err(BootSectorError::TooManyClusters { clusters });
        }
        Ok(())
    }

    /// Encodes the geometry back into its on-disk form.
    pub fn to_raw(&self) -> BIOSParameterBlock {
        let (total_sectors, total_sectors_large) = match u16::try_from(self.total_sectors) {
            Ok(small) => (small, 0),
            Err(_) => (0, self.total_sectors),
        };
        BIOSParameterBlock {
            jmp_boot: [0xEB, 0x3C, 0x90],
            oem_name: self.oem_name,
            bytes_per_sector: self.bytes_per_sector.into(),
            sectors_per_cluster: self.sectors_per_cluster,
            reserved_sectors: self.reserved_sectors.into(),
            fat_count: self.fat_count,
            root_dir_entries: self.root_dir_entries.into(),
            total_sectors: total_sectors.into(),
            media_descriptor: self.media_descriptor,
            sectors_per_fat: self.sectors_per_fat.into(),
            sectors_per_track: self.sectors_per_track.into(),
            head_count: self.head_count.into(),
            hidden_sectors: self.hidden_sectors.into(),
            total_sectors_large: total_sectors_large.into(),
            drive_number: 0x80,
            reserved: 0,
            extended_signature: 0x29,
            volume_id: self.volume_id.into(),
            volume_label: self.volume_label,
            fs_type: *b"FAT16   ",
        }
    }

    /// Full sector 0 image: the encoded parameter block followed by zeroes
    /// and the boot signature.
    pub fn boot_sector(&self) -> [u8; SECTOR_SIZE] {
        let raw = self.to_raw();
        let mut sector = [0; SECTOR_SIZE];
        sector[..core::mem::size_of::<BIOSParameterBlock>()].copy_from_slice(raw.as_bytes());
        sector[BOOT_SIGNATURE_OFFSET..].copy_from_slice(&BOOT_SIGNATURE);
        sector
    }

    pub fn fat_start(&self) -> Lba {
        Lba(u32::from(self.reserved_sectors))
    }

    /// Sectors taken by all FAT copies together.
    pub fn fat_sectors(&self) -> u32 {
        u32::from(self.fat_count) * u32::from(self.sectors_per_fat)
    }

    /// First sector of FAT copy `copy`.
    pub fn fat_copy_start(&self, copy: u8) -> Lba {
        self.fat_start() + u32::from(copy) * u32::from(self.sectors_per_fat)
    }

    pub fn root_dir_start(&self) -> Lba {
        self.fat_start() + self.fat_sectors()
    }

    pub fn root_dir_sectors(&self) -> u32 {
        (u32::from(self.root_dir_entries) * DIRECTORY_ENTRY_SIZE as u32)
            .div_ceil(SECTOR_SIZE as u32)
    }

    pub fn data_start(&self) -> Lba {
        self.root_dir_start() + self.root_dir_sectors()
    }

    pub fn cluster_bytes(&self) -> u32 {
        u32::from(self.sectors_per_cluster) * SECTOR_SIZE as u32
    }

    /// Number of whole clusters that fit in the data region.
    pub fn data_clusters(&self) -> u32 {
        self.total_sectors.saturating_sub(self.data_start().0) / u32::from(self.sectors_per_cluster)
    }

    /// Number of 16 bit entries one FAT copy can hold, including the two
    /// reserved entries.
    pub fn fat_entry_count(&self) -> u32 {
        u32::from(self.sectors_per_fat) * (SECTOR_SIZE as u32 / 2)
    }

    /// First sector of a data cluster. Clusters are numbered from 2.
    pub fn cluster_lba(&self, cluster: Cluster) -> Lba {
        debug_assert!(cluster.0 >= 2, "cluster {cluster:?} is not a data cluster");
        let index = u32::from(cluster.0).saturating_sub(2);
        self.data_start() + index * u32::from(self.sectors_per_cluster)
    }

    /// Volume label with trailing padding removed.
    pub fn label(&self) -> &[u8] {
        let end = self
            .volume_label
            .iter()
            .rposition(|&b| b != b' ')
            .map_or(0, |i| i + 1);
        &self.volume_label[..end]
    }
}

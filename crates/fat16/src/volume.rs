use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::block::{BlockDevice, Lba, SECTOR_SIZE};
use crate::boot::BootParameterBlock;
use crate::cluster_io::ClusterIo;
use crate::directory::{DirectoryEntry, ShortName, DIRECTORY_ENTRY_SIZE};
use crate::error::FsError;
use crate::resize::Resizer;
use crate::table::{Cluster, FatTable};

/// Mount-time switches.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// Write FAT updates to every copy instead of only the first.
    pub mirror_fats: bool,
    /// Reject writes and truncation with [`FsError::ReadOnly`].
    pub read_only: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            mirror_fats: true,
            read_only: false,
        }
    }
}

/// Directory holding a record: the fixed root region or a cluster chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Directory {
    Root,
    Chain(Cluster),
}

/// Where a file's directory record lives, so its size can be rewritten.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EntryLocation {
    pub directory: Directory,
    /// Record index within the directory, counting every 32 byte slot.
    pub index: u32,
}

/// Handle to a file or directory on a mounted volume. Handles never cache
/// the file size; it is read from the directory record on every use.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeKind {
    RootDir,
    Subdir {
        first_cluster: Cluster,
        entry: EntryLocation,
    },
    File {
        first_cluster: Cluster,
        entry: EntryLocation,
    },
}

impl NodeKind {
    pub fn is_directory(&self) -> bool {
        !matches!(self, Self::File { .. })
    }

    fn directory(&self) -> Result<Directory, FsError> {
        match *self {
            Self::RootDir => Ok(Directory::Root),
            Self::Subdir { first_cluster, .. } => Ok(Directory::Chain(first_cluster)),
            Self::File { .. } => Err(FsError::NotADirectory),
        }
    }

    fn file(&self) -> Result<(Cluster, EntryLocation), FsError> {
        match *self {
            Self::File {
                first_cluster,
                entry,
            } => Ok((first_cluster, entry)),
            _ => Err(FsError::NotAFile),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
}

/// One visible entry as reported by [`Fat16Volume::enumerate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub entry_type: EntryType,
    pub size: u32,
}

impl From<&DirectoryEntry> for DirEntryInfo {
    fn from(entry: &DirectoryEntry) -> Self {
        Self {
            name: entry.display_name(),
            entry_type: if entry.is_directory() {
                EntryType::Directory
            } else {
                EntryType::File
            },
            size: entry.size,
        }
    }
}

/// A mounted FAT16 volume. Owns the device, the cached FAT and a snapshot
/// of the root directory.
#[derive(Debug)]
pub struct Fat16Volume<D> {
    device: D,
    bpb: BootParameterBlock,
    table: FatTable,
    root: Vec<DirectoryEntry>,
    options: MountOptions,
}

impl<D: BlockDevice> Fat16Volume<D> {
    pub fn mount(device: D, options: MountOptions) -> Result<Self, FsError> {
        let mut sector = [0; SECTOR_SIZE];
        device.read_sectors(Lba(0), &mut sector)?;
        let bpb = BootParameterBlock::parse(&sector)?;

        let table = FatTable::load(&device, &bpb, options.mirror_fats)?;

        let mut raw_root = vec![0; bpb.root_dir_sectors() as usize * SECTOR_SIZE];
        device.read_sectors(bpb.root_dir_start(), &mut raw_root)?;
        let root = raw_root
            .chunks_exact(DIRECTORY_ENTRY_SIZE)
            .take(usize::from(bpb.root_dir_entries))
            .filter_map(DirectoryEntry::parse)
            .collect();

        log::debug!(
            "mounted FAT16 volume {:?}: {} clusters of {} bytes, data at {:?}, {} free",
            String::from_utf8_lossy(bpb.label()),
            bpb.data_clusters(),
            bpb.cluster_bytes(),
            bpb.data_start(),
            table.free_count(),
        );

        Ok(Self {
            device,
            bpb,
            table,
            root,
            options,
        })
    }

    pub fn bpb(&self) -> &BootParameterBlock {
        &self.bpb
    }

    pub fn options(&self) -> MountOptions {
        self.options
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    /// Number of unallocated data clusters.
    pub fn free_clusters(&self) -> usize {
        self.table.free_count()
    }

    pub fn root(&self) -> NodeKind {
        NodeKind::RootDir
    }

    /// Finds `name` among the visible entries of `dir`. Matching is case
    /// insensitive since names are compared in their 8.3 form.
    pub fn lookup(&self, dir: &NodeKind, name: &str) -> Result<NodeKind, FsError> {
        let directory = dir.directory()?;
        let wanted = ShortName::encode(name)?;

        let mut found = None;
        self.iter_directory(directory, |index, entry| {
            if entry.is_live() && entry.name == wanted {
                found = Some(Self::node_for(directory, index, entry));
                return false;
            }
            true
        })?;
        found.ok_or(FsError::NotFound)
    }

    /// Resolves a `/` separated path starting at the root.
    pub fn resolve(&self, path: &str) -> Result<NodeKind, FsError> {
        path.split('/')
            .filter(|component| !component.is_empty())
            .try_fold(self.root(), |node, component| self.lookup(&node, component))
    }

    /// The `index`-th visible entry of `dir`, or `None` past the last one.
    pub fn enumerate(&self, dir: &NodeKind, index: u32) -> Result<Option<DirEntryInfo>, FsError> {
        let directory = dir.directory()?;

        let mut remaining = index;
        let mut found = None;
        self.iter_directory(directory, |_, entry| {
            if !entry.is_live() {
                return true;
            }
            if remaining == 0 {
                found = Some(DirEntryInfo::from(entry));
                return false;
            }
            remaining -= 1;
            true
        })?;
        Ok(found)
    }

    /// Current size in bytes. Directories report 0.
    pub fn size(&self, node: &NodeKind) -> Result<u32, FsError> {
        match node {
            NodeKind::File { entry, .. } => Ok(self.entry_at(*entry)?.size),
            _ => Ok(0),
        }
    }

    /// Reads from `offset`, clamped to the file size. Returns the number of
    /// bytes placed at the start of `buf`.
    pub fn read(&self, node: &NodeKind, offset: u32, buf: &mut [u8]) -> Result<usize, FsError> {
        let (first_cluster, entry) = node.file()?;
        let size = self.entry_at(entry)?.size;
        if offset >= size {
            return Ok(0);
        }
        let len = buf.len().min((size - offset) as usize);
        if len == 0 {
            return Ok(0);
        }
        ClusterIo::new(&self.device, &self.bpb, &self.table)
            .read(first_cluster, offset, &mut buf[..len])
    }

    /// Writes `data` at `offset`, growing the file first when the write
    /// ends past its current size.
    pub fn write(&mut self, node: &NodeKind, offset: u32, data: &[u8]) -> Result<usize, FsError> {
        self.check_writable()?;
        let (first_cluster, entry) = node.file()?;
        if data.is_empty() {
            return Ok(0);
        }

        let len = u32::try_from(data.len()).map_err(|_| FsError::FileTooLarge)?;
        let end = offset.checked_add(len).ok_or(FsError::FileTooLarge)?;
        let size = self.entry_at(entry)?.size;
        if end > size {
            self.resize_file(first_cluster, entry, size, end)?;
        }
        ClusterIo::new(&self.device, &self.bpb, &self.table)
            .write(first_cluster, offset, data)
    }

    /// Sets the file size to `size`, allocating or freeing clusters as
    /// needed. Truncating to zero is rejected since every file keeps at
    /// least one cluster.
    pub fn truncate(&mut self, node: &NodeKind, size: u32) -> Result<u32, FsError> {
        self.check_writable()?;
        let (first_cluster, entry) = node.file()?;
        if size == 0 {
            return Err(FsError::EmptyFileRejected);
        }
        let old_size = self.entry_at(entry)?.size;
        self.resize_file(first_cluster, entry, old_size, size)
    }

    fn check_writable(&self) -> Result<(), FsError> {
        if self.options.read_only {
            return Err(FsError::ReadOnly);
        }
        Ok(())
    }

    fn resize_file(
        &mut self,
        first_cluster: Cluster,
        entry: EntryLocation,
        old_size: u32,
        new_size: u32,
    ) -> Result<u32, FsError> {
        let size = Resizer::new(&self.device, &self.bpb, &mut self.table)
            .resize(first_cluster, old_size, new_size)?;
        self.set_entry_size(entry, size)?;
        Ok(size)
    }

    fn node_for(directory: Directory, index: u32, entry: &DirectoryEntry) -> NodeKind {
        let location = EntryLocation { directory, index };
        let first_cluster = Cluster(entry.first_cluster);
        match (entry.is_directory(), entry.first_cluster) {
            // ".." of a top level directory points at cluster 0.
            (true, 0) => NodeKind::RootDir,
            (true, _) => NodeKind::Subdir {
                first_cluster,
                entry: location,
            },
            (false, _) => NodeKind::File {
                first_cluster,
                entry: location,
            },
        }
    }

    /// Calls `func` with the index and contents of every record in
    /// `directory` up to the end-of-directory marker. Iteration stops early
    /// when `func` returns `false`.
    fn iter_directory<F>(&self, directory: Directory, mut func: F) -> Result<(), FsError>
    where
        F: FnMut(u32, &DirectoryEntry) -> bool,
    {
        match directory {
            Directory::Root => {
                for (index, entry) in self.root.iter().enumerate() {
                    if entry.is_end_of_directory() || !func(index as u32, entry) {
                        break;
                    }
                }
            }
            Directory::Chain(first) => {
                let mut buf = vec![0; self.bpb.cluster_bytes() as usize];
                let mut index = 0;
                for cluster in self.table.chain(first) {
                    self.device
                        .read_sectors(self.bpb.cluster_lba(cluster?), &mut buf)?;
                    for record in buf.chunks_exact(DIRECTORY_ENTRY_SIZE) {
                        let Some(entry) = DirectoryEntry::parse(record) else {
                            return Ok(());
                        };
                        if entry.is_end_of_directory() || !func(index, &entry) {
                            return Ok(());
                        }
                        index += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Sector holding the record at `location`, and the record's byte
    /// offset within it.
    fn entry_sector(&self, location: EntryLocation) -> Result<(Lba, usize), FsError> {
        let byte = location.index as usize * DIRECTORY_ENTRY_SIZE;
        match location.directory {
            Directory::Root => {
                if location.index >= u32::from(self.bpb.root_dir_entries) {
                    return Err(FsError::NotFound);
                }
                let lba = self.bpb.root_dir_start() + (byte / SECTOR_SIZE) as u32;
                Ok((lba, byte % SECTOR_SIZE))
            }
            Directory::Chain(first) => {
                let cluster_bytes = self.bpb.cluster_bytes() as usize;
                let cluster = self
                    .table
                    .walk(first, byte / cluster_bytes)?
                    .ok_or(FsError::NotFound)?;
                let within = byte % cluster_bytes;
                let lba = self.bpb.cluster_lba(cluster) + (within / SECTOR_SIZE) as u32;
                Ok((lba, within % SECTOR_SIZE))
            }
        }
    }

    fn entry_at(&self, location: EntryLocation) -> Result<DirectoryEntry, FsError> {
        if location.directory == Directory::Root {
            return self
                .root
                .get(location.index as usize)
                .cloned()
                .ok_or(FsError::NotFound);
        }
        let (lba, offset) = self.entry_sector(location)?;
        let mut sector = [0; SECTOR_SIZE];
        self.device.read_sectors(lba, &mut sector)?;
        DirectoryEntry::parse(&sector[offset..]).ok_or(FsError::NotFound)
    }

    /// Rewrites the size field of the record on disk, and in the root
    /// snapshot when the record lives there.
    fn set_entry_size(&mut self, location: EntryLocation, size: u32) -> Result<(), FsError> {
        let (lba, offset) = self.entry_sector(location)?;
        let mut sector = [0; SECTOR_SIZE];
        self.device.read_sectors(lba, &mut sector)?;
        DirectoryEntry::patch_size(&mut sector[offset..], size)
            .ok_or(FsError::NotFound)?;
        self.device.write_sectors(lba, &sector)?;

        if location.directory == Directory::Root {
            if let Some(entry) = self.root.get_mut(location.index as usize) {
                entry.size = size;
            }
        }
        Ok(())
    }
}

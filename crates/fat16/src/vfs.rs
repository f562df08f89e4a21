use alloc::sync::Arc;

use spin::{Mutex, MutexGuard};

use crate::block::BlockDevice;
use crate::error::FsError;
use crate::volume::{DirEntryInfo, Fat16Volume, NodeKind};

/// Capability set a VFS layer drives a mounted file system through.
/// Failures surface as `None` or a zero count; the cause is logged.
pub trait FileSystemOps {
    type Node: Clone;

    fn root(&self) -> Self::Node;

    fn find_entry(&self, dir: &Self::Node, name: &str) -> Option<Self::Node>;

    fn read_dir_entry_at(&self, dir: &Self::Node, index: u32) -> Option<DirEntryInfo>;

    fn read(&self, node: &Self::Node, offset: u32, buf: &mut [u8]) -> u32;

    fn write(&self, node: &Self::Node, offset: u32, data: &[u8]) -> u32;

    fn truncate(&self, node: &Self::Node, size: u32) -> u32;

    fn traverse_path(&self, path: &str) -> Option<Self::Node> {
        let mut node = self.root();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            node = self.find_entry(&node, component)?;
        }
        Some(node)
    }
}

/// A volume behind a lock, shareable between VFS users.
#[derive(Debug)]
pub struct SharedVolume<D> {
    inner: Arc<Mutex<Fat16Volume<D>>>,
}

impl<D> Clone for SharedVolume<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: BlockDevice> SharedVolume<D> {
    pub fn new(volume: Fat16Volume<D>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(volume)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Fat16Volume<D>> {
        self.inner.lock()
    }
}

fn report(op: &str, err: FsError) {
    match err {
        FsError::NotFound => log::debug!("{op}: {err}"),
        _ => log::warn!("{op}: {err}"),
    }
}

fn or_zero(op: &str, result: Result<usize, FsError>) -> u32 {
    result.map_or_else(
        |err| {
            report(op, err);
            0
        },
        |n| n as u32,
    )
}

impl<D: BlockDevice> FileSystemOps for SharedVolume<D> {
    type Node = NodeKind;

    fn root(&self) -> NodeKind {
        self.lock().root()
    }

    fn find_entry(&self, dir: &NodeKind, name: &str) -> Option<NodeKind> {
        self.lock()
            .lookup(dir, name)
            .map_err(|err| report("find_entry", err))
            .ok()
    }

    fn read_dir_entry_at(&self, dir: &NodeKind, index: u32) -> Option<DirEntryInfo> {
        self.lock()
            .enumerate(dir, index)
            .map_err(|err| report("read_dir_entry_at", err))
            .ok()
            .flatten()
    }

    fn read(&self, node: &NodeKind, offset: u32, buf: &mut [u8]) -> u32 {
        or_zero("read", self.lock().read(node, offset, buf))
    }

    fn write(&self, node: &NodeKind, offset: u32, data: &[u8]) -> u32 {
        or_zero("write", self.lock().write(node, offset, data))
    }

    fn truncate(&self, node: &NodeKind, size: u32) -> u32 {
        let result = self.lock().truncate(node, size);
        or_zero("truncate", result.map(|size| size as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestImage;

    fn shared_image() -> (TestImage, SharedVolume<crate::MemoryDisk>) {
        let image = TestImage::small();
        image.link_chain(&[2]);
        image.put_root_entry(
            0,
            &crate::DirectoryEntry::new(
                crate::ShortName(*b"DOCS       "),
                crate::Attributes::SUBDIRECTORY,
                2,
                0,
            ),
        );
        image.put_dir_entry(
            &[2],
            0,
            &crate::DirectoryEntry::new(
                crate::ShortName(*b"NOTE    TXT"),
                crate::Attributes::ARCHIVE,
                3,
                0,
            ),
        );
        image.link_chain(&[3]);
        let volume = SharedVolume::new(image.mount());
        (image, volume)
    }

    #[test]
    fn failures_become_sentinels() {
        let (_image, fs) = shared_image();
        let root = fs.root();

        assert_eq!(fs.find_entry(&root, "nothere.txt"), None);
        assert_eq!(fs.find_entry(&root, "far.too.many"), None);
        assert_eq!(fs.read_dir_entry_at(&root, 1), None);
        assert_eq!(fs.read(&root, 0, &mut [0; 8]), 0);
        assert_eq!(fs.write(&root, 0, b"x"), 0);

        let note = fs.traverse_path("/docs/note.txt").unwrap();
        assert_eq!(fs.truncate(&note, 0), 0);
        assert_eq!(fs.traverse_path("/docs/note.txt/deeper"), None);
    }

    #[test]
    fn clones_share_one_volume() {
        let (image, fs) = shared_image();
        let other = fs.clone();
        let note = fs.traverse_path("docs/note.txt").unwrap();

        assert_eq!(other.write(&note, 0, b"shared"), 6);
        let mut buf = [0; 6];
        assert_eq!(fs.read(&note, 0, &mut buf), 6);
        assert_eq!(&buf, b"shared");
        assert_eq!(fs.truncate(&note, 3), 3);
        assert_eq!(image.dir_entry(&[2], 0).size, 3);

        let docs = fs.traverse_path("docs").unwrap();
        let info = fs.read_dir_entry_at(&docs, 0).unwrap();
        assert_eq!(info.name, "note.txt");
        assert_eq!(info.size, 3);
        assert_eq!(fs.lock().free_clusters(), image.fat_table().free_count());
    }
}

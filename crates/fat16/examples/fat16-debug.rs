use std::fs::File;

use fat16::{
    BIOSParameterBlock, EntryType, Fat16Volume, MemoryDisk, MountOptions, NodeKind, SECTOR_SIZE,
};
use genio::Read;
use zerocopy::FromBytes;

/// Dummy type to help us implement a logger using the `log` crate.
struct Logger;

static LOGGER: Logger = Logger;

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Level comes from `FAT16_LOG` (error, warn, info, debug, trace).
fn init_logging() {
    let level = std::env::var("FAT16_LOG")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(log::LevelFilter::Info);
    log::set_logger(&LOGGER).unwrap();
    log::set_max_level(level);
}

fn read_image(disk_file: &str) -> Vec<u8> {
    let file = File::open(disk_file).expect("failed to open disk file");
    let mut reader = genio::std_impls::GenioIo::new(file);

    let mut image = vec![0; SECTOR_SIZE];
    reader
        .read_exact(&mut image[..])
        .expect("failed to read boot sector");
    let bios_param_block = BIOSParameterBlock::read_from_prefix(&image)
        .expect("boot sector too short");
    println!("BIOS parameter block: {bios_param_block:#X?}");

    let mut chunk = vec![0; 64 * SECTOR_SIZE];
    loop {
        let n = reader.read(&mut chunk).expect("failed to read disk file");
        if n == 0 {
            break;
        }
        image.extend_from_slice(&chunk[..n]);
    }
    image
}

fn list(volume: &Fat16Volume<MemoryDisk>, dir: &NodeKind) {
    let mut index = 0;
    while let Some(entry) = volume
        .enumerate(dir, index)
        .expect("failed to read directory")
    {
        let marker = match entry.entry_type {
            EntryType::Directory => "/",
            EntryType::File => "",
        };
        println!("{:>10}  {}{marker}", entry.size, entry.name);
        index += 1;
    }
}

fn main() {
    init_logging();

    // Get command line arguments: a FAT16 disk file and an optional path
    let args: Vec<String> = std::env::args().collect();
    let (disk_file, path) = match &args[..] {
        [_, disk_file] => (disk_file, "/"),
        [_, disk_file, path] => (disk_file, path.as_str()),
        _ => {
            eprintln!("Usage: {} <disk_file> [path]", args[0]);
            std::process::exit(1);
        }
    };

    println!("Reading FAT16 disk file: {disk_file}");
    let disk = MemoryDisk::from_bytes(read_image(disk_file));
    let options = MountOptions {
        read_only: true,
        ..MountOptions::default()
    };
    let volume = Fat16Volume::mount(disk, options)
        .expect("failed to mount volume");
    let bpb = volume.bpb();
    println!(
        "{} data clusters of {} bytes, {} free",
        bpb.data_clusters(),
        bpb.cluster_bytes(),
        volume.free_clusters()
    );

    let node = volume.resolve(path).expect("failed to resolve path");
    if node.is_directory() {
        list(&volume, &node);
        return;
    }

    let size = volume.size(&node).expect("failed to read file size");
    let mut contents = vec![0; size as usize];
    let n = volume
        .read(&node, 0, &mut contents)
        .expect("failed to read file");
    print!("{}", String::from_utf8_lossy(&contents[..n]));
}

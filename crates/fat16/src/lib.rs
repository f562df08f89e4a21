//! FAT16 filesystem engine. Parses the boot sector, walks and edits the
//! file allocation table, decodes 8.3 directories and moves file data in
//! and out of cluster chains on any sector-addressed [`BlockDevice`].
//!
//! # Resources
//!
//! - <https://en.wikipedia.org/wiki/Design_of_the_FAT_file_system>
//! - <https://academy.cba.mit.edu/classes/networking_communications/SD/FAT.pdf>
//! - <https://wiki.osdev.org/FAT>

#![cfg_attr(not(test), no_std)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cargo_common_metadata,
    clippy::implicit_hasher,
    clippy::implicit_return,
    clippy::missing_const_for_fn,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::multiple_crate_versions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::suboptimal_flops,
    clippy::wildcard_imports
)]

extern crate alloc;

mod block;
mod boot;
mod cluster_io;
mod directory;
mod error;
mod format;
mod resize;
mod table;
mod vfs;
mod volume;

#[cfg(test)]
mod testing;

pub use block::*;
pub use boot::*;
pub use cluster_io::*;
pub use directory::*;
pub use error::*;
pub use format::*;
pub use resize::*;
pub use table::*;
pub use vfs::*;
pub use volume::*;

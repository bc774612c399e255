//! FS-CORE: the user-space file server (§4.9). Runs as an ordinary task of
//! [`crate::abi::syscall`]-visible type `Fs`, owning the IDE device and
//! backing its file-block operations with the page-fault-filled disk cache
//! in [`bc`].

pub mod bc;
pub mod fs;

pub use bc::{FsError, FsResult, IdeDevice};
pub use fs::{File, FileSystem, FileType, FS_MAGIC, NDIRECT, NINDIRECT};

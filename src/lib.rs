/*!
# imgmanager

A Rust library for reading, constructing and re-emitting the floppy and
fixed-disk images used by early PC-compatible operating systems, with
FAT12/FAT16 filesystem support.

## Features

- Parse raw IMG/IMA sector streams, DSK-headered buffers, PSI containers and
  JSON images (legacy and extended flavors) into one cylinder/head/sector grid
- Geometry resolution with BPB reconciliation and repair, MBR partition
  probing, XDF layouts and capacity-table fallbacks
- FAT12/FAT16 volume decoding: partitions, FAT chains, directory trees, and
  per-sector file back-references
- FAT volume synthesis: pack a host file tree into a bootable image
- Run-length compressed sector storage with per-sector modify tracking
- DOS-style directory listings and file manifests

## Quick Start

```rust,no_run
use imgmanager::{DiskImage, ImageOptions};

// Open an existing image
let mut image = DiskImage::open("disk.img", &ImageOptions::default())?;

// Decode the FAT volumes and print a directory listing
image.build_tables(false)?;
println!("{}", imgmanager::directory_listing(&image));

// Re-emit the image as extended JSON
let json = image.to_json(None)?;

// Synthesize a bootable 160 KB floppy from scratch
use imgmanager::FileDescriptor;
let files = vec![FileDescriptor::file("HELLO.TXT", b"Hello, world!".to_vec())];
let built = imgmanager::build_volume_from_files("hello", &files, 160)?;
built.save("hello.img")?;
# Ok::<(), imgmanager::ImgError>(())
```

## Modules

- `bytes`: endian-aware views over byte buffers
- `format`: BPB handling, geometry resolution, format constants
- `image`: core image data structures (DiskImage, Cylinder, Track, Sector)
- `io`: parsers and serializers for the supported containers
- `fs`: FAT volume decoding and synthesis
- `listing`: directory listing and manifest presenters
- `error`: error types and Result alias
*/

#![warn(missing_docs)]

/// Endian-aware views over byte buffers
pub mod bytes;
/// Error types and Result alias
pub mod error;
/// BPB handling, geometry resolution and format constants
pub mod format;
/// FAT volume decoding and synthesis
pub mod fs;
/// Core image data structures
pub mod image;
/// Parsers and serializers for the supported containers
pub mod io;
/// Directory listing and manifest presenters
pub mod listing;

// Re-export common types
pub use bytes::{ByteView, ByteViewMut};
pub use error::{ImgError, Result};
pub use format::{Bpb, Geometry, SourceFormat};
pub use fs::{build_volume_from_files, FileDescriptor, FileInfo, VolInfo};
pub use image::{DiskImage, DiskImageBuilder, Sector, SectorId, Track};
pub use io::{ImageOptions, SectorEdit, SectorOverride};
pub use listing::{directory_listing, file_manifest};

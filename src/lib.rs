//! # DICOM-volume-render library
//!
//! This crate reconstructs a volume from a set of DICOM cross-sections and
//! renders it by ray marching.
//!
//! The pipeline has three stages:
//!  - Decoding: every file is read with a small tag-stream decoder that only
//!    interprets the attributes a volume needs (rows, columns, bit depth,
//!    window, instance number, pixel data). Damaged or non-standard streams
//!    are recovered according to a [`RecoveryPolicy`]. Files are decoded in
//!    parallel using rayon.
//!  - Assembly: slices are ordered by instance number (or by name when any
//!    is missing), stacked and normalized to 8 bits with one global range.
//!    The result is packed into a 2D [`Atlas`].
//!  - Rendering: the atlas is ray marched with front to back compositing,
//!    either on the CPU ([`VolumeRenderer`]) or in a wgpu compute shader
//!    ([`GpuCompositor`]).
//!
//!  DICOM files are assumed to have the following attributes:
//!   - Little endian transfer syntax, explicit VR (implicit VR elements are
//!     tolerated)
//!   - Uncompressed pixel data
//!   - No multiframe
//!   - Images from the same series
//!
//! # Examples
//!
//! ## Rendering a directory of DICOM files
//!
//! ```no_run
//! # use dicom_volume_render::{MarchConfig, RecoveryPolicy, VolumeLoader, VolumeRenderer};
//! let volume = VolumeLoader::load_from_directory("dicom", RecoveryPolicy::Tolerant)
//!     .expect("should have loaded files from directory");
//! let renderer = VolumeRenderer::new(512, 512, MarchConfig::default())
//!     .expect("should have created renderer");
//! renderer.load(&volume);
//! renderer.set_threshold(20.0);
//! let frame = renderer.render();
//! frame.to_image().expect("frame should convert").save("result.png");
//! ```

pub mod atlas;
pub mod compositor;
pub mod decoder;
pub mod enums;
pub mod gpu_compositor;
pub mod locator;
pub mod metadata;
pub mod params;
pub mod renderer;
pub mod slice;
pub mod tags;
pub mod volume;
pub mod volume_loader;

pub use atlas::{Atlas, AtlasLayout};
pub use compositor::{Frame, RayMarchCompositor};
pub use decoder::{Decoder, Diagnostic, Element};
pub use enums::{Processor, RecoveryPolicy};
pub use gpu_compositor::{GpuCompositor, WGPU};
pub use params::{MarchConfig, RenderParameters};
pub use renderer::{RenderError, VolumeRenderer};
pub use slice::{Samples, SliceError, SliceRecord};
pub use volume::Volume;
pub use volume_loader::{VolumeLoader, VolumeLoaderError};

//! # cosmics
//!
//! Analysis utilities for cosmic-ray studies with the CALICE SiW-ECAL.
//! The library covers the I/O side of the analysis: loading triggered events
//! from a columnar build file, caching each trigger selection to disk so
//! repeated runs skip the expensive scan, and building the per-channel mask
//! grid that records which detector cells were disabled during the run.
//!
//! ## Event stores
//!
//! Build files are HDF5 files with one group per event table. Scalar columns
//! (one value per event) are plain 1-D datasets; jagged columns (one
//! variable-length sequence per event, such as the hit coordinates) are a
//! flat value dataset plus a `<name>_offsets` dataset. [`store::EventStore`]
//! streams such a table in batches bounded by a byte budget like `"250 MB"`,
//! so arbitrarily large build files are processed with roughly one batch of
//! memory.
//!
//! ## Triggered-event cache
//!
//! [`cache::TriggeredCache`] evaluates a trigger expression such as
//! `nhit_slab > 7` against every event and persists the selected rows under a
//! file name derived from the trigger text. Only full, unbounded scans are
//! cached; bounded requests always rescan, because their result depends on
//! the truncation point.
//!
//! ## Channel mask
//!
//! [`mask::Mask`] scans the hit coordinates of the build file over a fixed
//! 3-D grid of channel positions and records the first observed masked flag
//! per channel. The grid is persisted as a plain-text dump (see
//! [`mask::write_grid`]) together with one diagnostic image per layer.
//!
//! ## Configuration
//!
//! Both components are driven by a YAML [`config::Config`]; the
//! `cosmics_cli` crate wires them to the command line. The YAML format of a
//! configuration file is as follows:
//!
//! ```yml
//! build_file: data/raw/Run_ILC_08042020_cosmic_it15_Ascii_build.h5
//! build_tree: ecal
//! triggered_path: data/triggered
//! mask_path: data/mask
//! step_size: 100 MB
//! trigger: nhit_slab > 7
//! entry_stop: null
//! axes:
//!   x: [...]
//!   y: [...]
//!   z: [...]
//! ```
pub mod cache;
pub mod config;
pub mod error;
pub mod filter;
pub mod mask;
pub mod memory;
pub mod plot;
pub mod status;
pub mod store;
pub mod table;

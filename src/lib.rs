//! Tilegrid is a library for distributed data on block-structured grids. A
//! rectangular domain is split into tiles, each owned by one rank, and every
//! tile carries a layer of guard cells. The library plans the messages that
//! fill guard cells from neighbouring tiles and copy data between layouts,
//! caches those plans so that repeated calls skip the planning, and builds a
//! geometric multigrid solver on top of the resulting data motion.

pub mod bottom;
pub mod box_array;
pub mod config;
pub mod context;
pub mod distribution_map;
pub mod error;
pub mod index_space;
pub mod linop;
pub mod message;
pub mod multigrid;
pub mod patch;
pub mod patch_array;
pub mod plan;
pub mod plan_cache;
pub mod planner;
pub mod poisson;

pub use error::{Error, Result};

pub mod accumulator;
pub mod contour;
pub mod error;
pub mod hierarchy;
pub mod label_raster;
pub mod labeler;
pub mod materializer;
pub mod tile_source;
pub mod transform;

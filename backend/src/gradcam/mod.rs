pub mod colormap;
pub mod render;

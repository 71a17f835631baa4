pub mod buffer_space;
pub mod memory_range;
pub mod range_tree;

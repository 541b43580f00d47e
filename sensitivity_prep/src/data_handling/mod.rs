pub mod annotation;
pub mod mutations;
pub mod screen;
pub mod target_list;

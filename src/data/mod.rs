pub mod collate;
pub mod mnist;

pub mod connectivity;
pub mod core;
pub mod permissions;
pub mod records;
pub mod scan;
pub mod sync;

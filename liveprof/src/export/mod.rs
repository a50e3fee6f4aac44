pub mod dump;

pub use dump::{load_dump, read_dump, save_dump, write_dump};

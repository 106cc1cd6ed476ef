pub mod shelf;

pub use shelf::ShelfPlugin;

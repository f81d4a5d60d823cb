mod router;
pub mod types;

pub use router::PlayerRouter;

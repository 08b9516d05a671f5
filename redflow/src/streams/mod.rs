//! Structural combinators over document streams.
//!
//! None of these look inside the documents they move, so none of them can
//! fail on domain content. They are generic over any iterator; the
//! document pipeline uses them with [`crate::core::DocStream`].

mod peek;
mod tee;
mod unique;
mod zip;

pub use peek::{peek, peek_n, Replay};
pub use tee::{tee, tee_with_threshold, TeeBranch};
pub use unique::{unique, Unique, UniqueIter};
pub use zip::{zip, zip_latest, Latest, Zip, ZipLatest};

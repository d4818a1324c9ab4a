//! Wire DTOs of the HTTP surface.

pub mod images;

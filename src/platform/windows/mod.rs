pub(crate) mod d3d11;
pub(crate) mod duplication;
pub(crate) mod surface;

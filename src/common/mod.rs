pub(crate) mod bits;
pub(crate) mod buffer;
pub(crate) mod frame;
pub(crate) mod phys;

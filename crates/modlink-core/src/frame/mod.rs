//! Frame-level helpers shared by the RTU, ASCII and TCP codecs.

pub mod ascii;
pub mod rtu;
pub mod tcp;

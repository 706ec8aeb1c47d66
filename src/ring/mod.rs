pub mod basis;
pub mod galois;
pub mod modular;
pub mod ntt;
pub mod poly;
pub mod rns;

pub use basis::{BaseConverter, Extender};
pub use modular::{barrett_reduce, mod_add, mod_mul, mod_neg, mod_sub, montgomery_reduce};
pub use ntt::{NttPoly, Plan};
pub use poly::CoeffPoly;
pub use rns::{QpPoly, RnsBasis, RnsPoly};

pub mod crp;
pub mod gaussian;
pub mod uniform;

pub use crp::CrpGenerator;
pub use gaussian::{sample_gaussian_box_muller, sample_gaussian_signed, CdtSampler};
pub use uniform::{
    sample_ternary_hamming, sample_ternary_signed, sample_uniform_poly, sample_uniform_rns,
};

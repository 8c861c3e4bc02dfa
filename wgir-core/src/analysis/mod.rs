//! Analyses feeding backend decisions.

pub mod subgroup_matrix;

pub use subgroup_matrix::{
    gather_subgroup_matrix_info, SubgroupMatrixConfig, SubgroupMatrixInfo, SubgroupMatrixMultiply,
    SubgroupMatrixType,
};

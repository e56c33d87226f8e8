//! L5 — the DOF-projection kernel: bidirectional transfer of
//! displacement, mass, moment of inertia and mass-weighted position
//! quantities between macro degrees of freedom (12 per node: three
//! translations plus a nine-component micro-deformation) and micro node
//! displacements.
//!
//! Grounded function-by-function on `original_source/DOFProjection.{h,cpp}`.
//! Where the retrieved `.cpp` only carried the two `addMacroDomain...`
//! bodies, the remaining accumulation functions are implemented directly
//! from the closed-form accumulation rules of spec.md §4.5.2-§4.5.4,
//! using the same "per-domain weight/xi/shape-function arrays, global
//! mass/position/displacement arrays" indexing convention the retrieved
//! function bodies establish.
//!
//! Indexing convention used throughout this module (see DESIGN.md):
//! - `domain_*_node_indices` are *global* micro/macro ids.
//! - `domain_micro_weights`, `domain_reference_xis`,
//!   `domain_micro_shape_functions` are *domain-local* arrays, one entry
//!   (or `dim`/`dim*dim` block) per position in `domain_micro_node_indices`
//!   / the cartesian product with `domain_macro_node_indices`.
//! - `micro_masses`/`micro_volumes`/`micro_densities`/`micro_displacements`/
//!   `micro_positions` are *global* arrays indexed by the micro id found
//!   in `domain_micro_node_indices`.

pub mod operators;

use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;

/// Maps a global micro/macro id to a compact local id. A missing key
/// means "skip this node's contribution" (spec.md §3, DESIGN NOTES item
/// "caller-supplied local-index maps").
pub type LocalIndexMap = HashMap<usize, usize>;

fn resolve_index(global_id: usize, map: Option<&LocalIndexMap>) -> Option<usize> {
    match map {
        Some(m) => m.get(&global_id).copied(),
        None => Some(global_id),
    }
}

fn mass_at(
    global_id: usize,
    micro_masses: &[f64],
    context: &'static str,
) -> CoreResult<f64> {
    micro_masses.get(global_id).copied().ok_or_else(|| {
        CoreError::index_out_of_range(
            context,
            format!("micro node {global_id} has no entry in the mass array"),
        )
    })
}

/// Computes `mass = volume * density` per micro node, validating that the
/// two arrays have the same length. Shared by every accumulation function
/// that offers both a precomputed-mass and a volume/density overload, so
/// the two are identical by construction when `mass = volume * density`
/// (spec.md §9 Open Question ii).
pub fn mass_from_volume_density(volumes: &[f64], densities: &[f64]) -> CoreResult<Vec<f64>> {
    if volumes.len() != densities.len() {
        return Err(CoreError::shape_mismatch(
            "projection::mass_from_volume_density",
            format!(
                "volumes has {} entries but densities has {}",
                volumes.len(),
                densities.len()
            ),
        ));
    }
    Ok(volumes.iter().zip(densities).map(|(v, rho)| v * rho).collect())
}

// ---------------------------------------------------------------------
// 4.5.1 Macro -> micro displacement
// ---------------------------------------------------------------------

/// Adds the contribution of a macro domain's deformation to the micro
/// scale, given the already-interpolated translation `u` (length `dim`)
/// and micro-deformation `phi` (length `dim*dim`, row-major) at the
/// domain's local center of mass.
pub fn add_macro_domain_displacement_to_micro(
    dim: usize,
    domain_micro_node_indices: &[usize],
    u: &[f64],
    phi: &[f64],
    domain_reference_xis: &[f64],
    domain_micro_weights: &[f64],
    micro_displacements: &mut [f64],
    micro_node_to_local_index: Option<&LocalIndexMap>,
) -> CoreResult<()> {
    const CTX: &str = "projection::add_macro_domain_displacement_to_micro";

    if domain_micro_weights.len() != domain_micro_node_indices.len() {
        return Err(CoreError::shape_mismatch(
            CTX,
            format!(
                "{} micro weights for {} micro nodes",
                domain_micro_weights.len(),
                domain_micro_node_indices.len()
            ),
        ));
    }
    if domain_reference_xis.len() != dim * domain_micro_node_indices.len() {
        return Err(CoreError::shape_mismatch(
            CTX,
            format!(
                "{} xi components for {} micro nodes at dim {dim}",
                domain_reference_xis.len(),
                domain_micro_node_indices.len()
            ),
        ));
    }
    if u.len() != dim || phi.len() != dim * dim {
        return Err(CoreError::shape_mismatch(
            CTX,
            format!("u must have length {dim} and phi length {}", dim * dim),
        ));
    }

    for (i, &global_m) in domain_micro_node_indices.iter().enumerate() {
        let dest = match resolve_index(global_m, micro_node_to_local_index) {
            Some(d) => d,
            None => continue,
        };
        if dim * (dest + 1) > micro_displacements.len() {
            return Err(CoreError::index_out_of_range(
                CTX,
                format!("micro displacement buffer too small for node {dest}"),
            ));
        }

        let xi = &domain_reference_xis[dim * i..dim * i + dim];
        let w = domain_micro_weights[i];

        for row in 0..dim {
            let mut q = u[row];
            for col in 0..dim {
                q += phi[row * dim + col] * xi[col];
            }
            micro_displacements[dim * dest + row] += w * q;
        }
    }

    Ok(())
}

/// Same as [`add_macro_domain_displacement_to_micro`], but interpolates
/// `u`/`phi` from the full macro DOF vector and the macro domain's
/// interpolation function values first.
#[allow(clippy::too_many_arguments)]
pub fn add_macro_domain_displacement_to_micro_from_dof(
    dim: usize,
    domain_micro_node_indices: &[usize],
    domain_macro_node_indices: &[usize],
    domain_reference_xis: &[f64],
    domain_macro_interpolation_function_values: &[f64],
    n_macro_dof: usize,
    macro_dof_vector: &[f64],
    domain_micro_weights: &[f64],
    micro_displacements: &mut [f64],
    micro_node_to_local_index: Option<&LocalIndexMap>,
) -> CoreResult<()> {
    const CTX: &str = "projection::add_macro_domain_displacement_to_micro_from_dof";

    if domain_macro_node_indices.len() != domain_macro_interpolation_function_values.len() {
        return Err(CoreError::shape_mismatch(
            CTX,
            "macro node indices and interpolation function values must be the same length",
        ));
    }

    let mut interpolated = vec![0.0; n_macro_dof];
    for (i, &a) in domain_macro_node_indices.iter().enumerate() {
        if n_macro_dof * (a + 1) > macro_dof_vector.len() {
            return Err(CoreError::index_out_of_range(
                CTX,
                format!("macro DOF vector too small for macro node {a}"),
            ));
        }
        let n_a = domain_macro_interpolation_function_values[i];
        for k in 0..n_macro_dof {
            interpolated[k] += n_a * macro_dof_vector[n_macro_dof * a + k];
        }
    }

    let u = &interpolated[0..dim];
    let phi = &interpolated[dim..dim + dim * dim];

    add_macro_domain_displacement_to_micro(
        dim,
        domain_micro_node_indices,
        u,
        phi,
        domain_reference_xis,
        domain_micro_weights,
        micro_displacements,
        micro_node_to_local_index,
    )
    .map_err(|e| e.chain("error projecting macro displacements to micro scale"))
}

// ---------------------------------------------------------------------
// 4.5.2 Micro -> macro mass and moments
// ---------------------------------------------------------------------

fn check_domain_shapes(
    context: &'static str,
    n_micro: usize,
    n_macro: usize,
    domain_micro_weights: &[f64],
    domain_micro_shape_functions: &[f64],
) -> CoreResult<()> {
    if domain_micro_weights.len() != n_micro {
        return Err(CoreError::shape_mismatch(
            context,
            format!(
                "{} weights for {n_micro} micro nodes",
                domain_micro_weights.len()
            ),
        ));
    }
    if domain_micro_shape_functions.len() != n_micro * n_macro {
        return Err(CoreError::shape_mismatch(
            context,
            format!(
                "{} shape function values, expected {} ({n_micro} micro x {n_macro} macro)",
                domain_micro_shape_functions.len(),
                n_micro * n_macro
            ),
        ));
    }
    Ok(())
}

/// Shared inner loop for all `w_i * m_i * N_a(x_i)`-weighted accumulations.
/// Calls `accumulate(dest_macro_local_index, micro_i, coeff)` for every
/// (micro, macro) pair in the domain whose destination macro node is not
/// filtered out by `macro_node_to_local_index`.
fn for_each_weighted_contribution(
    context: &'static str,
    domain_micro_node_indices: &[usize],
    domain_macro_node_indices: &[usize],
    domain_micro_weights: &[f64],
    domain_micro_shape_functions: &[f64],
    micro_masses: &[f64],
    macro_node_to_local_index: Option<&LocalIndexMap>,
    mut accumulate: impl FnMut(usize, usize, f64) -> CoreResult<()>,
) -> CoreResult<()> {
    let n_micro = domain_micro_node_indices.len();
    let n_macro = domain_macro_node_indices.len();
    check_domain_shapes(
        context,
        n_micro,
        n_macro,
        domain_micro_weights,
        domain_micro_shape_functions,
    )?;

    for (i, &global_m) in domain_micro_node_indices.iter().enumerate() {
        let w = domain_micro_weights[i];
        let m = mass_at(global_m, micro_masses, context)?;

        for (a, &global_a) in domain_macro_node_indices.iter().enumerate() {
            let dest = match resolve_index(global_a, macro_node_to_local_index) {
                Some(d) => d,
                None => continue,
            };
            let n_a = domain_micro_shape_functions[i * n_macro + a];
            let coeff = w * m * n_a;
            accumulate(dest, i, coeff)?;
        }
    }

    Ok(())
}

/// Accumulates the projected mass `m_a += sum_i w_i m_i N_a(x_i)` into
/// `projected_micro_masses`, sized `n_macro_total`.
pub fn add_domain_micro_contribution_to_macro_mass(
    domain_micro_node_indices: &[usize],
    domain_macro_node_indices: &[usize],
    micro_masses: &[f64],
    domain_micro_shape_functions: &[f64],
    domain_micro_weights: &[f64],
    projected_micro_masses: &mut [f64],
    macro_node_to_local_index: Option<&LocalIndexMap>,
) -> CoreResult<()> {
    const CTX: &str = "projection::add_domain_micro_contribution_to_macro_mass";
    for_each_weighted_contribution(
        CTX,
        domain_micro_node_indices,
        domain_macro_node_indices,
        domain_micro_weights,
        domain_micro_shape_functions,
        micro_masses,
        macro_node_to_local_index,
        |dest, _i, coeff| {
            if dest >= projected_micro_masses.len() {
                return Err(CoreError::index_out_of_range(
                    CTX,
                    format!("destination macro node {dest} out of range"),
                ));
            }
            projected_micro_masses[dest] += coeff;
            Ok(())
        },
    )
}

/// Same as [`add_domain_micro_contribution_to_macro_mass`], computing
/// `mass = volume * density` internally.
pub fn add_domain_micro_contribution_to_macro_mass_from_volume_density(
    domain_micro_node_indices: &[usize],
    domain_macro_node_indices: &[usize],
    micro_volumes: &[f64],
    micro_densities: &[f64],
    domain_micro_shape_functions: &[f64],
    domain_micro_weights: &[f64],
    projected_micro_masses: &mut [f64],
    macro_node_to_local_index: Option<&LocalIndexMap>,
) -> CoreResult<()> {
    let masses = mass_from_volume_density(micro_volumes, micro_densities)?;
    add_domain_micro_contribution_to_macro_mass(
        domain_micro_node_indices,
        domain_macro_node_indices,
        &masses,
        domain_micro_shape_functions,
        domain_micro_weights,
        projected_micro_masses,
        macro_node_to_local_index,
    )
}

/// Accumulates the mass moment of inertia (full `dim x dim`, row-major)
/// `I_a += sum_i w_i m_i N_a(x_i) xi_i (x) xi_i` into
/// `projected_moment_of_inertia`, sized `n_macro_total * dim * dim`.
#[allow(clippy::too_many_arguments)]
pub fn add_domain_micro_contribution_to_macro_mass_moment_of_inertia(
    dim: usize,
    domain_micro_node_indices: &[usize],
    domain_macro_node_indices: &[usize],
    domain_reference_xis: &[f64],
    micro_masses: &[f64],
    domain_micro_shape_functions: &[f64],
    domain_micro_weights: &[f64],
    projected_moment_of_inertia: &mut [f64],
    macro_node_to_local_index: Option<&LocalIndexMap>,
) -> CoreResult<()> {
    const CTX: &str = "projection::add_domain_micro_contribution_to_macro_mass_moment_of_inertia";
    if domain_reference_xis.len() != dim * domain_micro_node_indices.len() {
        return Err(CoreError::shape_mismatch(
            CTX,
            "reference xi array does not match dim * number of micro nodes",
        ));
    }

    for_each_weighted_contribution(
        CTX,
        domain_micro_node_indices,
        domain_macro_node_indices,
        domain_micro_weights,
        domain_micro_shape_functions,
        micro_masses,
        macro_node_to_local_index,
        |dest, i, coeff| {
            let block = dim * dim;
            if dim * (dest + 1) * dim > projected_moment_of_inertia.len()
                || (dest + 1) * block > projected_moment_of_inertia.len()
            {
                return Err(CoreError::index_out_of_range(
                    CTX,
                    format!("destination macro node {dest} out of range"),
                ));
            }
            let xi = &domain_reference_xis[dim * i..dim * i + dim];
            for row in 0..dim {
                for col in 0..dim {
                    projected_moment_of_inertia[dest * block + row * dim + col] +=
                        coeff * xi[row] * xi[col];
                }
            }
            Ok(())
        },
    )
}

/// Same as the mass-based moment-of-inertia accumulation, computing
/// `mass = volume * density` internally.
#[allow(clippy::too_many_arguments)]
pub fn add_domain_micro_contribution_to_macro_mass_moment_of_inertia_from_volume_density(
    dim: usize,
    domain_micro_node_indices: &[usize],
    domain_macro_node_indices: &[usize],
    domain_reference_xis: &[f64],
    micro_volumes: &[f64],
    micro_densities: &[f64],
    domain_micro_shape_functions: &[f64],
    domain_micro_weights: &[f64],
    projected_moment_of_inertia: &mut [f64],
    macro_node_to_local_index: Option<&LocalIndexMap>,
) -> CoreResult<()> {
    let masses = mass_from_volume_density(micro_volumes, micro_densities)?;
    add_domain_micro_contribution_to_macro_mass_moment_of_inertia(
        dim,
        domain_micro_node_indices,
        domain_macro_node_indices,
        domain_reference_xis,
        &masses,
        domain_micro_shape_functions,
        domain_micro_weights,
        projected_moment_of_inertia,
        macro_node_to_local_index,
    )
}

/// Accumulates the mass constant `C_a += sum_i w_i m_i N_a(x_i) xi_i`
/// into `projected_mass_constant`, sized `n_macro_total * dim`.
#[allow(clippy::too_many_arguments)]
pub fn add_domain_mass_constant(
    dim: usize,
    domain_micro_node_indices: &[usize],
    domain_macro_node_indices: &[usize],
    domain_reference_xis: &[f64],
    micro_masses: &[f64],
    domain_micro_shape_functions: &[f64],
    domain_micro_weights: &[f64],
    projected_mass_constant: &mut [f64],
    macro_node_to_local_index: Option<&LocalIndexMap>,
) -> CoreResult<()> {
    const CTX: &str = "projection::add_domain_mass_constant";
    if domain_reference_xis.len() != dim * domain_micro_node_indices.len() {
        return Err(CoreError::shape_mismatch(
            CTX,
            "reference xi array does not match dim * number of micro nodes",
        ));
    }

    for_each_weighted_contribution(
        CTX,
        domain_micro_node_indices,
        domain_macro_node_indices,
        domain_micro_weights,
        domain_micro_shape_functions,
        micro_masses,
        macro_node_to_local_index,
        |dest, i, coeff| {
            if (dest + 1) * dim > projected_mass_constant.len() {
                return Err(CoreError::index_out_of_range(
                    CTX,
                    format!("destination macro node {dest} out of range"),
                ));
            }
            let xi = &domain_reference_xis[dim * i..dim * i + dim];
            for row in 0..dim {
                projected_mass_constant[dest * dim + row] += coeff * xi[row];
            }
            Ok(())
        },
    )
}

/// Same as [`add_domain_mass_constant`], computing `mass = volume * density`.
#[allow(clippy::too_many_arguments)]
pub fn add_domain_mass_constant_from_volume_density(
    dim: usize,
    domain_micro_node_indices: &[usize],
    domain_macro_node_indices: &[usize],
    domain_reference_xis: &[f64],
    micro_volumes: &[f64],
    micro_densities: &[f64],
    domain_micro_shape_functions: &[f64],
    domain_micro_weights: &[f64],
    projected_mass_constant: &mut [f64],
    macro_node_to_local_index: Option<&LocalIndexMap>,
) -> CoreResult<()> {
    let masses = mass_from_volume_density(micro_volumes, micro_densities)?;
    add_domain_mass_constant(
        dim,
        domain_micro_node_indices,
        domain_macro_node_indices,
        domain_reference_xis,
        &masses,
        domain_micro_shape_functions,
        domain_micro_weights,
        projected_mass_constant,
        macro_node_to_local_index,
    )
}

/// Accumulates the mass displacement `D_a += sum_i w_i m_i N_a(x_i) u_i`
/// into `projected_mass_displacement`, sized `n_macro_total * dim`.
/// `micro_displacements` is a *global* array indexed by micro id.
#[allow(clippy::too_many_arguments)]
pub fn add_domain_mass_displacement(
    dim: usize,
    domain_micro_node_indices: &[usize],
    domain_macro_node_indices: &[usize],
    micro_masses: &[f64],
    domain_micro_shape_functions: &[f64],
    domain_micro_weights: &[f64],
    micro_displacements: &[f64],
    projected_mass_displacement: &mut [f64],
    macro_node_to_local_index: Option<&LocalIndexMap>,
) -> CoreResult<()> {
    const CTX: &str = "projection::add_domain_mass_displacement";

    for_each_weighted_contribution(
        CTX,
        domain_micro_node_indices,
        domain_macro_node_indices,
        domain_micro_weights,
        domain_micro_shape_functions,
        micro_masses,
        macro_node_to_local_index,
        |dest, i, coeff| {
            if (dest + 1) * dim > projected_mass_displacement.len() {
                return Err(CoreError::index_out_of_range(
                    CTX,
                    format!("destination macro node {dest} out of range"),
                ));
            }
            let global_m = domain_micro_node_indices[i];
            if dim * (global_m + 1) > micro_displacements.len() {
                return Err(CoreError::index_out_of_range(
                    CTX,
                    format!("micro displacement array too small for node {global_m}"),
                ));
            }
            let u = &micro_displacements[dim * global_m..dim * global_m + dim];
            for row in 0..dim {
                projected_mass_displacement[dest * dim + row] += coeff * u[row];
            }
            Ok(())
        },
    )
}

/// Same as [`add_domain_mass_displacement`], computing
/// `mass = volume * density`.
#[allow(clippy::too_many_arguments)]
pub fn add_domain_mass_displacement_from_volume_density(
    dim: usize,
    domain_micro_node_indices: &[usize],
    domain_macro_node_indices: &[usize],
    micro_volumes: &[f64],
    micro_densities: &[f64],
    domain_micro_shape_functions: &[f64],
    domain_micro_weights: &[f64],
    micro_displacements: &[f64],
    projected_mass_displacement: &mut [f64],
    macro_node_to_local_index: Option<&LocalIndexMap>,
) -> CoreResult<()> {
    let masses = mass_from_volume_density(micro_volumes, micro_densities)?;
    add_domain_mass_displacement(
        dim,
        domain_micro_node_indices,
        domain_macro_node_indices,
        &masses,
        domain_micro_shape_functions,
        domain_micro_weights,
        micro_displacements,
        projected_mass_displacement,
        macro_node_to_local_index,
    )
}

/// Accumulates the mass displacement position
/// `DP_a += sum_i w_i m_i N_a(x_i) (u_i (x) xi_i)` (row-major `dim x dim`)
/// into `projected_mass_displacement_position`, sized
/// `n_macro_total * dim * dim`.
#[allow(clippy::too_many_arguments)]
pub fn add_domain_mass_micro_displacement_position(
    dim: usize,
    domain_micro_node_indices: &[usize],
    domain_macro_node_indices: &[usize],
    domain_reference_xis: &[f64],
    micro_masses: &[f64],
    domain_micro_shape_functions: &[f64],
    domain_micro_weights: &[f64],
    micro_displacements: &[f64],
    projected_mass_displacement_position: &mut [f64],
    macro_node_to_local_index: Option<&LocalIndexMap>,
) -> CoreResult<()> {
    const CTX: &str = "projection::add_domain_mass_micro_displacement_position";
    if domain_reference_xis.len() != dim * domain_micro_node_indices.len() {
        return Err(CoreError::shape_mismatch(
            CTX,
            "reference xi array does not match dim * number of micro nodes",
        ));
    }

    for_each_weighted_contribution(
        CTX,
        domain_micro_node_indices,
        domain_macro_node_indices,
        domain_micro_weights,
        domain_micro_shape_functions,
        micro_masses,
        macro_node_to_local_index,
        |dest, i, coeff| {
            let block = dim * dim;
            if (dest + 1) * block > projected_mass_displacement_position.len() {
                return Err(CoreError::index_out_of_range(
                    CTX,
                    format!("destination macro node {dest} out of range"),
                ));
            }
            let global_m = domain_micro_node_indices[i];
            if dim * (global_m + 1) > micro_displacements.len() {
                return Err(CoreError::index_out_of_range(
                    CTX,
                    format!("micro displacement array too small for node {global_m}"),
                ));
            }
            let u = &micro_displacements[dim * global_m..dim * global_m + dim];
            let xi = &domain_reference_xis[dim * i..dim * i + dim];
            for row in 0..dim {
                for col in 0..dim {
                    projected_mass_displacement_position[dest * block + row * dim + col] +=
                        coeff * u[row] * xi[col];
                }
            }
            Ok(())
        },
    )
}

/// Same as [`add_domain_mass_micro_displacement_position`], computing
/// `mass = volume * density`.
#[allow(clippy::too_many_arguments)]
pub fn add_domain_mass_micro_displacement_position_from_volume_density(
    dim: usize,
    domain_micro_node_indices: &[usize],
    domain_macro_node_indices: &[usize],
    domain_reference_xis: &[f64],
    micro_volumes: &[f64],
    micro_densities: &[f64],
    domain_micro_shape_functions: &[f64],
    domain_micro_weights: &[f64],
    micro_displacements: &[f64],
    projected_mass_displacement_position: &mut [f64],
    macro_node_to_local_index: Option<&LocalIndexMap>,
) -> CoreResult<()> {
    let masses = mass_from_volume_density(micro_volumes, micro_densities)?;
    add_domain_mass_micro_displacement_position(
        dim,
        domain_micro_node_indices,
        domain_macro_node_indices,
        domain_reference_xis,
        &masses,
        domain_micro_shape_functions,
        domain_micro_weights,
        micro_displacements,
        projected_mass_displacement_position,
        macro_node_to_local_index,
    )
}

/// Flags selecting which terms [`add_domain_micro_to_macro_projection_terms`]
/// computes, so the shared `w_i m_i N_a(x_i)` coefficient is not
/// recomputed per term (spec.md §4.5.2 "single combined entry point").
#[derive(Debug, Clone, Copy)]
pub struct ProjectionTermFlags {
    /// Accumulate the mass moment of inertia.
    pub compute_mass_moment_of_inertia: bool,
    /// Accumulate the mass constant.
    pub compute_mass_constant: bool,
    /// Accumulate the mass displacement.
    pub compute_mass_displacement: bool,
    /// Accumulate the mass displacement position.
    pub compute_mass_displacement_position: bool,
}

impl Default for ProjectionTermFlags {
    fn default() -> Self {
        ProjectionTermFlags {
            compute_mass_moment_of_inertia: true,
            compute_mass_constant: true,
            compute_mass_displacement: true,
            compute_mass_displacement_position: true,
        }
    }
}

/// The combined entry point of spec.md §4.5.2: accumulates any subset of
/// the moment-of-inertia/mass-constant/mass-displacement/mass-
/// displacement-position terms selected by `flags`, computing
/// `w_i * m_i * N_a(x_i)` only once per (micro, macro) pair.
#[allow(clippy::too_many_arguments)]
pub fn add_domain_micro_to_macro_projection_terms(
    dim: usize,
    domain_micro_node_indices: &[usize],
    domain_macro_node_indices: &[usize],
    domain_reference_xis: &[f64],
    micro_masses: &[f64],
    domain_micro_shape_functions: &[f64],
    domain_micro_weights: &[f64],
    micro_displacements: &[f64],
    projected_moment_of_inertia: &mut [f64],
    projected_mass_constant: &mut [f64],
    projected_mass_displacement: &mut [f64],
    projected_mass_displacement_position: &mut [f64],
    flags: ProjectionTermFlags,
    macro_node_to_local_index: Option<&LocalIndexMap>,
) -> CoreResult<()> {
    const CTX: &str = "projection::add_domain_micro_to_macro_projection_terms";
    if domain_reference_xis.len() != dim * domain_micro_node_indices.len() {
        return Err(CoreError::shape_mismatch(
            CTX,
            "reference xi array does not match dim * number of micro nodes",
        ));
    }

    let block = dim * dim;

    for_each_weighted_contribution(
        CTX,
        domain_micro_node_indices,
        domain_macro_node_indices,
        domain_micro_weights,
        domain_micro_shape_functions,
        micro_masses,
        macro_node_to_local_index,
        |dest, i, coeff| {
            let xi = &domain_reference_xis[dim * i..dim * i + dim];
            let global_m = domain_micro_node_indices[i];

            if flags.compute_mass_moment_of_inertia {
                if (dest + 1) * block > projected_moment_of_inertia.len() {
                    return Err(CoreError::index_out_of_range(
                        CTX,
                        format!("moment of inertia buffer too small for macro node {dest}"),
                    ));
                }
                for row in 0..dim {
                    for col in 0..dim {
                        projected_moment_of_inertia[dest * block + row * dim + col] +=
                            coeff * xi[row] * xi[col];
                    }
                }
            }

            if flags.compute_mass_constant {
                if (dest + 1) * dim > projected_mass_constant.len() {
                    return Err(CoreError::index_out_of_range(
                        CTX,
                        format!("mass constant buffer too small for macro node {dest}"),
                    ));
                }
                for row in 0..dim {
                    projected_mass_constant[dest * dim + row] += coeff * xi[row];
                }
            }

            if flags.compute_mass_displacement || flags.compute_mass_displacement_position {
                if dim * (global_m + 1) > micro_displacements.len() {
                    return Err(CoreError::index_out_of_range(
                        CTX,
                        format!("micro displacement array too small for node {global_m}"),
                    ));
                }
                let u = &micro_displacements[dim * global_m..dim * global_m + dim];

                if flags.compute_mass_displacement {
                    if (dest + 1) * dim > projected_mass_displacement.len() {
                        return Err(CoreError::index_out_of_range(
                            CTX,
                            format!("mass displacement buffer too small for macro node {dest}"),
                        ));
                    }
                    for row in 0..dim {
                        projected_mass_displacement[dest * dim + row] += coeff * u[row];
                    }
                }

                if flags.compute_mass_displacement_position {
                    if (dest + 1) * block > projected_mass_displacement_position.len() {
                        return Err(CoreError::index_out_of_range(
                            CTX,
                            format!(
                                "mass displacement position buffer too small for macro node {dest}"
                            ),
                        ));
                    }
                    for row in 0..dim {
                        for col in 0..dim {
                            projected_mass_displacement_position[dest * block + row * dim + col] +=
                                coeff * u[row] * xi[col];
                        }
                    }
                }
            }

            Ok(())
        },
    )
}

// ---------------------------------------------------------------------
// 4.5.3 Domain aggregates
// ---------------------------------------------------------------------

/// Computes a domain's center of mass `CM = (sum_i w_i m_i x_i) /
/// (sum_i w_i m_i)` and total mass. `micro_positions` is a *global* flat
/// array (`dim` components per micro id).
pub fn compute_domain_center_of_mass(
    dim: usize,
    domain_micro_node_indices: &[usize],
    micro_masses: &[f64],
    micro_positions: &[f64],
    domain_micro_weights: &[f64],
) -> CoreResult<(f64, Vec<f64>)> {
    const CTX: &str = "projection::compute_domain_center_of_mass";
    if domain_micro_weights.len() != domain_micro_node_indices.len() {
        return Err(CoreError::shape_mismatch(
            CTX,
            "weights must match the number of micro nodes in the domain",
        ));
    }

    let mut total_mass = 0.0;
    let mut cm = vec![0.0; dim];

    for (i, &global_m) in domain_micro_node_indices.iter().enumerate() {
        let w = domain_micro_weights[i];
        let m = mass_at(global_m, micro_masses, CTX)?;
        if dim * (global_m + 1) > micro_positions.len() {
            return Err(CoreError::index_out_of_range(
                CTX,
                format!("position array too small for micro node {global_m}"),
            ));
        }
        let x = &micro_positions[dim * global_m..dim * global_m + dim];

        total_mass += w * m;
        for row in 0..dim {
            cm[row] += w * m * x[row];
        }
    }

    if total_mass == 0.0 {
        return Err(CoreError::numerical(
            CTX,
            "domain has zero total mass, center of mass is undefined",
        ));
    }
    for c in cm.iter_mut() {
        *c /= total_mass;
    }

    Ok((total_mass, cm))
}

/// Same as [`compute_domain_center_of_mass`], with `mass = volume * density`.
pub fn compute_domain_center_of_mass_from_volume_density(
    dim: usize,
    domain_micro_node_indices: &[usize],
    micro_volumes: &[f64],
    micro_densities: &[f64],
    micro_positions: &[f64],
    domain_micro_weights: &[f64],
) -> CoreResult<(f64, Vec<f64>)> {
    let masses = mass_from_volume_density(micro_volumes, micro_densities)?;
    compute_domain_center_of_mass(
        dim,
        domain_micro_node_indices,
        &masses,
        micro_positions,
        domain_micro_weights,
    )
}

/// Same as [`compute_domain_center_of_mass`], but computes the current
/// position as `reference_position + displacement`.
pub fn compute_domain_center_of_mass_with_displacement(
    dim: usize,
    domain_micro_node_indices: &[usize],
    micro_masses: &[f64],
    micro_reference_positions: &[f64],
    micro_displacements: &[f64],
    domain_micro_weights: &[f64],
) -> CoreResult<(f64, Vec<f64>)> {
    const CTX: &str = "projection::compute_domain_center_of_mass_with_displacement";
    if micro_reference_positions.len() != micro_displacements.len() {
        return Err(CoreError::shape_mismatch(
            CTX,
            "reference positions and displacements must be the same length",
        ));
    }
    let positions: Vec<f64> = micro_reference_positions
        .iter()
        .zip(micro_displacements)
        .map(|(x, u)| x + u)
        .collect();
    compute_domain_center_of_mass(
        dim,
        domain_micro_node_indices,
        micro_masses,
        &positions,
        domain_micro_weights,
    )
}

/// Computes, for every micro node in the domain, `xi_i = x_i - CM`
/// (written into `domain_xis`, a per-domain flat array sized
/// `dim * n_micro`), and the domain's moment of inertia
/// `I = sum_i w_i m_i xi_i (x) xi_i` (row-major `dim x dim`).
pub fn compute_domain_xis(
    dim: usize,
    domain_micro_node_indices: &[usize],
    micro_positions: &[f64],
    micro_masses: &[f64],
    domain_micro_weights: &[f64],
    domain_cm: &[f64],
) -> CoreResult<(Vec<f64>, Vec<f64>)> {
    const CTX: &str = "projection::compute_domain_xis";
    if domain_cm.len() != dim {
        return Err(CoreError::shape_mismatch(CTX, "domain CM must have length dim"));
    }
    if domain_micro_weights.len() != domain_micro_node_indices.len() {
        return Err(CoreError::shape_mismatch(
            CTX,
            "weights must match the number of micro nodes in the domain",
        ));
    }

    let n = domain_micro_node_indices.len();
    let mut xis = vec![0.0; dim * n];
    let mut moment_of_inertia = vec![0.0; dim * dim];

    for (i, &global_m) in domain_micro_node_indices.iter().enumerate() {
        if dim * (global_m + 1) > micro_positions.len() {
            return Err(CoreError::index_out_of_range(
                CTX,
                format!("position array too small for micro node {global_m}"),
            ));
        }
        let x = &micro_positions[dim * global_m..dim * global_m + dim];
        let w = domain_micro_weights[i];
        let m = mass_at(global_m, micro_masses, CTX)?;

        for row in 0..dim {
            xis[dim * i + row] = x[row] - domain_cm[row];
        }
        let xi = &xis[dim * i..dim * i + dim];
        for row in 0..dim {
            for col in 0..dim {
                moment_of_inertia[row * dim + col] += w * m * xi[row] * xi[col];
            }
        }
    }

    Ok((xis, moment_of_inertia))
}

/// Same as [`compute_domain_xis`], with `mass = volume * density`.
pub fn compute_domain_xis_from_volume_density(
    dim: usize,
    domain_micro_node_indices: &[usize],
    micro_positions: &[f64],
    micro_volumes: &[f64],
    micro_densities: &[f64],
    domain_micro_weights: &[f64],
    domain_cm: &[f64],
) -> CoreResult<(Vec<f64>, Vec<f64>)> {
    let masses = mass_from_volume_density(micro_volumes, micro_densities)?;
    compute_domain_xis(
        dim,
        domain_micro_node_indices,
        micro_positions,
        &masses,
        domain_micro_weights,
        domain_cm,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn macro_to_micro_matches_analytic_evaluation() {
        // u + phi * xi must equal the closed form for every micro node.
        let dim = 3;
        let u = vec![0.5, -0.2, 0.1];
        let phi = vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]; // identity
        let xis = vec![1.0, 2.0, 3.0, -1.0, 0.0, 2.0];
        let weights = vec![1.0, 1.0];
        let indices = vec![0usize, 1usize];
        let mut micro_displacements = vec![0.0; 3 * 2];

        add_macro_domain_displacement_to_micro(
            dim,
            &indices,
            &u,
            &phi,
            &xis,
            &weights,
            &mut micro_displacements,
            None,
        )
        .unwrap();

        // phi = identity, so q_i = u + xi_i.
        assert_relative_eq!(micro_displacements[0], u[0] + xis[0], epsilon = 1e-12);
        assert_relative_eq!(micro_displacements[1], u[1] + xis[1], epsilon = 1e-12);
        assert_relative_eq!(micro_displacements[2], u[2] + xis[2], epsilon = 1e-12);
        assert_relative_eq!(micro_displacements[3], u[0] + xis[3], epsilon = 1e-12);
        assert_relative_eq!(micro_displacements[4], u[1] + xis[4], epsilon = 1e-12);
        assert_relative_eq!(micro_displacements[5], u[2] + xis[5], epsilon = 1e-12);
    }

    #[test]
    fn macro_to_micro_honors_local_index_map_skip() {
        let dim = 3;
        let u = vec![1.0, 1.0, 1.0];
        let phi = vec![0.0; 9];
        let xis = vec![0.0; 3];
        let weights = vec![1.0];
        let indices = vec![7usize]; // global id 7, not in the local map
        let map: LocalIndexMap = LocalIndexMap::new(); // empty: every id is skipped
        let mut micro_displacements = vec![0.0; 3];

        add_macro_domain_displacement_to_micro(
            dim,
            &indices,
            &u,
            &phi,
            &xis,
            &weights,
            &mut micro_displacements,
            Some(&map),
        )
        .unwrap();

        assert_eq!(micro_displacements, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn mismatched_weight_length_is_an_error() {
        let dim = 3;
        let u = vec![0.0; 3];
        let phi = vec![0.0; 9];
        let xis = vec![0.0; 3];
        let weights = vec![1.0, 2.0]; // wrong length
        let indices = vec![0usize];
        let mut micro_displacements = vec![0.0; 3];

        let result = add_macro_domain_displacement_to_micro(
            dim,
            &indices,
            &u,
            &phi,
            &xis,
            &weights,
            &mut micro_displacements,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn projected_mass_onto_corner_node_of_unit_cube_is_one_eighth() {
        // Uniform rho=1, w=1, single micro node coincident with a cube
        // corner: N_a(x_i) = 1 for that corner, 0 for the rest, so the
        // projected mass at the corner equals the micro node's own mass,
        // i.e. the integral reduces to the nodal value (spec.md §8).
        let micro_masses = vec![1.0 / 8.0]; // a single quadrature-point mass representing 1/8 of a unit cube
        let shape_functions = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]; // N at the corner node is 1
        let weights = vec![1.0];
        let micro_indices = vec![0usize];
        let macro_indices: Vec<usize> = (0..8).collect();
        let mut projected = vec![0.0; 8];

        add_domain_micro_contribution_to_macro_mass(
            &micro_indices,
            &macro_indices,
            &micro_masses,
            &shape_functions,
            &weights,
            &mut projected,
            None,
        )
        .unwrap();

        assert_relative_eq!(projected[0], 1.0 / 8.0, epsilon = 1e-12);
        for value in &projected[1..] {
            assert_relative_eq!(*value, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn mass_vs_volume_density_overloads_agree() {
        let micro_indices = vec![0usize, 1usize];
        let macro_indices = vec![0usize];
        let volumes = vec![2.0, 3.0];
        let densities = vec![5.0, 7.0];
        let masses = vec![10.0, 21.0];
        let shape_functions = vec![0.4, 0.6];
        let weights = vec![1.0, 1.0];

        let mut via_mass = vec![0.0; 1];
        add_domain_micro_contribution_to_macro_mass(
            &micro_indices,
            &macro_indices,
            &masses,
            &shape_functions,
            &weights,
            &mut via_mass,
            None,
        )
        .unwrap();

        let mut via_vol_density = vec![0.0; 1];
        add_domain_micro_contribution_to_macro_mass_from_volume_density(
            &micro_indices,
            &macro_indices,
            &volumes,
            &densities,
            &shape_functions,
            &weights,
            &mut via_vol_density,
            None,
        )
        .unwrap();

        assert_relative_eq!(via_mass[0], via_vol_density[0], epsilon = 1e-12);
    }

    #[test]
    fn center_of_mass_matches_weighted_average() {
        let dim = 3;
        let masses = vec![1.0, 3.0];
        let positions = vec![0.0, 0.0, 0.0, 4.0, 0.0, 0.0];
        let weights = vec![1.0, 1.0];
        let indices = vec![0usize, 1usize];

        let (mass, cm) =
            compute_domain_center_of_mass(dim, &indices, &masses, &positions, &weights).unwrap();

        assert_relative_eq!(mass, 4.0, epsilon = 1e-12);
        assert_relative_eq!(cm[0], 3.0, epsilon = 1e-12); // (1*0 + 3*4)/4
        assert_relative_eq!(cm[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(cm[2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn domain_xis_are_positions_relative_to_cm() {
        let dim = 3;
        let positions = vec![1.0, 0.0, 0.0, -1.0, 0.0, 0.0];
        let masses = vec![1.0, 1.0];
        let weights = vec![1.0, 1.0];
        let indices = vec![0usize, 1usize];
        let cm = vec![0.0, 0.0, 0.0];

        let (xis, moi) =
            compute_domain_xis(dim, &indices, &positions, &masses, &weights, &cm).unwrap();

        assert_relative_eq!(xis[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(xis[3], -1.0, epsilon = 1e-12);
        // I_xx = sum w_i m_i xi_x^2 = 1*1*1 + 1*1*1 = 2
        assert_relative_eq!(moi[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn macro_to_micro_matches_published_regression_scenario() {
        // spec.md §8 scenario 1, reproduced from
        // original_source/tests/DOFProjection/test_DOFProjection.cpp's
        // test_addMacroDomainDisplacementToMicro: a 10-micro-node domain
        // out of 100 micro nodes under a known (u, phi). Only the 10
        // contributing indices are checked; every other entry of the
        // published 300-length answer vector is zero by the accumulation
        // rule (no domain touches it), which the non-domain indices
        // below pin directly.
        let dim = 3;
        let n_micro_nodes = 100;

        let domain_micro_node_indices =
            vec![53usize, 28, 63, 97, 93, 90, 8, 5, 0, 62];

        let u = vec![0.4802733, 0.63413557, 0.47580155];

        let phi = vec![
            0.24395441, 0.46860497, 0.43078742, 0.61868352, 0.46794329, 0.66017423, 0.58630018,
            0.55379286, 0.50449636,
        ];

        let domain_reference_xis = vec![
            -0.02920635, 0.39712726, -0.83686303, 0.73820473, -0.13378864, -0.01133987,
            -0.00851906, -0.25855584, 0.84425732, 0.68255644, 0.31105184, -0.0746299, 0.13002262,
            -0.15216899, -0.42357609, -0.47203856, 0.38147646, 0.66567306, 0.18478316,
            -0.06695484, 0.34731997, -0.21704129, 0.40420874, 0.93139529, -0.81898025,
            -0.88374973, 0.17603484, 0.50234751, 0.02263478, 0.84100238,
        ];

        let domain_micro_weights = vec![
            0.3039641, 0.49300273, 0.97936034, 0.32350827, 0.18956717, 0.30522911, 0.34411193,
            0.67953029, 0.053815, 0.80660376,
        ];

        // (global micro index, expected micro_displacements[3*idx..3*idx+3])
        let expected: &[(usize, [f64; 3])] = &[
            (53, [0.09080442, 0.07581585, 0.07793936]),
            (28, [0.2922434, 0.50323692, 0.40860017]),
            (63, [0.7058543, 1.0432464, 0.73799228]),
            (97, [0.24599464, 0.37291053, 0.32693496]),
            (93, [0.04894899, 0.06895278, 0.04816355]),
            (90, [0.25353635, 0.29303907, 0.22774176]),
            (8, [0.22146963, 0.32567389, 0.24854602]),
            (5, [0.69174329, 0.88602979, 0.70826331]),
            (0, [-0.00311139, -0.00914237, -0.02179357]),
            (62, [0.78702201, 1.21856017, 0.97368818]),
        ];

        let mut micro_displacements = vec![0.0; dim * n_micro_nodes];

        add_macro_domain_displacement_to_micro(
            dim,
            &domain_micro_node_indices,
            &u,
            &phi,
            &domain_reference_xis,
            &domain_micro_weights,
            &mut micro_displacements,
            None,
        )
        .unwrap();

        for &(idx, want) in expected {
            assert_relative_eq!(micro_displacements[3 * idx], want[0], epsilon = 1e-6);
            assert_relative_eq!(micro_displacements[3 * idx + 1], want[1], epsilon = 1e-6);
            assert_relative_eq!(micro_displacements[3 * idx + 2], want[2], epsilon = 1e-6);
        }

        let touched: std::collections::HashSet<usize> =
            domain_micro_node_indices.iter().copied().collect();
        for m in 0..n_micro_nodes {
            if touched.contains(&m) {
                continue;
            }
            assert_relative_eq!(micro_displacements[3 * m], 0.0, epsilon = 1e-12);
            assert_relative_eq!(micro_displacements[3 * m + 1], 0.0, epsilon = 1e-12);
            assert_relative_eq!(micro_displacements[3 * m + 2], 0.0, epsilon = 1e-12);
        }
    }
}

//! Typed calling-convention signature strings.

use crate::ast::{ArgRole, Param};

/// Descriptor of a scalar input parameter.
pub const INPUT_DESCRIPTOR: &str = "double";
/// Descriptor of an output, written through caller-supplied storage.
pub const OUTPUT_DESCRIPTOR: &str = "double*";

/// Builds `void(<descriptors>)` from the parameters in binder order.
pub fn signature(params: &[Param]) -> String {
    let descriptors: Vec<&str> = params
        .iter()
        .map(|p| match p.role {
            ArgRole::Input => INPUT_DESCRIPTOR,
            ArgRole::Target => OUTPUT_DESCRIPTOR,
        })
        .collect();
    format!("void({})", descriptors.join(", "))
}

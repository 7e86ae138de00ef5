//! Distribution of antenna inputs across nodes.

use crate::antenna::AntennaInputRange;
use crate::error::{CoreError, CoreResult};

/// Split `num_antenna_inputs` inputs into one contiguous range per node
///
/// With at least as many inputs as nodes, every node gets a range, ranges
/// differ in size by at most one and the larger ones go to the earliest nodes.
/// With fewer inputs than nodes, the first `num_antenna_inputs` nodes get one
/// input each and the rest get `None`.
///
/// # Errors
///
/// Returns a configuration error if either count is zero.
pub fn assign_node_antenna_inputs(
    num_nodes: u32,
    num_antenna_inputs: u32,
) -> CoreResult<Vec<Option<AntennaInputRange>>> {
    if num_nodes == 0 {
        return Err(CoreError::NoNodes);
    }
    if num_antenna_inputs == 0 {
        return Err(CoreError::NoAntennaInputs);
    }

    if num_antenna_inputs < num_nodes {
        return Ok((0..num_nodes)
            .map(|node| (node < num_antenna_inputs).then(|| AntennaInputRange::single(node)))
            .collect());
    }

    let base = num_antenna_inputs / num_nodes;
    let remainder = num_antenna_inputs % num_nodes;
    let mut begin = 0;
    Ok((0..num_nodes)
        .map(|node| {
            let len = base + u32::from(node < remainder);
            let range = AntennaInputRange::new(begin, begin + len - 1);
            begin += len;
            Some(range)
        })
        .collect())
}

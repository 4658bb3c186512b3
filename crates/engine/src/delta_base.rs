//! Delta-base selection
//!
//! Given a node-revision about to be written, pick which ancestor's
//! representation to delta against. The shape is skip-delta with a linear
//! tail: clearing the lowest set bit of the predecessor count halves the
//! reconstruction distance (O(log n) chains), while recent history deltas
//! against the immediate predecessor to keep deltas small. A configured
//! ceiling bounds the walk, and a chain-length probe caps reconstruction
//! cost when shared representations may have spliced chains together.

use crate::fs::Filesystem;
use crate::reader;
use revfs_core::{Error, Result};
use revfs_storage::{NodeRevision, Representation};

/// Pick the delta base for `noderev`'s content (or properties) rep.
///
/// Returns `None` to start a fresh (self-delta) chain.
pub fn choose_delta_base(
    fs: &Filesystem,
    noderev: &NodeRevision,
    props: bool,
) -> Result<Option<Representation>> {
    let tuning = &fs.config().deltification;
    let p = noderev.predecessor_count;
    if p == 0 {
        return Ok(None);
    }

    // clearing the lowest set bit yields the skip-delta anchor
    let mut count = p & (p - 1);
    let walk = p - count;
    if walk > tuning.max_deltification_walk {
        return Ok(None);
    }
    if walk < tuning.max_linear_deltification {
        count = p - 1;
    }

    let mut base = noderev.clone();
    let mut maybe_shared_rep = false;
    for _ in 0..(p - count) {
        let pred = base.predecessor.ok_or_else(|| {
            Error::Corrupt(format!(
                "predecessor chain of {} shorter than its count",
                noderev.id
            ))
        })?;
        base = reader::read_noderev(fs, &pred)?;
        let rep = if props { &base.prop_rep } else { &base.data_rep };
        if let Some(rep) = rep {
            // a rep older than its carrier node-rev may be shared
            if let (Some(rep_rev), Some(node_rev)) = (
                rep.change_set.revision(),
                base.id.noderev_id.change_set.revision(),
            ) {
                if rep_rev < node_rev {
                    maybe_shared_rep = true;
                }
            }
        }
    }

    let rep = match if props { base.prop_rep } else { base.data_rep } {
        Some(rep) => rep,
        None => return Ok(None),
    };

    if maybe_shared_rep {
        let chain = reader::rep_chain_length(fs, &rep)?;
        if chain >= 2 * tuning.max_linear_deltification + 2 {
            return Ok(None);
        }
    }
    Ok(Some(rep))
}

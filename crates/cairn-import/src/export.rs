//! Reading a file DAG back into its byte stream.

use tokio_util::sync::CancellationToken;

use cairn_dag::{DagNode, DagService, UnixFsData};
use cairn_types::Cid;

use crate::error::{ImportError, ImportResult};

/// Concatenate the leaves under `root` in link order.
///
/// The inverse of import: `export(import(bytes)) == bytes`.
pub async fn export(
    dag: &DagService,
    ctx: &CancellationToken,
    root: Cid,
) -> ImportResult<Vec<u8>> {
    let mut out = Vec::new();
    // Explicit stack, leftmost child on top.
    let mut stack = vec![root];
    while let Some(cid) = stack.pop() {
        if ctx.is_cancelled() {
            return Err(ImportError::Dag(cairn_dag::DagError::Cancelled));
        }
        let node = dag.get(ctx, &cid).await?;
        match &node {
            DagNode::Raw(data) => out.extend_from_slice(data),
            DagNode::Pb(pb) => {
                if pb.links.is_empty() {
                    let unixfs = UnixFsData::decode(&pb.data)?;
                    let data = unixfs
                        .data
                        .ok_or(ImportError::MalformedFile("leaf without inline data"))?;
                    out.extend_from_slice(&data);
                } else {
                    for link in pb.links.iter().rev() {
                        stack.push(link.cid);
                    }
                }
            }
        }
    }
    Ok(out)
}

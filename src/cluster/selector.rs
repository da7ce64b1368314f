use crate::cluster::{Node, NodeSelector};
use crate::scheduler::job::ResourceRequirements;

/// Best-fit placement.
///
/// Among nodes whose available cpu and memory cover the request, picks the one
/// that would have the least capacity left over, so large nodes stay free for
/// large jobs. Nodes that already have the job's image cached are preferred.
/// Nodes that have not reported resources yet are used only when no reporting
/// node fits.
#[derive(Debug, Default, Clone)]
pub struct BestFitSelector;

impl BestFitSelector {
    pub fn new() -> Self {
        Self
    }

    fn leftover(node: &Node, req: &ResourceRequirements) -> Option<(f64, bool)> {
        let resources = node.resources.as_ref()?;
        if !resources.fits(req) {
            return None;
        }
        let cpu_left = if resources.cpu_total > 0.0 {
            (resources.cpu_available - req.cpu_cores) / resources.cpu_total
        } else {
            0.0
        };
        let mem_left = if resources.memory_total_mb > 0 {
            (resources.memory_available_mb - req.memory_mb as i64) as f64
                / resources.memory_total_mb as f64
        } else {
            0.0
        };
        let cached = resources.cached_images.iter().any(|i| i == &req.docker_image);
        Some((cpu_left + mem_left, cached))
    }
}

impl NodeSelector for BestFitSelector {
    fn select(&self, nodes: &[Node], req: &ResourceRequirements) -> Option<Node> {
        let best = nodes
            .iter()
            .filter_map(|n| Self::leftover(n, req).map(|(score, cached)| (n, score, cached)))
            .min_by(|a, b| {
                // cached image first, then tightest fit
                b.2.cmp(&a.2)
                    .then(a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            })
            .map(|(n, _, _)| n.clone());

        best.or_else(|| nodes.iter().find(|n| n.resources.is_none()).cloned())
    }
}

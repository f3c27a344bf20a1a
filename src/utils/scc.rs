//! Strongly Connected Components (SCC) using Tarjan's algorithm.
//!
//! The graph is given as an adjacency list over dense node indices `0..n`. The depth-first
//! search keeps its own frame stack instead of recursing, so arbitrarily long dependency
//! chains (unrolled loops, deep call chains) cannot overflow the host stack.
//!
//! # Use Cases
//!
//! - **Loop-variant detection**: values feeding a phi from inside the phi's own component
//! - **Call graph scheduling**: mutually recursive functions are summarized together

/// Computes the strongly connected components of a directed graph.
///
/// # Arguments
///
/// * `successors` - `successors[v]` lists the targets of the edges leaving node `v`. Targets
///   outside `0..successors.len()` are ignored.
///
/// # Returns
///
/// The SCCs in **reverse topological order**: if there is an edge from SCC A to SCC B, then A
/// appears after B. Nodes within one SCC are listed in ascending index order.
///
/// # Complexity
///
/// - Time: O(V + E)
/// - Space: O(V)
///
/// # Examples
///
/// ```rust
/// use layoutscope::utils::strongly_connected_components;
///
/// // 0 -> 1 -> 2 -> 1, 2 -> 3
/// let graph = vec![vec![1], vec![2], vec![1, 3], vec![]];
/// let sccs = strongly_connected_components(&graph);
/// assert_eq!(sccs, vec![vec![3], vec![1, 2], vec![0]]);
/// ```
#[must_use]
pub fn strongly_connected_components(successors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = successors.len();
    let mut state = TarjanState::new(n);

    for root in 0..n {
        if state.index[root].is_none() {
            state.strongconnect(successors, root);
        }
    }

    state.sccs
}

/// Maps every node to the position of its component in `sccs`.
#[must_use]
pub fn component_index(node_count: usize, sccs: &[Vec<usize>]) -> Vec<usize> {
    let mut component = vec![usize::MAX; node_count];
    for (c, scc) in sccs.iter().enumerate() {
        for &node in scc {
            if node < node_count {
                component[node] = c;
            }
        }
    }
    component
}

/// Internal state for Tarjan's algorithm.
struct TarjanState {
    /// Discovery index for each node (None if not yet visited)
    index: Vec<Option<usize>>,
    /// Lowlink value for each node
    lowlink: Vec<usize>,
    /// Whether a node is currently on the component stack
    on_stack: Vec<bool>,
    /// The component stack
    stack: Vec<usize>,
    /// Current index counter
    current_index: usize,
    /// Collected SCCs
    sccs: Vec<Vec<usize>>,
}

impl TarjanState {
    fn new(n: usize) -> Self {
        Self {
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            current_index: 0,
            sccs: Vec::new(),
        }
    }

    fn discover(&mut self, v: usize) {
        self.index[v] = Some(self.current_index);
        self.lowlink[v] = self.current_index;
        self.current_index += 1;
        self.stack.push(v);
        self.on_stack[v] = true;
    }

    fn strongconnect(&mut self, successors: &[Vec<usize>], root: usize) {
        // (node, position of the next successor to examine)
        let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
        self.discover(root);

        while let Some(frame) = frames.last_mut() {
            let v = frame.0;
            if let Some(&w) = successors[v].get(frame.1) {
                frame.1 += 1;
                if w >= successors.len() {
                    continue;
                }
                match self.index[w] {
                    None => {
                        self.discover(w);
                        frames.push((w, 0));
                    }
                    Some(w_index) if self.on_stack[w] => {
                        self.lowlink[v] = self.lowlink[v].min(w_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                self.lowlink[parent] = self.lowlink[parent].min(self.lowlink[v]);
            }

            if Some(self.lowlink[v]) == self.index[v] {
                let mut scc = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                scc.sort_unstable();
                self.sccs.push(scc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_graph() {
        assert!(strongly_connected_components(&[]).is_empty());
    }

    #[test]
    fn test_acyclic_chain() {
        let graph = vec![vec![1], vec![2], vec![]];
        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs, vec![vec![2], vec![1], vec![0]]);
    }

    #[test]
    fn test_single_cycle() {
        let graph = vec![vec![1], vec![2], vec![0]];
        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_self_loop() {
        let graph = vec![vec![0], vec![0]];
        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs, vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_two_cycles_joined() {
        // {0,1} -> {2,3}
        let graph = vec![vec![1], vec![0, 2], vec![3], vec![2]];
        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs, vec![vec![2, 3], vec![0, 1]]);

        let component = component_index(4, &sccs);
        assert_eq!(component, vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_out_of_range_targets_ignored() {
        let graph = vec![vec![7, 1], vec![]];
        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs, vec![vec![1], vec![0]]);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let n = 200_000;
        let graph: Vec<Vec<usize>> = (0..n)
            .map(|i| if i + 1 < n { vec![i + 1] } else { vec![0] })
            .collect();
        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), n);
    }
}

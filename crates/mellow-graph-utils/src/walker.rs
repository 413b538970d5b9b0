use std::{
    collections::{HashMap, VecDeque},
    hash::Hash,
};

use futures::{stream::FuturesUnordered, StreamExt};
use petgraph::{
    visit::{IntoNeighborsDirected, IntoNodeIdentifiers},
    Direction,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::trace;

/// A ready node handed to the consumer, paired with the channel the
/// consumer completes to release the node's dependents.
pub type WalkMessage<N> = (N, oneshot::Sender<()>);

/// Walks a DAG in dependency order, concurrently.
///
/// A node is sent over the returned channel once every node it has an
/// outgoing edge to has been marked done. The consumer may process emitted
/// nodes at any parallelism and in any order; firing a node's `done`
/// callback is what releases its dependents. Dropping a `done` callback
/// counts as completing the node.
///
/// The walk is indegree bookkeeping in a single driver task: it snapshots
/// the graph shape up front, emits the initially unblocked nodes, and then
/// trades completions for newly ready nodes until neither remain. Nodes on
/// a cycle never become ready and are simply never emitted; callers that
/// care validate acyclicity first.
pub struct Walker {
    driver: JoinHandle<()>,
}

impl Walker {
    pub fn walk<N, G>(graph: G) -> (Self, mpsc::UnboundedReceiver<WalkMessage<N>>)
    where
        N: Eq + Hash + Copy + Send + 'static,
        G: IntoNodeIdentifiers<NodeId = N> + IntoNeighborsDirected,
    {
        // Snapshot the shape so the driver owns everything it needs and the
        // graph can be dropped or mutated once this returns.
        let mut blocked_on: HashMap<N, usize> = HashMap::new();
        let mut dependents: HashMap<N, Vec<N>> = HashMap::new();
        let mut ready: VecDeque<N> = VecDeque::new();
        for node in graph.node_identifiers() {
            let mut deps = 0;
            for dep in graph.neighbors_directed(node, Direction::Outgoing) {
                deps += 1;
                dependents.entry(dep).or_default().push(node);
            }
            if deps == 0 {
                ready.push_back(node);
            } else {
                blocked_on.insert(node, deps);
            }
        }

        // At most one message per node ever goes out, so the channel's
        // backlog is bounded by the node count.
        let (node_tx, node_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(async move {
            let mut in_flight = FuturesUnordered::new();
            loop {
                while let Some(node) = ready.pop_front() {
                    let (done_tx, done_rx) = oneshot::channel::<()>();
                    if node_tx.send((node, done_tx)).is_err() {
                        // Consumer hung up; no completion can ever arrive.
                        trace!("walk receiver dropped before the walk finished");
                        return;
                    }
                    in_flight.push(async move {
                        if done_rx.await.is_err() {
                            trace!("done callback dropped without a signal");
                        }
                        node
                    });
                }

                let Some(finished) = in_flight.next().await else {
                    // Nothing running and nothing ready: the walk is over.
                    break;
                };
                for dependent in dependents.remove(&finished).unwrap_or_default() {
                    let remaining = blocked_on
                        .get_mut(&dependent)
                        .expect("blocked nodes were counted up front");
                    *remaining -= 1;
                    if *remaining == 0 {
                        blocked_on.remove(&dependent);
                        ready.push_back(dependent);
                    }
                }
            }
        });

        (Self { driver }, node_rx)
    }

    /// Waits for the driver task to wind down.
    pub async fn wait(self) -> Result<(), tokio::task::JoinError> {
        self.driver.await
    }
}

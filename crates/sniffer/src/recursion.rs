//! Bounded breadth-first exploration of discovered page candidates.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info, warn};

use crate::error::ProbeError;
use crate::monitor::{Monitor, MonitorOutcome};
use crate::url::{normalize_url, same_site};

/// Work queue for one recursive exploration.
///
/// The origin counts as visited. Each node is explored at most once, the
/// number of explored nodes is capped at `max(8, 8 * depth)` and the number
/// of cross-site nodes at `max(2, 2 * depth)`.
#[derive(Debug)]
pub struct CrawlQueue {
    origin: String,
    depth: u32,
    max_nodes: usize,
    max_cross_site: usize,
    pending: VecDeque<(String, u32)>,
    visited: HashSet<String>,
    processed: usize,
    cross_site: usize,
}

impl CrawlQueue {
    pub fn new(origin: &str, depth: u32) -> Self {
        let depth = depth.max(1);
        let mut origin_key = normalize_url(origin, None);
        if origin_key.is_empty() {
            origin_key = origin.to_string();
        }
        let mut visited = HashSet::new();
        visited.insert(origin_key.clone());
        Self {
            origin: origin_key,
            depth,
            max_nodes: 8usize.max(8 * depth as usize),
            max_cross_site: 2usize.max(2 * depth as usize),
            pending: VecDeque::new(),
            visited,
            processed: 0,
            cross_site: 0,
        }
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn max_cross_site(&self) -> usize {
        self.max_cross_site
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn enqueue<I>(&mut self, pages: I, level: u32)
    where
        I: IntoIterator<Item = String>,
    {
        if level > self.depth {
            return;
        }
        self.pending
            .extend(pages.into_iter().map(|page| (page, level)));
    }

    /// Next node to explore with its level, charging the cross-site budget.
    /// `None` once the queue is empty or the node budget is spent.
    pub fn next(&mut self) -> Option<(String, u32)> {
        while self.processed < self.max_nodes {
            let (page, level) = self.pending.pop_front()?;
            if level > self.depth || self.visited.contains(&page) {
                continue;
            }
            if !same_site(&page, &self.origin) {
                if self.cross_site >= self.max_cross_site {
                    debug!(page = %page, "cross-site budget spent, skipping");
                    continue;
                }
                self.cross_site += 1;
            }
            self.visited.insert(page.clone());
            return Some((page, level));
        }
        None
    }

    pub fn finish_node(&mut self) {
        self.processed += 1;
    }

    /// Depth handed to a child run: children below the last level still
    /// collect pages of their own.
    pub fn child_depth(&self, level: u32) -> u32 {
        if level < self.depth { 2 } else { 1 }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }
}

/// Explore the pages of `outcome` recursively and fold every child's
/// results into it.
pub async fn explore(monitor: &Monitor, outcome: &mut MonitorOutcome) -> Result<(), ProbeError> {
    let depth = monitor.recursion_depth();
    let mut queue = CrawlQueue::new(monitor.target_url(), depth);
    queue.enqueue(outcome.pages.clone(), 2);

    info!(
        depth,
        max_nodes = queue.max_nodes(),
        max_cross_site = queue.max_cross_site(),
        "recursive exploration started"
    );

    while let Some((page, level)) = queue.next() {
        if monitor.stop_signal().is_stopped() {
            return Err(ProbeError::Cancelled);
        }
        info!(page = %page, level, "exploring page");
        let child = monitor.child(&page, queue.child_depth(level));
        match child.run_attempts().await {
            Ok(found) => {
                if level < queue.depth() {
                    queue.enqueue(found.pages.clone(), level + 1);
                }
                merge_child(outcome, found);
            }
            Err(ProbeError::Cancelled) => return Err(ProbeError::Cancelled),
            Err(e) => warn!(page = %page, error = %e, "page exploration failed"),
        }
        queue.finish_node();
    }

    info!(
        explored = queue.processed(),
        manifests = outcome.manifests.len(),
        "recursive exploration done"
    );
    Ok(())
}

fn merge_child(outcome: &mut MonitorOutcome, child: MonitorOutcome) {
    append_unique(&mut outcome.manifests, child.manifests);
    append_unique(&mut outcome.predicted, child.predicted);
    append_unique(&mut outcome.pages, child.pages);
    outcome
        .predicted
        .retain(|url| !outcome.manifests.contains(url));
    outcome.hints.merge_child(child.hints);
    outcome.blocked |= child.blocked;
    if outcome.last_error.is_none() {
        outcome.last_error = child.last_error;
    }
}

fn append_unique(into: &mut Vec<String>, items: Vec<String>) {
    let mut seen: HashSet<String> = into.iter().cloned().collect();
    for item in items {
        if seen.insert(item.clone()) {
            into.push(item);
        }
    }
}

/* Copyright (c) 2018 University of Utah
 *
 * Permission to use, copy, modify, and distribute this software for any
 * purpose with or without fee is hereby granted, provided that the above
 * copyright notice and this permission notice appear in all copies.
 *
 * THE SOFTWARE IS PROVIDED "AS IS" AND THE AUTHOR(S) DISCLAIM ALL WARRANTIES
 * WITH REGARD TO THIS SOFTWARE INCLUDING ALL IMPLIED WARRANTIES OF
 * MERCHANTABILITY AND FITNESS. IN NO EVENT SHALL AUTHORS BE LIABLE FOR
 * ANY SPECIAL, DIRECT, INDIRECT, OR CONSEQUENTIAL DAMAGES OR ANY DAMAGES
 * WHATSOEVER RESULTING FROM LOSS OF USE, DATA OR PROFITS, WHETHER IN AN
 * ACTION OF CONTRACT, NEGLIGENCE OR OTHER TORTIOUS ACTION, ARISING OUT OF
 * OR IN CONNECTION WITH THE USE OR PERFORMANCE OF THIS SOFTWARE.
 */

//! Parses a router's topology string into a task DAG, topologically sorts
//! it, and propagates a source rate through a weight matrix built from
//! observed per-queue throughput.

use std::collections::{HashMap, VecDeque};

use crate::error::{CoreError, CoreResult};

/// One parsed record from the topology string: a task name plus the
/// names of the queues feeding it and the queues it feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Live per-queue measurements, refreshed by `update_info()` from
/// whatever collects them (an element, a test harness).
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub push_rate: f64,
    pub pull_rate: f64,
    pub push_cycles: u64,
    pub pull_cycles: u64,
    pub drops: u64,
}

/// The per-router task DAG: topo order, adjacency, a weight matrix of
/// output-fraction-to-downstream-task, and the scalar rates propagated
/// from the source through that matrix.
pub struct TopologyModel {
    tasks: Vec<TaskRecord>,
    /// index of each task name into `tasks`
    index: HashMap<String, usize>,
    /// adjacency[i] = indices of tasks fed by task i's outputs
    adjacency: Vec<Vec<usize>>,
    topo_order: Vec<usize>,
    weights: Vec<Vec<f64>>,
    rates: Vec<f64>,
    cycles: Vec<u64>,
}

/// A record with an empty input list is the source; exactly one is
/// required.
fn parse_topology(spec: &str) -> CoreResult<Vec<TaskRecord>> {
    let fields: Vec<&str> = spec.split(',').map(str::trim).collect();
    if fields.is_empty() || fields.len() % 3 != 0 {
        return Err(CoreError::Config(format!(
            "topology string must be groups of (task, inputs, outputs): {}",
            spec
        )));
    }
    let mut records = Vec::new();
    for chunk in fields.chunks(3) {
        let name = chunk[0].to_string();
        if name.is_empty() {
            return Err(CoreError::Config("task record with empty name".into()));
        }
        let inputs = chunk[1].split_whitespace().map(str::to_string).collect();
        let outputs = chunk[2].split_whitespace().map(str::to_string).collect();
        records.push(TaskRecord { name, inputs, outputs });
    }
    Ok(records)
}

impl TopologyModel {
    /// Parses `spec` and builds the task DAG. The source record (empty
    /// `inputs`) becomes topo-sort seed and is assigned index 0 after
    /// sorting.
    pub fn parse(spec: &str) -> CoreResult<TopologyModel> {
        let tasks = parse_topology(spec)?;
        let index: HashMap<String, usize> = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();

        // Map queue name -> producing task index, via each task's
        // outputs, so we can connect a consumer's inputs back to its
        // producer without the caller naming the edge twice.
        let mut producer_of: HashMap<&str, usize> = HashMap::new();
        for (i, t) in tasks.iter().enumerate() {
            for q in &t.outputs {
                producer_of.insert(q.as_str(), i);
            }
        }

        let mut adjacency = vec![Vec::new(); tasks.len()];
        let mut in_degree = vec![0usize; tasks.len()];
        for (j, t) in tasks.iter().enumerate() {
            for q in &t.inputs {
                if let Some(&i) = producer_of.get(q.as_str()) {
                    adjacency[i].push(j);
                    in_degree[j] += 1;
                }
            }
        }

        let source = tasks
            .iter()
            .position(|t| t.inputs.is_empty())
            .ok_or_else(|| CoreError::Config("topology has no source task".into()))?;

        let topo_order = kahn_toposort(&adjacency, &in_degree, source, tasks.len())?;

        let weights = vec![Vec::new(); tasks.len()];
        let rates = vec![0.0; tasks.len()];
        let cycles = vec![0; tasks.len()];

        Ok(TopologyModel {
            tasks,
            index,
            adjacency,
            topo_order,
            weights,
            rates,
            cycles,
        })
    }

    pub fn task_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.name.as_str())
    }

    pub fn topo_order(&self) -> &[usize] {
        &self.topo_order
    }

    /// Recomputes the weight matrix from freshly observed per-task
    /// output rates, then re-propagates the source rate. `stats` must
    /// contain an entry for every task index produced by `parse`.
    pub fn update_info(&mut self, ref_rate: f64, stats: &[QueueStats]) {
        for (i, t) in self.tasks.iter().enumerate() {
            let total_out: f64 = t
                .outputs
                .iter()
                .filter_map(|q| self.index.get(q.as_str()))
                .map(|&j| stats.get(j).map(|s| s.push_rate).unwrap_or(0.0))
                .sum();
            self.weights[i] = self
                .adjacency[i]
                .iter()
                .map(|&j| {
                    if total_out > 0.0 {
                        stats.get(j).map(|s| s.push_rate).unwrap_or(0.0) / total_out
                    } else {
                        0.0
                    }
                })
                .collect();
            self.cycles[i] = stats.get(i).map(|s| s.push_cycles + s.pull_cycles).unwrap_or(0);
        }
        self.propagate(ref_rate);
    }

    fn propagate(&mut self, ref_rate: f64) {
        for r in self.rates.iter_mut() {
            *r = 0.0;
        }
        if let Some(&source) = self.topo_order.first() {
            self.rates[source] = ref_rate;
        }
        for &i in &self.topo_order {
            let out_rate = self.rates[i];
            for (k, &j) in self.adjacency[i].iter().enumerate() {
                let w = self.weights[i].get(k).copied().unwrap_or(0.0);
                self.rates[j] += out_rate * w;
            }
        }
    }

    /// Rescales the already-propagated rates by `ratio` (a router's
    /// source-rate share of a multi-router system's total), as used by
    /// the rate-weighted global balancer.
    pub fn task_rate(&self, ratio: f64) -> Vec<f64> {
        self.rates.iter().map(|r| r * ratio).collect()
    }

    pub fn task_cycle(&self) -> &[u64] {
        &self.cycles
    }

    pub fn src_rate(&self) -> f64 {
        self.topo_order
            .first()
            .map(|&s| self.rates[s])
            .unwrap_or(0.0)
    }
}

fn kahn_toposort(
    adjacency: &[Vec<usize>],
    in_degree: &[usize],
    source: usize,
    n: usize,
) -> CoreResult<Vec<usize>> {
    let mut in_degree = in_degree.to_vec();
    let mut queue = VecDeque::new();
    queue.push_back(source);
    // Any other task that happens to have in-degree 0 (disconnected from
    // the source) is also seeded, so a malformed graph still produces a
    // total order instead of silently dropping tasks.
    for (i, &d) in in_degree.iter().enumerate() {
        if d == 0 && i != source {
            queue.push_back(i);
        }
    }

    let mut order = Vec::with_capacity(n);
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &j in &adjacency[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                queue.push_back(j);
            }
        }
    }

    if order.len() != n {
        return Err(CoreError::Config("topology contains a cycle".into()));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_chain() -> TopologyModel {
        TopologyModel::parse("src,,q1,mid,q1,q2,sink,q2,").unwrap()
    }

    #[test]
    fn parses_a_linear_chain_with_source_first() {
        let model = linear_chain();
        assert_eq!(model.topo_order(), &[0, 1, 2]);
    }

    #[test]
    fn propagates_rate_through_a_single_path() {
        let mut model = linear_chain();
        let stats = vec![
            QueueStats { push_rate: 100.0, ..Default::default() },
            QueueStats { push_rate: 100.0, ..Default::default() },
            QueueStats { push_rate: 0.0, ..Default::default() },
        ];
        model.update_info(100.0, &stats);
        assert_eq!(model.src_rate(), 100.0);
        assert!((model.rates[1] - 100.0).abs() < 1e-9);
        assert!((model.rates[2] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn task_rate_rescales_by_ratio() {
        let mut model = linear_chain();
        let stats = vec![QueueStats { push_rate: 50.0, ..Default::default() }; 3];
        model.update_info(100.0, &stats);
        let half = model.task_rate(0.5);
        assert!((half[0] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn cyclic_topology_is_rejected() {
        let err = TopologyModel::parse("src,,q0,a,q0 qb,qa,b,qa,qb");
        assert!(err.is_err());
    }

    #[test]
    fn missing_source_is_rejected() {
        let err = TopologyModel::parse("a,q1,q2,b,q2,q1");
        assert!(err.is_err());
    }
}
